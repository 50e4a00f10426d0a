//! Bounded multi-agent analysis workflow.

pub mod engine;
pub mod events;
pub mod router;
pub mod state;

pub use engine::Workflow;
pub use events::WorkflowEvent;
pub use router::{decide, RouterTable};
pub use state::{
    sanitize_history_text, AnalysisState, ForcedReason, WorkflowOutcome, MAX_ROUNDS,
};
