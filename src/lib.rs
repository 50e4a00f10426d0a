//! # WellCouncil
//!
//! A bounded multi-agent deliberation engine for petrophysical well-log
//! analysis. Version 0.3.0
//!
//! WellCouncil orchestrates a roster of domain specialist agents and a
//! single arbitrator over a shared discussion history: a keyword router
//! picks the opening specialist, specialists reason over the well dataset
//! (optionally executing registered skill tools), and the arbitrator either
//! closes the discussion with a final decision or dispatches a follow-up
//! question, all within a hard round bound.

pub mod agents;
pub mod dataset;
pub mod error;
pub mod llm;
pub mod skills;
pub mod trace;
pub mod workflow;

pub use agents::{Agent, AgentContext, AgentRegistry, AgentResult, AgentSpec};
pub use dataset::WellDataset;
pub use error::{ConfigError, SkillError, WorkflowError};
pub use llm::{ReasoningReply, ReasoningService};
pub use skills::{SkillRegistry, ToolDescriptor};
pub use trace::{AnalysisTrace, TraceSnapshot};
pub use workflow::{AnalysisState, Workflow, WorkflowEvent, WorkflowOutcome};

/// Library version.
pub const VERSION: &str = "0.3.0";
