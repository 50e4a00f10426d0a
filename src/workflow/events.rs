//! Streaming event surface.
//!
//! The optional streaming mode surfaces each history append as an ordered,
//! at-least-once event without changing the sequential run semantics. Every
//! stream is terminated by exactly one `Done` or `Error` event.

use serde::Serialize;

use super::state::WorkflowOutcome;
use crate::agents::AgentResult;

/// One observable step of a streamed run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A state-machine node began executing.
    NodeStarted {
        node: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_key: Option<String>,
    },
    /// A line was appended to the discussion history.
    HistoryAppended { entry: String },
    /// The run reached a terminal state.
    Done {
        round: u32,
        outcome: WorkflowOutcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        final_output: Option<AgentResult>,
    },
    /// The run faulted terminally.
    Error { message: String },
}
