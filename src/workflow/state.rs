//! Analysis run state.
//!
//! One [`AnalysisState`] is owned exclusively by one workflow run. The
//! discussion history is append-only: entries are never altered or
//! reordered once pushed.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::agents::AgentResult;
use crate::dataset::WellDataset;
use crate::trace::{AnalysisTrace, TraceHandle, TraceSnapshot};

/// Maximum arbitrator rounds before forced termination.
pub const MAX_ROUNDS: u32 = 5;

/// Placeholder substituted for embedded chart payloads during context
/// compaction.
pub const CHART_PLACEHOLDER: &str =
    "[Chart Data Generated - Details Omitted for Token Optimization]";

static CHART_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```echarts\n.*?\n```").expect("chart block regex"));

/// Join history entries and replace heavy embedded payloads with a fixed
/// placeholder. Uniform pass applied before building any node's context.
pub fn sanitize_history_text(entries: &[String]) -> String {
    let joined = entries.join("\n");
    CHART_BLOCK.replace_all(&joined, CHART_PLACEHOLDER).into_owned()
}

/// Why a run reached a terminal state without a genuine FINAL verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedReason {
    /// The round bound was hit while the arbitrator still wanted to continue.
    RoundLimit,
    /// A continue verdict named no dispatchable agent.
    NoDispatch,
}

/// Terminal classification of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    /// The run has not reached a terminal state yet.
    Running,
    /// The arbitrator produced a genuine FINAL verdict.
    Final,
    /// Termination was forced; distinguishable from a genuine FINAL.
    Forced { reason: ForcedReason },
    /// An unrecoverable fault (e.g. no arbitrator registered).
    Error { message: String },
}

/// Shared state of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisState {
    /// The dataset under analysis.
    pub dataset: Arc<WellDataset>,
    /// Speaker-tagged discussion history. Append-only.
    pub history: Vec<String>,
    /// Latest structured result per agent key.
    pub agent_results: HashMap<String, AgentResult>,
    /// The router's initial dispatch target.
    pub router_decision: Option<String>,
    /// The most recent arbitrator output; cleared after each specialist
    /// dispatch.
    pub arbitrator_output: Option<AgentResult>,
    /// The final arbitrator output, set only on a genuine FINAL.
    pub final_output: Option<AgentResult>,
    /// Completed arbitrator rounds. Monotonic.
    pub round: u32,
    /// Terminal classification.
    pub outcome: WorkflowOutcome,
    /// Per-run execution tracer.
    pub trace: TraceHandle,
    /// Finalized trace, populated on any terminal transition.
    pub trace_snapshot: Option<TraceSnapshot>,
}

impl AnalysisState {
    /// Initial state for a run. A user question becomes the first history
    /// entry, tagged so the router can find it.
    pub fn new(dataset: Arc<WellDataset>, user_question: Option<&str>) -> Self {
        let mut history = Vec::new();
        if let Some(q) = user_question.filter(|q| !q.is_empty()) {
            history.push(format!("User Note: {q}"));
        }
        Self {
            dataset,
            history,
            agent_results: HashMap::new(),
            router_decision: None,
            arbitrator_output: None,
            final_output: None,
            round: 0,
            outcome: WorkflowOutcome::Running,
            trace: AnalysisTrace::handle(),
            trace_snapshot: None,
        }
    }

    /// The full history with embedded payloads compacted.
    pub fn sanitized_history(&self) -> String {
        sanitize_history_text(&self.history)
    }
}
