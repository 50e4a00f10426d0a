//! Execution tracer for analysis runs.
//!
//! Records one [`NodeVisit`] per state-machine node execution (router,
//! specialist, arbitrator) with timing, confidence, skill usage, and
//! reasoning-call accounting. At most one record is open at a time;
//! [`AnalysisTrace::finalize`] closes the trace into an immutable
//! [`TraceSnapshot`] with aggregate totals.
//!
//! The trace is owned by a single run and threaded through agent context as
//! a [`TraceHandle`]; there is no process-wide tracer state.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// Shared handle to a run's tracer.
pub type TraceHandle = Arc<Mutex<AnalysisTrace>>;

/// Kind of state-machine node a visit belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Router,
    Specialist,
    Arbitrator,
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::Router => write!(f, "router"),
            NodeKind::Specialist => write!(f, "specialist"),
            NodeKind::Arbitrator => write!(f, "arbitrator"),
        }
    }
}

/// One reasoning call made while a node was open.
#[derive(Debug, Clone, Serialize)]
pub struct ReasoningCallLog {
    /// Agent that issued the call.
    pub agent: String,
    /// Model identifier reported by the reasoning service.
    pub model: String,
    /// Prompt-side tokens.
    pub prompt_tokens: u32,
    /// Completion-side tokens.
    pub completion_tokens: u32,
    /// Wall-clock duration of the call in milliseconds.
    pub duration_ms: u64,
    /// When the call completed.
    pub timestamp: DateTime<Utc>,
}

/// One recorded execution of a single state-machine node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeVisit {
    /// 1-based position within the run.
    pub step: u32,
    /// Node kind.
    pub node: NodeKind,
    /// Agent key, when the node dispatched to an agent.
    pub agent_key: Option<String>,
    /// Agent display name.
    pub agent_name: Option<String>,
    /// Decision recorded at this node (router target, arbitrator status).
    pub decision: Option<String>,
    /// Skill packs loaded and tools executed while the node was open.
    pub skills: Vec<String>,
    /// The reasoning call made by this node, if any.
    pub reasoning_call: Option<ReasoningCallLog>,
    /// Confidence reported by the node's agent.
    pub confidence: Option<f64>,
    /// Time the node was open, in milliseconds.
    pub duration_ms: u64,
    #[serde(skip)]
    started: Instant,
}

impl NodeVisit {
    fn open(step: u32, node: NodeKind, agent_key: Option<&str>, agent_name: Option<&str>) -> Self {
        Self {
            step,
            node,
            agent_key: agent_key.map(str::to_string),
            agent_name: agent_name.map(str::to_string),
            decision: None,
            skills: Vec::new(),
            reasoning_call: None,
            confidence: None,
            duration_ms: 0,
            started: Instant::now(),
        }
    }

    fn close(mut self) -> Self {
        self.duration_ms = self.started.elapsed().as_millis() as u64;
        self
    }
}

/// Aggregate totals over a finished trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceSummary {
    pub total_steps: usize,
    pub total_reasoning_calls: u32,
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Immutable snapshot of a completed trace.
#[derive(Debug, Clone, Serialize)]
pub struct TraceSnapshot {
    pub analysis_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub visits: Vec<NodeVisit>,
    pub summary: TraceSummary,
}

/// Mutable per-run trace collector.
#[derive(Debug)]
pub struct AnalysisTrace {
    /// Short run identifier, used as a log prefix.
    pub analysis_id: String,
    started_at: DateTime<Utc>,
    started: Instant,
    visits: Vec<NodeVisit>,
    open: Option<NodeVisit>,
    step: u32,
    total_calls: u32,
    total_prompt_tokens: u64,
    total_completion_tokens: u64,
}

impl Default for AnalysisTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalysisTrace {
    /// Start a fresh trace with a generated short id.
    pub fn new() -> Self {
        let analysis_id = Uuid::new_v4().to_string()[..8].to_string();
        info!(analysis_id = %analysis_id, "analysis trace started");
        Self {
            analysis_id,
            started_at: Utc::now(),
            started: Instant::now(),
            visits: Vec::new(),
            open: None,
            step: 0,
            total_calls: 0,
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
        }
    }

    /// Wrap a fresh trace in a shareable handle.
    pub fn handle() -> TraceHandle {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Open a new node record, closing any previously open record first.
    pub fn start_node(
        &mut self,
        node: NodeKind,
        agent_key: Option<&str>,
        agent_name: Option<&str>,
    ) {
        if let Some(prev) = self.open.take() {
            self.visits.push(prev.close());
        }
        self.step += 1;
        info!(
            analysis_id = %self.analysis_id,
            node = %node,
            agent = agent_key.unwrap_or("-"),
            "node started"
        );
        self.open = Some(NodeVisit::open(self.step, node, agent_key, agent_name));
    }

    /// Record a decision on the open node.
    pub fn log_decision(&mut self, decision: &str) {
        if let Some(node) = self.open.as_mut() {
            node.decision = Some(decision.to_string());
            info!(analysis_id = %self.analysis_id, decision, "node decision");
        }
    }

    /// Record a skill pack load or tool execution on the open node.
    pub fn log_skill(&mut self, skill: &str) {
        if let Some(node) = self.open.as_mut() {
            if !node.skills.iter().any(|s| s == skill) {
                node.skills.push(skill.to_string());
            }
        }
    }

    /// Record a reasoning call on the open node and in the run totals.
    pub fn log_reasoning_call(&mut self, call: ReasoningCallLog) {
        self.total_calls += 1;
        self.total_prompt_tokens += u64::from(call.prompt_tokens);
        self.total_completion_tokens += u64::from(call.completion_tokens);
        info!(
            analysis_id = %self.analysis_id,
            agent = %call.agent,
            prompt_tokens = call.prompt_tokens,
            completion_tokens = call.completion_tokens,
            duration_ms = call.duration_ms,
            "reasoning call"
        );
        if let Some(node) = self.open.as_mut() {
            node.reasoning_call = Some(call);
        }
    }

    /// Record the confidence reported on the open node.
    pub fn log_confidence(&mut self, confidence: f64) {
        if let Some(node) = self.open.as_mut() {
            node.confidence = Some(confidence);
        }
    }

    /// Close the open record and produce the immutable snapshot.
    pub fn finalize(&mut self) -> TraceSnapshot {
        if let Some(open) = self.open.take() {
            self.visits.push(open.close());
        }
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let snapshot = TraceSnapshot {
            analysis_id: self.analysis_id.clone(),
            started_at: self.started_at,
            duration_ms,
            visits: self.visits.clone(),
            summary: TraceSummary {
                total_steps: self.visits.len(),
                total_reasoning_calls: self.total_calls,
                total_tokens: self.total_prompt_tokens + self.total_completion_tokens,
                prompt_tokens: self.total_prompt_tokens,
                completion_tokens: self.total_completion_tokens,
            },
        };
        info!(
            analysis_id = %self.analysis_id,
            duration_ms,
            reasoning_calls = self.total_calls,
            total_tokens = snapshot.summary.total_tokens,
            "analysis trace finalized"
        );
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_node_closes_previous_record() {
        let mut trace = AnalysisTrace::new();
        trace.start_node(NodeKind::Router, None, None);
        trace.log_decision("LithologyExpert");
        trace.start_node(NodeKind::Specialist, Some("LithologyExpert"), Some("岩性专家"));

        let snapshot = trace.finalize();
        assert_eq!(snapshot.visits.len(), 2);
        assert_eq!(snapshot.visits[0].step, 1);
        assert_eq!(
            snapshot.visits[0].decision.as_deref(),
            Some("LithologyExpert")
        );
        assert_eq!(snapshot.visits[1].node, NodeKind::Specialist);
    }

    #[test]
    fn test_totals_accumulate_across_nodes() {
        let mut trace = AnalysisTrace::new();
        trace.start_node(NodeKind::Specialist, Some("A"), None);
        trace.log_reasoning_call(ReasoningCallLog {
            agent: "A".into(),
            model: "scripted".into(),
            prompt_tokens: 100,
            completion_tokens: 40,
            duration_ms: 5,
            timestamp: Utc::now(),
        });
        trace.start_node(NodeKind::Arbitrator, Some("Arbitrator"), None);
        trace.log_reasoning_call(ReasoningCallLog {
            agent: "Arbitrator".into(),
            model: "scripted".into(),
            prompt_tokens: 10,
            completion_tokens: 10,
            duration_ms: 2,
            timestamp: Utc::now(),
        });

        let snapshot = trace.finalize();
        assert_eq!(snapshot.summary.total_reasoning_calls, 2);
        assert_eq!(snapshot.summary.total_tokens, 160);
        assert_eq!(snapshot.summary.total_steps, 2);
    }

    #[test]
    fn test_log_skill_deduplicates() {
        let mut trace = AnalysisTrace::new();
        trace.start_node(NodeKind::Specialist, Some("A"), None);
        trace.log_skill("lithology-classification");
        trace.log_skill("lithology-classification");
        trace.log_skill("calculate_vsh");
        let snapshot = trace.finalize();
        assert_eq!(
            snapshot.visits[0].skills,
            vec!["lithology-classification", "calculate_vsh"]
        );
    }

    #[test]
    fn test_mutations_without_open_node_are_ignored() {
        let mut trace = AnalysisTrace::new();
        trace.log_decision("nobody");
        trace.log_confidence(0.5);
        let snapshot = trace.finalize();
        assert!(snapshot.visits.is_empty());
    }
}
