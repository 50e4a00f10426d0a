//! The workflow engine: a bounded Router → Specialist → Arbitrator loop.
//!
//! Node execution within one run is strictly sequential; concurrency exists
//! only across independent runs, which share the read-mostly registries.
//! The only safeguard against runaway execution is the round bound.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::events::WorkflowEvent;
use super::router::{self, RouterTable};
use super::state::{AnalysisState, ForcedReason, WorkflowOutcome, MAX_ROUNDS};
use crate::agents::{AgentContext, AgentRegistry, AgentResult, Verdict};
use crate::error::WorkflowError;
use crate::trace::NodeKind;

/// Capacity of a stream's event channel.
const STREAM_BUFFER: usize = 64;

type EventSender = mpsc::Sender<WorkflowEvent>;

/// Drives one analysis run to a terminal state.
#[derive(Debug, Clone)]
pub struct Workflow {
    agents: Arc<AgentRegistry>,
    max_rounds: u32,
}

impl Workflow {
    /// Create an engine over the given agent roster.
    pub fn new(agents: Arc<AgentRegistry>) -> Self {
        Self {
            agents,
            max_rounds: MAX_ROUNDS,
        }
    }

    /// Override the round bound.
    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    /// Run the state machine to completion and return the final state.
    pub async fn invoke(&self, state: AnalysisState) -> AnalysisState {
        self.run(state, None).await
    }

    /// Run the state machine, surfacing each step as an ordered event.
    /// The stream is terminated by exactly one `Done` or `Error` event.
    pub fn stream(&self, state: AnalysisState) -> mpsc::Receiver<WorkflowEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let engine = self.clone();
        tokio::spawn(async move {
            let state = engine.run(state, Some(tx.clone())).await;
            let event = match &state.outcome {
                WorkflowOutcome::Error { message } => WorkflowEvent::Error {
                    message: message.clone(),
                },
                outcome => WorkflowEvent::Done {
                    round: state.round,
                    outcome: outcome.clone(),
                    final_output: state.final_output.clone(),
                },
            };
            tx.send(event).await.ok();
        });
        rx
    }

    async fn run(&self, mut state: AnalysisState, tx: Option<EventSender>) -> AnalysisState {
        self.route(&mut state, &tx).await;

        loop {
            self.specialist_node(&mut state, &tx).await;

            if !self.arbitrator_node(&mut state, &tx).await {
                break;
            }

            let verdict = state
                .arbitrator_output
                .as_ref()
                .map(Verdict::from_result)
                .unwrap_or(Verdict::Continue {
                    next_agent: None,
                    question: None,
                });

            match verdict {
                Verdict::Final { .. } => {
                    state.final_output = state.arbitrator_output.clone();
                    state.outcome = WorkflowOutcome::Final;
                    break;
                }
                Verdict::Continue { next_agent, .. } => {
                    if state.round >= self.max_rounds {
                        warn!(round = state.round, "max rounds reached, forcing end");
                        state.outcome = WorkflowOutcome::Forced {
                            reason: ForcedReason::RoundLimit,
                        };
                        break;
                    }
                    if next_agent.is_none() {
                        info!("continue verdict without dispatch, forcing end");
                        state.outcome = WorkflowOutcome::Forced {
                            reason: ForcedReason::NoDispatch,
                        };
                        break;
                    }
                    // Loop back to the specialist node with the directive
                    // still in place.
                }
            }
        }

        // Finalize the trace on every terminal transition, forced included.
        state.trace_snapshot = Some(state.trace.lock().finalize());
        state
    }

    async fn route(&self, state: &mut AnalysisState, tx: &Option<EventSender>) {
        state.trace.lock().start_node(NodeKind::Router, None, None);
        self.emit(
            tx,
            WorkflowEvent::NodeStarted {
                node: "router".into(),
                agent_key: None,
            },
        )
        .await;

        let table = RouterTable {
            precedence: self.agents.router_keywords(),
            default_key: self.agents.default_agent_key(),
        };
        let target = router::decide(&state.history, &table);
        state.trace.lock().log_decision(&target);
        state.router_decision = Some(target);
    }

    async fn specialist_node(&self, state: &mut AnalysisState, tx: &Option<EventSender>) {
        // A pending arbitrator directive overrides the router's choice.
        let directive = state
            .arbitrator_output
            .as_ref()
            .and_then(|out| out.field_str("next_agent").map(str::to_string))
            .map(|key| {
                let question = state
                    .arbitrator_output
                    .as_ref()
                    .and_then(|out| out.field_str("question_for_agent"))
                    .map(str::to_string);
                (key, question)
            });
        let (agent_key, question) = match directive {
            Some((key, question)) => {
                info!(agent = %key, "specialist node (dispatched)");
                (key, question)
            }
            None => {
                let key = state
                    .router_decision
                    .clone()
                    .unwrap_or_else(|| self.agents.default_agent_key());
                info!(agent = %key, "specialist node (routed)");
                (key, None)
            }
        };

        self.emit(
            tx,
            WorkflowEvent::NodeStarted {
                node: "specialist".into(),
                agent_key: Some(agent_key.clone()),
            },
        )
        .await;

        let Some(registered) = self.agents.get(&agent_key) else {
            error!(agent = %agent_key, "agent not found");
            self.push_history(state, tx, format!("Error: Agent {agent_key} not found"))
                .await;
            state.arbitrator_output = None;
            return;
        };

        {
            let mut trace = state.trace.lock();
            trace.start_node(
                NodeKind::Specialist,
                Some(agent_key.as_str()),
                Some(registered.spec.name.as_str()),
            );
            for pack in &registered.spec.skill_packs {
                trace.log_skill(pack);
            }
        }

        let ctx = AgentContext {
            history: state.sanitized_history(),
            question,
            team_overview: None,
            trace: Some(state.trace.clone()),
        };
        let result = registered.agent.analyze(state.dataset.clone(), &ctx).await;
        state.trace.lock().log_confidence(result.confidence);

        self.push_history(
            state,
            tx,
            format!(
                "{agent_key}: Conf={}. {}",
                result.confidence, result.reasoning
            ),
        )
        .await;
        state.agent_results.insert(agent_key, result);
        // The directive is consumed; the next one comes from the arbitrator.
        state.arbitrator_output = None;
    }

    /// Returns `false` when the run faulted terminally.
    async fn arbitrator_node(&self, state: &mut AnalysisState, tx: &Option<EventSender>) -> bool {
        let Some(arbitrator) = self.agents.arbitrator() else {
            error!("arbitrator not found in roster");
            state.final_output = Some(AgentResult::degraded("Arbitrator not found"));
            state.outcome = WorkflowOutcome::Error {
                message: WorkflowError::ArbitratorMissing.to_string(),
            };
            return false;
        };

        self.emit(
            tx,
            WorkflowEvent::NodeStarted {
                node: "arbitrator".into(),
                agent_key: Some(arbitrator.spec.key.clone()),
            },
        )
        .await;
        state.trace.lock().start_node(
            NodeKind::Arbitrator,
            Some(arbitrator.spec.key.as_str()),
            Some(arbitrator.spec.name.as_str()),
        );

        let ctx = AgentContext {
            history: state.sanitized_history(),
            question: None,
            team_overview: Some(self.agents.team_description_with_tools()),
            trace: Some(state.trace.clone()),
        };
        let mut result = arbitrator.agent.analyze(state.dataset.clone(), &ctx).await;

        // An invalid dispatch reference is nulled, never fatal.
        if let Some(next_agent) = result.field_str("next_agent").map(str::to_string) {
            if !self.agents.is_specialist(&next_agent) {
                warn!(next_agent = %next_agent, "invalid next_agent, clearing");
                result.fields.remove("next_agent");
                result.fields.remove("question_for_agent");
            }
        }

        {
            let mut trace = state.trace.lock();
            trace.log_confidence(result.confidence);
            if let Some(status) = &result.status {
                trace.log_decision(status);
            }
        }

        state.round += 1;

        let status = result.status.clone().unwrap_or_default();
        let decision = result.field_str("decision").unwrap_or_default();
        let mut line = format!(
            "Arbitrator: Status={status}. Decision={decision} (Conf: {}). {}",
            result.confidence, result.reasoning
        );
        if let Some(next_agent) = result.field_str("next_agent") {
            line.push_str(&format!("\n-> Dispatching to: {next_agent}"));
            if let Some(question) = result.field_str("question_for_agent") {
                line.push_str(&format!(" with question: {question}"));
            }
        }
        self.push_history(state, tx, line).await;

        state.arbitrator_output = Some(result);
        true
    }

    async fn push_history(
        &self,
        state: &mut AnalysisState,
        tx: &Option<EventSender>,
        entry: String,
    ) {
        state.history.push(entry.clone());
        self.emit(tx, WorkflowEvent::HistoryAppended { entry }).await;
    }

    async fn emit(&self, tx: &Option<EventSender>, event: WorkflowEvent) {
        if let Some(tx) = tx {
            // At-least-once, best effort; a dropped receiver never stalls
            // the run.
            tx.send(event).await.ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::WellDataset;
    use crate::llm::ScriptedReasoner;
    use crate::skills::SkillRegistry;

    fn engine_with(replies: Vec<&str>) -> Workflow {
        let skills = Arc::new(SkillRegistry::new("/nonexistent"));
        let registry = AgentRegistry::new(Arc::new(ScriptedReasoner::new(replies)), skills);
        registry.load_default_roster();
        Workflow::new(Arc::new(registry))
    }

    fn initial_state(question: &str) -> AnalysisState {
        AnalysisState::new(Arc::new(WellDataset::new()), Some(question))
    }

    #[tokio::test]
    async fn test_single_round_final() {
        let engine = engine_with(vec![
            r#"{"action": "final_answer", "lithology": "Sandstone", "confidence": 0.9, "reasoning": "低GR"}"#,
            r#"{"status": "FINAL", "decision": "砂岩储层", "confidence": 0.92, "reasoning": "充分"}"#,
        ]);

        let state = engine.invoke(initial_state("分析岩性")).await;
        assert_eq!(state.outcome, WorkflowOutcome::Final);
        assert_eq!(state.round, 1);
        assert_eq!(state.router_decision.as_deref(), Some("LithologyExpert"));
        assert_eq!(
            state.final_output.unwrap().field_str("decision"),
            Some("砂岩储层")
        );
        // Router + specialist + arbitrator, finalized on the terminal edge.
        let snapshot = state.trace_snapshot.unwrap();
        assert_eq!(snapshot.summary.total_steps, 3);
        assert_eq!(snapshot.summary.total_reasoning_calls, 2);
    }

    #[tokio::test]
    async fn test_history_is_append_only_and_formatted() {
        let engine = engine_with(vec![
            r#"{"action": "final_answer", "confidence": 0.8, "reasoning": "ok"}"#,
            r#"{"status": "FINAL", "decision": "done", "confidence": 0.9, "reasoning": "r"}"#,
        ]);

        let state = engine.invoke(initial_state("分析岩性")).await;
        assert_eq!(state.history.len(), 3);
        assert_eq!(state.history[0], "User Note: 分析岩性");
        assert!(state.history[1].starts_with("LithologyExpert: Conf=0.8."));
        assert!(state.history[2].starts_with("Arbitrator: Status=FINAL. Decision=done"));
    }

    #[tokio::test]
    async fn test_missing_arbitrator_is_terminal_error() {
        let skills = Arc::new(SkillRegistry::new("/nonexistent"));
        let registry = AgentRegistry::new(
            Arc::new(ScriptedReasoner::new([
                r#"{"action": "final_answer", "confidence": 0.8, "reasoning": "ok"}"#,
            ])),
            skills,
        );
        registry.load_specs(
            vec![crate::agents::AgentSpec {
                key: "OnlyExpert".into(),
                ..Default::default()
            }],
            None,
        );
        let engine = Workflow::new(Arc::new(registry));

        let state = engine.invoke(initial_state("anything")).await;
        assert!(matches!(state.outcome, WorkflowOutcome::Error { .. }));
        assert!(state.trace_snapshot.is_some());
    }

    #[tokio::test]
    async fn test_invalid_next_agent_is_cleared_and_run_forced() {
        let engine = engine_with(vec![
            r#"{"action": "final_answer", "confidence": 0.6, "reasoning": "partial"}"#,
            r#"{"status": "CONTINUE", "confidence": 0.5, "reasoning": "need porosity",
                "next_agent": "GhostAgent", "question_for_agent": "porosity?"}"#,
        ]);

        let state = engine.invoke(initial_state("分析岩性")).await;
        assert_eq!(
            state.outcome,
            WorkflowOutcome::Forced {
                reason: ForcedReason::NoDispatch
            }
        );
        assert_eq!(state.round, 1);
        // The unresolvable reference never reaches the history line.
        assert!(!state.history.last().unwrap().contains("Dispatching"));
        assert!(state
            .arbitrator_output
            .as_ref()
            .unwrap()
            .field_str("next_agent")
            .is_none());
    }

    #[tokio::test]
    async fn test_round_limit_forces_termination() {
        let continue_reply = r#"{"status": "CONTINUE", "confidence": 0.4, "reasoning": "more",
            "next_agent": "ReservoirPropertyExpert", "question_for_agent": "孔隙度如何?"}"#;
        let engine = engine_with(vec![
            r#"{"action": "final_answer", "confidence": 0.6, "reasoning": "r1"}"#,
            continue_reply,
            r#"{"action": "final_answer", "confidence": 0.7, "reasoning": "r2"}"#,
            continue_reply,
        ])
        .with_max_rounds(2);

        let state = engine.invoke(initial_state("分析岩性")).await;
        assert_eq!(
            state.outcome,
            WorkflowOutcome::Forced {
                reason: ForcedReason::RoundLimit
            }
        );
        assert_eq!(state.round, 2);
        // Both specialists answered: the routed one and the dispatched one.
        assert!(state.agent_results.contains_key("LithologyExpert"));
        assert!(state.agent_results.contains_key("ReservoirPropertyExpert"));
        assert!(state.history[2].contains("-> Dispatching to: ReservoirPropertyExpert"));
        assert!(state.history[2].contains("with question: 孔隙度如何?"));
    }

    #[tokio::test]
    async fn test_unknown_default_key_falls_back_to_first_specialist() {
        let skills = Arc::new(SkillRegistry::new("/nonexistent"));
        let registry = AgentRegistry::new(
            Arc::new(ScriptedReasoner::new([
                r#"{"action": "final_answer", "confidence": 0.6, "reasoning": "r"}"#,
                r#"{"status": "FINAL", "decision": "done", "confidence": 0.9, "reasoning": "r"}"#,
            ])),
            skills,
        );
        registry.load_specs(crate::agents::default_roster(), Some("Missing".to_string()));
        let engine = Workflow::new(Arc::new(registry));

        let state = engine.invoke(initial_state("hello")).await;
        assert_eq!(state.outcome, WorkflowOutcome::Final);
        assert_eq!(
            state.router_decision.as_deref(),
            Some("ReservoirPropertyExpert")
        );
    }

    #[tokio::test]
    async fn test_shipped_config_and_skill_packs_load() {
        let skills = Arc::new(SkillRegistry::new("skills"));
        assert_eq!(skills.list_packs().len(), 3);
        assert!(skills
            .list_tools()
            .iter()
            .any(|t| t.name == "calculate_vsh"));

        let mut registry =
            AgentRegistry::new(Arc::new(ScriptedReasoner::default()), skills);
        registry.load_from_path("config/agents.yaml").unwrap();
        assert_eq!(registry.specialists().len(), 6);
        assert_eq!(registry.default_agent_key(), "LithologyExpert");
        assert!(registry.arbitrator().is_some());
    }

    #[tokio::test]
    async fn test_stream_emits_ordered_events_with_done() {
        let engine = engine_with(vec![
            r#"{"action": "final_answer", "confidence": 0.8, "reasoning": "ok"}"#,
            r#"{"status": "FINAL", "decision": "done", "confidence": 0.9, "reasoning": "r"}"#,
        ]);

        let mut rx = engine.stream(initial_state("分析岩性"));
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert!(matches!(events.first(), Some(WorkflowEvent::NodeStarted { node, .. }) if node == "router"));
        let appends = events
            .iter()
            .filter(|e| matches!(e, WorkflowEvent::HistoryAppended { .. }))
            .count();
        assert_eq!(appends, 2);
        assert!(matches!(
            events.last(),
            Some(WorkflowEvent::Done {
                outcome: WorkflowOutcome::Final,
                ..
            })
        ));
    }
}
