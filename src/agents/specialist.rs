//! Prompt-configured specialist agent with registry-mediated tool use.
//!
//! A specialist runs a two-phase plan → act → observe → finalize loop: the
//! planning call yields exactly one [`AgentAction`]; a `tool_use` action is
//! executed through the skill registry and its observation is folded into a
//! second synthesis call that must produce the final structured result.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::base::{extract_json, traced_chat, Agent, AgentAction, AgentContext, AgentResult};
use super::registry::AgentSpec;
use crate::dataset::WellDataset;
use crate::llm::ReasoningService;
use crate::skills::SkillRegistry;

/// A non-arbitrating agent with a narrow domain responsibility, configured
/// entirely from its roster entry.
pub struct SpecialistAgent {
    key: String,
    display_name: String,
    role_prompt: String,
    skill_packs: Vec<String>,
    reasoner: Arc<dyn ReasoningService>,
    skills: Arc<SkillRegistry>,
}

impl SpecialistAgent {
    /// Build a specialist from its roster entry.
    pub fn from_spec(
        spec: &AgentSpec,
        reasoner: Arc<dyn ReasoningService>,
        skills: Arc<SkillRegistry>,
    ) -> Self {
        Self {
            key: spec.key.clone(),
            display_name: spec.name.clone(),
            role_prompt: spec.role_prompt.clone(),
            skill_packs: spec.skill_packs.clone(),
            reasoner,
            skills,
        }
    }

    /// Format the tool inventory for the planning prompt, starring tools
    /// whose trigger keywords match the question.
    fn tools_prompt(&self, question: &str) -> String {
        let tools = self.skills.list_for(&self.skill_packs);
        if tools.is_empty() {
            return "No tools available.".to_string();
        }

        let matched: Vec<String> = self
            .skills
            .match_keywords(question, Some(self.skill_packs.as_slice()))
            .into_iter()
            .map(|t| t.name)
            .collect();

        let mut lines = Vec::new();
        for tool in tools {
            let star = if matched.contains(&tool.name) {
                " ⭐recommended"
            } else {
                ""
            };
            lines.push(format!("### {}{star}", tool.name));
            lines.push(format!("- purpose: {}", tool.description));
            lines.push(format!(
                "- trigger keywords: {}",
                tool.trigger_keywords.join(", ")
            ));
            if let Some(use_cases) = &tool.use_cases {
                lines.push(format!("- use cases: {use_cases}"));
            }
            if let Some(props) = tool.parameters.get("properties").and_then(Value::as_object) {
                let params: Vec<String> = props
                    .iter()
                    .map(|(k, v)| {
                        format!("{k}({})", v.get("type").and_then(Value::as_str).unwrap_or("any"))
                    })
                    .collect();
                lines.push(format!("- parameters: {}", params.join(", ")));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }

    fn planning_prompt(&self, dataset: &WellDataset, ctx: &AgentContext, question: &str) -> String {
        let matched: Vec<String> = self
            .skills
            .match_keywords(question, Some(self.skill_packs.as_slice()))
            .into_iter()
            .map(|t| t.name)
            .collect();
        let recommendation = if matched.is_empty() {
            "No specific tool matched; decide based on the question.".to_string()
        } else {
            format!("Matched tools detected: {matched:?}. Prefer using them!")
        };

        format!(
            "Analyze the following well log interval:\n{data}\n\n\
             Question: {question}\n\n\
             ## Discussion so far\n{history}\n\n\
             ## Available tools\n{tools}\n\n\
             ## Rules\n\
             1. If a tool is marked ⭐recommended, use it first.\n\
             2. If the question is outside your domain, escalate.\n\
             {recommendation}\n\n\
             ## Output (strict JSON, one of)\n\
             A (use a tool): {{\"action\": \"tool_use\", \"tool_name\": \"...\", \"parameters\": {{}}}}\n\
             B (answer directly): {{\"action\": \"final_answer\", \"confidence\": 0.0, \"reasoning\": \"...\"}}\n\
             C (escalate): {{\"action\": \"escalate\", \"reason\": \"...\", \"suggested_experts\": [\"ExpertKey\"]}}",
            data = dataset.summary(),
            history = ctx.history,
            tools = self.tools_prompt(question),
        )
    }

    fn synthesis_prompt(&self, question: &str, tool_name: &str, observation: &Value) -> String {
        format!(
            "You asked for tool `{tool_name}`; its output follows.\n\n\
             ## Tool output\n{observation}\n\n\
             Question: {question}\n\n\
             Produce your final assessment as strict JSON with at least\n\
             {{\"confidence\": 0.0-1.0, \"reasoning\": \"...\"}} plus any domain fields."
        )
    }
}

#[async_trait]
impl Agent for SpecialistAgent {
    fn key(&self) -> &str {
        &self.key
    }

    fn skill_packs(&self) -> &[String] {
        &self.skill_packs
    }

    async fn analyze(&self, dataset: Arc<WellDataset>, ctx: &AgentContext) -> AgentResult {
        let question = ctx
            .question
            .clone()
            .unwrap_or_else(|| format!("General analysis by {}", self.display_name));

        // Phase 1: plan.
        let prompt = self.planning_prompt(&dataset, ctx, &question);
        let text = match traced_chat(
            &self.reasoner,
            ctx.trace.as_ref(),
            &self.key,
            &self.role_prompt,
            &prompt,
        )
        .await
        {
            Ok(text) => text,
            Err(e) => return AgentResult::degraded(format!("Reasoning call failed: {e}")),
        };

        let Some(value) = extract_json(&text) else {
            return AgentResult::degraded(format!("Format error in planning stage: {text}"));
        };
        let action = match serde_json::from_value::<AgentAction>(value.clone()) {
            Ok(action) => action,
            // An object without a recognized action is taken as a direct answer.
            Err(_) => match value {
                Value::Object(fields) if fields.contains_key("action") => {
                    return AgentResult::degraded(format!(
                        "Unrecognized planning action: {}",
                        fields["action"]
                    ));
                }
                Value::Object(fields) => AgentAction::FinalAnswer { fields },
                _ => return AgentResult::degraded("Planning output is not a JSON object"),
            },
        };

        match action {
            AgentAction::Escalate {
                reason,
                suggested_experts,
            } => {
                info!(agent = %self.key, "escalating");
                let mut result = AgentResult {
                    confidence: 0.0,
                    reasoning: reason,
                    status: Some("escalate".to_string()),
                    fields: serde_json::Map::new(),
                };
                result
                    .fields
                    .insert("suggested_experts".into(), json!(suggested_experts));
                result
            }

            AgentAction::FinalAnswer { fields } => AgentResult::from_fields(fields),

            AgentAction::ToolUse {
                tool_name,
                parameters,
            } => {
                if let Some(trace) = &ctx.trace {
                    trace.lock().log_skill(&tool_name);
                }
                // Phase 2: act, observe, finalize. A failed tool is an
                // observation, not a fault.
                let observation = match self.skills.execute(
                    &tool_name,
                    parameters,
                    Some(dataset.clone()),
                ) {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(agent = %self.key, tool = %tool_name, error = %e, "tool failed");
                        json!({ "error": e.to_string() })
                    }
                };

                let prompt = self.synthesis_prompt(&question, &tool_name, &observation);
                let text = match traced_chat(
                    &self.reasoner,
                    ctx.trace.as_ref(),
                    &self.key,
                    &self.role_prompt,
                    &prompt,
                )
                .await
                {
                    Ok(text) => text,
                    Err(e) => return AgentResult::degraded(format!("Reasoning call failed: {e}")),
                };

                let Some(Value::Object(fields)) = extract_json(&text) else {
                    return AgentResult::degraded(format!(
                        "Format error in synthesis stage: {text}"
                    ));
                };
                let mut result = AgentResult::from_fields(fields);
                result.fields.insert("tool_used".into(), json!(tool_name));
                result
            }
        }
    }
}
