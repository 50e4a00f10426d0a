//! Agent contract and shared result handling.
//!
//! Every reasoning unit implements [`Agent`] with a single `analyze`
//! operation. `analyze` is infallible by signature: malformed reasoning
//! output, failed calls, and failed tools all degrade into a typed
//! [`AgentResult`] with confidence 0 and an explanatory note.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dataset::WellDataset;
use crate::llm::{ReasoningError, ReasoningService};
use crate::trace::{ReasoningCallLog, TraceHandle};

/// Context handed to an agent for one `analyze` call.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    /// Full sanitized discussion history.
    pub history: String,
    /// Directed question from the arbitrator, if this is a dispatch.
    pub question: Option<String>,
    /// Specialist team overview, provided to the arbitrator only.
    pub team_overview: Option<String>,
    /// Trace handle of the owning run.
    pub trace: Option<TraceHandle>,
}

/// Structured outcome of one agent analysis.
///
/// `confidence` and `reasoning` are the required contract; domain-specific
/// fields (lithology, next_agent, decision...) travel in `fields`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Free-text reasoning.
    pub reasoning: String,
    /// Optional status marker (`FINAL`, `CONTINUE`, `escalate`, `ERROR`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Domain-specific fields.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl AgentResult {
    /// A confidence-0 result carrying an explanatory note. Used for every
    /// recoverable failure inside an agent.
    pub fn degraded(reasoning: impl Into<String>) -> Self {
        Self {
            confidence: 0.0,
            reasoning: reasoning.into(),
            status: Some("ERROR".to_string()),
            fields: Map::new(),
        }
    }

    /// Build a result from an untyped field map, leniently: missing
    /// confidence becomes 0, out-of-range values are clamped, and a missing
    /// reasoning falls back to the serialized fields.
    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        let confidence = fields
            .remove("confidence")
            .and_then(|v| coerce_f64(&v))
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let reasoning = match fields.remove("reasoning") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => Value::Object(fields.clone()).to_string(),
        };
        let status = match fields.remove("status") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        Self {
            confidence,
            reasoning,
            status,
            fields,
        }
    }

    /// A domain field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// A domain field as a non-empty string.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// Coerce a JSON value into `f64`, accepting numbers and numeric strings.
pub(crate) fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Closed schema for a planning-phase reasoning output.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AgentAction {
    /// Invoke a registry tool, then synthesize from its output.
    ToolUse {
        tool_name: String,
        #[serde(default)]
        parameters: Map<String, Value>,
    },
    /// Answer directly with the given fields.
    FinalAnswer {
        #[serde(flatten)]
        fields: Map<String, Value>,
    },
    /// The question is outside this agent's domain.
    Escalate {
        reason: String,
        #[serde(default)]
        suggested_experts: Vec<String>,
    },
}

/// Uniform contract every reasoning unit implements.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable key this agent is registered under.
    fn key(&self) -> &str;

    /// Skill packs this agent may reach through the registry.
    fn skill_packs(&self) -> &[String] {
        &[]
    }

    /// Analyze the dataset in the given discussion context. Never fails:
    /// degraded knowledge yields a confidence-0 result.
    async fn analyze(&self, dataset: Arc<WellDataset>, ctx: &AgentContext) -> AgentResult;
}

/// Extract a JSON object from raw reasoning text.
///
/// Strips code fences first; falls back to the outermost brace span. Returns
/// `None` when no object can be recovered.
pub fn extract_json(text: &str) -> Option<Value> {
    let cleaned = text.replace("```json", "").replace("```", "");
    if let Ok(value) = serde_json::from_str::<Value>(cleaned.trim()) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&text[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Run one reasoning call, recording usage and duration into the trace.
pub(crate) async fn traced_chat(
    reasoner: &Arc<dyn ReasoningService>,
    trace: Option<&TraceHandle>,
    agent: &str,
    system_prompt: &str,
    prompt: &str,
) -> Result<String, ReasoningError> {
    let started = Instant::now();
    let reply = reasoner.chat(system_prompt, prompt).await?;
    if let Some(trace) = trace {
        trace.lock().log_reasoning_call(ReasoningCallLog {
            agent: agent.to_string(),
            model: reply.model.clone(),
            prompt_tokens: reply.prompt_tokens,
            completion_tokens: reply.completion_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: chrono::Utc::now(),
        });
    }
    Ok(reply.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_json_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"action\": \"final_answer\", \"confidence\": 0.8}\n```";
        let value = extract_json(text).unwrap();
        assert_eq!(value["confidence"], json!(0.8));
    }

    #[test]
    fn test_extract_json_from_surrounding_prose() {
        let text = "I think the answer is {\"confidence\": 0.5, \"reasoning\": \"ok\"} overall.";
        let value = extract_json(text).unwrap();
        assert_eq!(value["reasoning"], json!("ok"));
    }

    #[test]
    fn test_extract_json_rejects_non_objects() {
        assert!(extract_json("no json here").is_none());
        assert!(extract_json("[1, 2, 3]").is_none());
    }

    #[test]
    fn test_agent_action_tagged_parse() {
        let value = json!({"action": "tool_use", "tool_name": "calc_vsh", "parameters": {"gr_curve": "GR"}});
        let action: AgentAction = serde_json::from_value(value).unwrap();
        assert!(matches!(action, AgentAction::ToolUse { ref tool_name, .. } if tool_name == "calc_vsh"));

        let value = json!({"action": "escalate", "reason": "流体问题"});
        let action: AgentAction = serde_json::from_value(value).unwrap();
        assert!(matches!(action, AgentAction::Escalate { .. }));

        let value = json!({"action": "divine"});
        assert!(serde_json::from_value::<AgentAction>(value).is_err());
    }

    #[test]
    fn test_from_fields_clamps_and_coerces() {
        let mut fields = Map::new();
        fields.insert("confidence".into(), json!("1.7"));
        fields.insert("reasoning".into(), json!("砂岩"));
        fields.insert("lithology".into(), json!("Sandstone"));
        let result = AgentResult::from_fields(fields);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.reasoning, "砂岩");
        assert_eq!(result.field_str("lithology"), Some("Sandstone"));
    }

    #[test]
    fn test_from_fields_missing_confidence_is_zero() {
        let result = AgentResult::from_fields(Map::new());
        assert_eq!(result.confidence, 0.0);
    }
}
