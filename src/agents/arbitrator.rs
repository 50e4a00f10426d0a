//! Arbitrator agent and the closed verdict schema.
//!
//! The arbitrator reviews the full sanitized discussion and returns a
//! continue-or-final verdict. Its reasoning output is untrusted text: every
//! field is validated and normalized before anything downstream may read it,
//! and the tagged [`Verdict`] makes a FINAL without a decision
//! unrepresentable.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use super::base::{coerce_f64, extract_json, traced_chat, Agent, AgentContext, AgentResult};
use super::registry::AgentSpec;
use crate::dataset::WellDataset;
use crate::llm::ReasoningService;

/// Status value marking a final verdict.
pub const STATUS_FINAL: &str = "FINAL";
/// Status value marking a continue verdict.
pub const STATUS_CONTINUE: &str = "CONTINUE";

/// Validated control signal extracted from an arbitrator result.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The discussion is complete.
    Final { decision: String },
    /// Keep going, optionally dispatching a named specialist with a
    /// directed question.
    Continue {
        next_agent: Option<String>,
        question: Option<String>,
    },
}

impl Verdict {
    /// Read the verdict out of a normalized arbitrator result. Anything
    /// that is not an explicit, well-formed FINAL is a continue.
    pub fn from_result(result: &AgentResult) -> Self {
        if result.status.as_deref() == Some(STATUS_FINAL) {
            if let Some(decision) = result.field_str("decision") {
                return Verdict::Final {
                    decision: decision.to_string(),
                };
            }
        }
        Verdict::Continue {
            next_agent: result.field_str("next_agent").map(str::to_string),
            question: result.field_str("question_for_agent").map(str::to_string),
        }
    }
}

/// The distinguished agent that coordinates specialists and decides
/// continuation or termination.
pub struct ArbitratorAgent {
    key: String,
    role_prompt: String,
    reasoner: Arc<dyn ReasoningService>,
}

impl ArbitratorAgent {
    /// Build the arbitrator from its roster entry.
    pub fn from_spec(spec: &AgentSpec, reasoner: Arc<dyn ReasoningService>) -> Self {
        Self {
            key: spec.key.clone(),
            role_prompt: spec.role_prompt.clone(),
            reasoner,
        }
    }

    fn prompt(&self, ctx: &AgentContext) -> String {
        let team = ctx
            .team_overview
            .as_deref()
            .unwrap_or("(no specialist roster provided)");
        format!(
            "## Your team\n{team}\n\n\
             ## Discussion so far\n{history}\n\n\
             ## Your task\n\
             1. Review all specialist findings above.\n\
             2. Decide whether key information is still missing.\n\
             3. If a specialist's tools match the open question, dispatch that specialist.\n\
             4. If the information is sufficient, give the final conclusion.\n\n\
             ## Output (strict JSON only)\n\
             {{\n\
               \"status\": \"FINAL\" | \"NEED_MORE_INFO\",\n\
               \"next_agent\": \"AgentKey or null\",\n\
               \"question_for_agent\": \"question or null\",\n\
               \"decision\": \"final conclusion (only when FINAL)\",\n\
               \"confidence\": 0.0,\n\
               \"reasoning\": \"...\"\n\
             }}",
            history = ctx.history,
        )
    }

    /// Normalize an untrusted verdict object field by field.
    fn normalize(&self, value: Value) -> AgentResult {
        let Value::Object(mut fields) = value else {
            return AgentResult::degraded("Arbitrator output is not a JSON object");
        };

        let raw_status = fields
            .remove("status")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let mut status = match raw_status.as_str() {
            STATUS_FINAL => STATUS_FINAL,
            STATUS_CONTINUE | "NEED_MORE_INFO" | "DISCUSSION" => STATUS_CONTINUE,
            other => {
                warn!(agent = %self.key, status = other, "unknown arbitrator status, continuing");
                STATUS_CONTINUE
            }
        };

        let confidence = fields
            .remove("confidence")
            .and_then(|v| coerce_f64(&v))
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);
        let reasoning = fields
            .remove("reasoning")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();

        let decision = fields
            .remove("decision")
            .and_then(|v| v.as_str().map(str::to_string))
            .filter(|s| !s.is_empty());
        if status == STATUS_FINAL && decision.is_none() {
            warn!(agent = %self.key, "FINAL verdict without decision, downgrading to CONTINUE");
            status = STATUS_CONTINUE;
        }

        let mut out = serde_json::Map::new();
        if let Some(decision) = decision {
            out.insert("decision".into(), Value::String(decision));
        }
        for key in ["next_agent", "question_for_agent"] {
            if let Some(v) = fields.remove(key).and_then(|v| match v {
                Value::String(s) if !s.is_empty() && s != "null" => Some(s),
                _ => None,
            }) {
                out.insert(key.into(), Value::String(v));
            }
        }

        AgentResult {
            confidence,
            reasoning,
            status: Some(status.to_string()),
            fields: out,
        }
    }
}

#[async_trait]
impl Agent for ArbitratorAgent {
    fn key(&self) -> &str {
        &self.key
    }

    async fn analyze(&self, _dataset: Arc<WellDataset>, ctx: &AgentContext) -> AgentResult {
        let prompt = self.prompt(ctx);
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

        match extract_json(&text) {
            Some(value) => self.normalize(value),
            None => AgentResult::degraded(format!("Failed to parse arbitrator output: {text}")),
        }
    }
}
