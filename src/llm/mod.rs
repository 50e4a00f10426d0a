//! Black-box reasoning call abstraction.
//!
//! The engine never depends on how a reasoning call is computed (provider,
//! model, prompt wording), only on the [`ReasoningService`] contract and on
//! how its result feeds back into the state machine. [`ScriptedReasoner`]
//! provides canned replies for tests and offline runs.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// A completed reasoning call: raw text plus usage accounting.
#[derive(Debug, Clone)]
pub struct ReasoningReply {
    /// Raw model output. Treated as untrusted text by every caller.
    pub content: String,
    /// Prompt-side token count reported by the provider.
    pub prompt_tokens: u32,
    /// Completion-side token count reported by the provider.
    pub completion_tokens: u32,
    /// Model identifier, for trace records.
    pub model: String,
}

/// A failed reasoning call.
#[derive(Debug, Error)]
#[error("reasoning call failed: {0}")]
pub struct ReasoningError(pub String);

/// Contract every reasoning backend implements.
///
/// Calls are blocking from the workflow's perspective: the state machine
/// does not advance until `chat` returns or fails.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Run a single reasoning call with the given system prompt and user
    /// prompt.
    async fn chat(&self, system_prompt: &str, prompt: &str)
        -> Result<ReasoningReply, ReasoningError>;

    /// Model identifier, for trace records.
    fn model(&self) -> &str {
        "unknown"
    }
}

/// A reasoning service that replays a fixed queue of replies.
///
/// Each `chat` call pops the next reply; an exhausted queue is an error,
/// which exercises the degraded-result paths in agents.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    replies: Mutex<VecDeque<String>>,
}

impl ScriptedReasoner {
    /// Create a reasoner with an initial reply queue.
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(Into::into).collect()),
        }
    }

    /// Append a reply to the queue.
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies.lock().push_back(reply.into());
    }

    /// Number of replies still queued.
    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn chat(
        &self,
        _system_prompt: &str,
        prompt: &str,
    ) -> Result<ReasoningReply, ReasoningError> {
        let next = self.replies.lock().pop_front();
        match next {
            Some(content) => Ok(ReasoningReply {
                // Rough usage estimate; good enough for trace assertions.
                prompt_tokens: (prompt.len() / 4) as u32,
                completion_tokens: (content.len() / 4) as u32,
                model: self.model().to_string(),
                content,
            }),
            None => Err(ReasoningError("scripted reply queue exhausted".into())),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
