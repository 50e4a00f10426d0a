//! First-responder routing.
//!
//! A pure function of the discussion history and the keyword table: the
//! most recent user-authored entry is scanned against an ordered precedence
//! list of agent keys, and the first keyword hit wins. Logging the decision
//! is the only side effect.

use tracing::info;

/// Precedence-ordered routing table.
#[derive(Debug, Clone)]
pub struct RouterTable {
    /// (agent key, routing keywords) in precedence order.
    pub precedence: Vec<(String, Vec<String>)>,
    /// Key returned when no user entry exists or nothing matches.
    pub default_key: String,
}

/// Prefixes that mark a user-authored history entry.
const USER_PREFIXES: [&str; 2] = ["User Note:", "User Follow-up:"];

/// Pick the first dispatch target from the history.
pub fn decide(history: &[String], table: &RouterTable) -> String {
    // Most recent user-authored entry, falling back to the first entry.
    let query = history
        .iter()
        .rev()
        .find_map(|entry| {
            USER_PREFIXES
                .iter()
                .find(|p| entry.starts_with(*p))
                .and_then(|_| entry.split_once(':'))
                .map(|(_, rest)| rest.trim().to_string())
        })
        .or_else(|| history.first().cloned())
        .unwrap_or_default();
    let query_lower = query.to_lowercase();

    for (key, keywords) in &table.precedence {
        if keywords
            .iter()
            .any(|kw| query_lower.contains(&kw.to_lowercase()))
        {
            info!(target_agent = %key, "router decision");
            return key.clone();
        }
    }

    info!(target_agent = %table.default_key, "router decision (default)");
    table.default_key.clone()
}
