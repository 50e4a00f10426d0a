//! Startup-time registration table for executable tool functions.
//!
//! The original system resolved `module:function` locators by loading code
//! from the pack directory at call time. Here every executable is registered
//! into a typed table at startup and the locator is only a lookup key, which
//! keeps the manifests' pluggability without runtime code loading. Locator
//! resolution preserves the manifest convention: the `scripts/` namespace is
//! tried first, then the pack root for legacy packs.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::{Map, Value};

use crate::dataset::WellDataset;

/// Invocation context handed to a tool function: the caller's parameters
/// merged with the implicitly injected dataset.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Parameters supplied by the calling agent.
    pub params: Map<String, Value>,
    /// The dataset of the current run, when one is in scope.
    pub dataset: Option<Arc<WellDataset>>,
}

impl ToolContext {
    /// String parameter by name.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }

    /// Numeric parameter by name. Accepts numbers or numeric strings.
    pub fn param_f64(&self, name: &str) -> Option<f64> {
        match self.params.get(name) {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// An executable tool body. Failures are plain errors; the registry wraps
/// them into typed results.
pub type ToolFn = Arc<dyn Fn(&ToolContext) -> anyhow::Result<Value> + Send + Sync>;

/// Resolution keys a locator expands to, in priority order.
///
/// `entry_point` is `module:function`; a bare `module` implies function
/// `execute`. The pack's `scripts/` namespace wins over the legacy root.
pub fn locator_candidates(pack_id: &str, entry_point: &str) -> Vec<String> {
    let (module, function) = match entry_point.split_once(':') {
        Some((m, f)) => (m, f),
        None => (entry_point, "execute"),
    };
    vec![
        format!("{pack_id}/scripts/{module}:{function}"),
        format!("{pack_id}/{module}:{function}"),
    ]
}

/// Concurrent table mapping resolved locators to tool functions.
#[derive(Default)]
pub struct ExecutorTable {
    entries: DashMap<String, ToolFn>,
}

impl ExecutorTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a function under a fully resolved locator, e.g.
    /// `"lithology-classification/scripts/quantitative:calculate_vsh"`.
    pub fn register<F>(&self, locator: impl Into<String>, f: F)
    where
        F: Fn(&ToolContext) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries.insert(locator.into(), Arc::new(f));
    }

    /// Resolve a manifest entry point for a pack, trying the `scripts/`
    /// namespace before the legacy pack root.
    pub fn resolve(&self, pack_id: &str, entry_point: &str) -> Option<ToolFn> {
        locator_candidates(pack_id, entry_point)
            .iter()
            .find_map(|key| self.entries.get(key).map(|e| e.value().clone()))
    }

    /// Number of registered functions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for ExecutorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_locator_candidates_default_function() {
        assert_eq!(
            locator_candidates("statistics", "find_extremes"),
            vec![
                "statistics/scripts/find_extremes:execute",
                "statistics/find_extremes:execute"
            ]
        );
    }

    #[test]
    fn test_resolve_prefers_scripts_namespace() {
        let table = ExecutorTable::new();
        table.register("pack/scripts/mod:run", |_| Ok(json!("scripts")));
        table.register("pack/mod:run", |_| Ok(json!("root")));

        let f = table.resolve("pack", "mod:run").unwrap();
        assert_eq!(f(&ToolContext::default()).unwrap(), json!("scripts"));
    }

    #[test]
    fn test_resolve_falls_back_to_pack_root() {
        let table = ExecutorTable::new();
        table.register("pack/mod:run", |_| Ok(json!("root")));

        let f = table.resolve("pack", "mod:run").unwrap();
        assert_eq!(f(&ToolContext::default()).unwrap(), json!("root"));
        assert!(table.resolve("pack", "missing:run").is_none());
    }

    #[test]
    fn test_param_f64_accepts_numeric_strings() {
        let mut params = Map::new();
        params.insert("gr_max".into(), json!("140"));
        params.insert("gr_min".into(), json!(20.0));
        let ctx = ToolContext {
            params,
            dataset: None,
        };
        assert_eq!(ctx.param_f64("gr_max"), Some(140.0));
        assert_eq!(ctx.param_f64("gr_min"), Some(20.0));
        assert_eq!(ctx.param_f64("absent"), None);
    }
}
