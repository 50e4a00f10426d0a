//! Skill registry: discovery, indexing, keyword matching, and execution.
//!
//! The registry scans a configured root (one directory per skill pack),
//! builds an immutable [`SkillIndex`], and swaps it atomically on
//! [`SkillRegistry::reload`]: readers always observe either the fully
//! pre-reload or fully post-reload index, never a mix. A malformed pack is
//! logged and skipped, never aborts the scan.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{error, info, warn};

use super::builtin::register_builtins;
use super::executor::{ExecutorTable, ToolContext};
use super::manifest::{load_pack, SkillPack, ToolDescriptor};
use crate::dataset::WellDataset;
use crate::error::SkillError;

/// One consistent generation of the registry's contents.
#[derive(Debug, Default)]
pub struct SkillIndex {
    /// Pack id → pack.
    pub packs: HashMap<String, SkillPack>,
    /// Tool name → descriptor.
    pub tools: HashMap<String, ToolDescriptor>,
}

/// Process-wide, read-mostly registry of skill packs and tools.
pub struct SkillRegistry {
    root: PathBuf,
    index: RwLock<Arc<SkillIndex>>,
    executors: ExecutorTable,
}

impl SkillRegistry {
    /// Create a registry rooted at `root` with the built-in executor table,
    /// and perform an initial scan.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let executors = ExecutorTable::new();
        register_builtins(&executors);
        Self::with_executors(root, executors)
    }

    /// Create a registry with a caller-provided executor table, and perform
    /// an initial scan.
    pub fn with_executors(root: impl Into<PathBuf>, executors: ExecutorTable) -> Self {
        let registry = Self {
            root: root.into(),
            index: RwLock::new(Arc::new(SkillIndex::default())),
            executors,
        };
        registry.reload();
        registry
    }

    /// The scan root.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// The executor registration table.
    pub fn executors(&self) -> &ExecutorTable {
        &self.executors
    }

    /// Rescan the root and swap in a fresh index.
    pub fn reload(&self) {
        let next = Arc::new(self.build_index());
        info!(
            root = %self.root.display(),
            packs = next.packs.len(),
            tools = next.tools.len(),
            "skill registry reloaded"
        );
        *self.index.write() = next;
    }

    fn build_index(&self) -> SkillIndex {
        let mut index = SkillIndex::default();

        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "skills root not readable");
                return index;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            match load_pack(&dir) {
                Ok(Some(pack)) => {
                    for tool in &pack.tools {
                        info!(tool = %tool.name, pack = %pack.id, "loaded tool");
                        index.tools.insert(tool.name.clone(), tool.clone());
                    }
                    index.packs.insert(pack.id.clone(), pack);
                }
                Ok(None) => {}
                Err(e) => {
                    error!(pack_dir = %dir.display(), error = %e, "skipping malformed skill pack");
                }
            }
        }

        index
    }

    /// Current index generation. The returned snapshot stays consistent
    /// across a concurrent reload.
    pub fn snapshot(&self) -> Arc<SkillIndex> {
        self.index.read().clone()
    }

    /// All registered tools.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.snapshot().tools.values().cloned().collect()
    }

    /// All loaded skill packs.
    pub fn list_packs(&self) -> Vec<SkillPack> {
        self.snapshot().packs.values().cloned().collect()
    }

    /// Tools reachable from the given pack ids. Unknown ids are silently
    /// skipped.
    pub fn list_for(&self, pack_ids: &[String]) -> Vec<ToolDescriptor> {
        let index = self.snapshot();
        let mut tools = Vec::new();
        for id in pack_ids {
            if let Some(pack) = index.packs.get(id) {
                tools.extend(pack.tools.iter().cloned());
            }
        }
        tools
    }

    /// Tools whose trigger keywords appear in `query`, case-insensitively,
    /// as a substring anywhere in the text. Restricted to `pack_ids` when
    /// given.
    pub fn match_keywords(&self, query: &str, pack_ids: Option<&[String]>) -> Vec<ToolDescriptor> {
        let candidates = match pack_ids {
            Some(ids) => self.list_for(ids),
            None => self.list_tools(),
        };

        let query_lower = query.to_lowercase();
        let matched: Vec<ToolDescriptor> = candidates
            .into_iter()
            .filter(|tool| {
                tool.trigger_keywords
                    .iter()
                    .any(|kw| query_lower.contains(&kw.to_lowercase()))
            })
            .collect();
        if !matched.is_empty() {
            info!(
                count = matched.len(),
                tools = ?matched.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
                "keyword match"
            );
        }
        matched
    }

    /// Execute a tool by name with the given parameters and the implicitly
    /// injected dataset. All failure modes come back as [`SkillError`];
    /// nothing propagates past the registry as a crash.
    pub fn execute(
        &self,
        name: &str,
        params: Map<String, Value>,
        dataset: Option<Arc<WellDataset>>,
    ) -> Result<Value, SkillError> {
        let index = self.snapshot();
        let tool = index
            .tools
            .get(name)
            .ok_or_else(|| SkillError::NotFound(name.to_string()))?;

        let locator = tool.entry_point.as_deref().ok_or_else(|| SkillError::Load {
            tool: name.to_string(),
            locator: "<none>".to_string(),
        })?;
        let func = self
            .executors
            .resolve(&tool.skill_pack, locator)
            .ok_or_else(|| SkillError::Load {
                tool: name.to_string(),
                locator: locator.to_string(),
            })?;

        let ctx = ToolContext { params, dataset };
        func(&ctx).map_err(|e| {
            error!(tool = name, error = %e, "tool execution failed");
            SkillError::Execution {
                tool: name.to_string(),
                message: e.to_string(),
            }
        })
    }
}

impl std::fmt::Debug for SkillRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let index = self.snapshot();
        f.debug_struct("SkillRegistry")
            .field("root", &self.root)
            .field("packs", &index.packs.len())
            .field("tools", &index.tools.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn write_manifest(root: &TempDir, dir: &str, content: &str) {
        let pack_dir = root.path().join(dir);
        fs::create_dir_all(&pack_dir).unwrap();
        fs::write(pack_dir.join("tools.yaml"), content).unwrap();
    }

    fn lithology_manifest() -> &'static str {
        r#"
skill_pack: lithology-classification
tools:
  - name: calc_vsh
    description: Shale volume from gamma ray
    trigger_keywords: ["Vsh", "泥质含量"]
    entry_point: "quantitative:calculate_vsh"
  - name: analyze_crossplot
    description: Density-neutron crossplot
    trigger_keywords: ["交会", "crossplot"]
    entry_point: "crossplot:analyze"
"#
    }

    fn registry_with_lithology() -> (TempDir, SkillRegistry) {
        let root = TempDir::new().unwrap();
        write_manifest(&root, "lithology-classification", lithology_manifest());
        let registry = SkillRegistry::new(root.path());
        (root, registry)
    }

    #[test]
    fn test_scan_indexes_tools_by_name() {
        let (_root, registry) = registry_with_lithology();
        assert_eq!(registry.list_tools().len(), 2);
        assert_eq!(registry.list_packs().len(), 1);
    }

    #[test]
    fn test_malformed_pack_is_skipped_not_fatal() {
        let root = TempDir::new().unwrap();
        write_manifest(&root, "lithology-classification", lithology_manifest());
        write_manifest(&root, "broken", "tools: [not { closed");
        let registry = SkillRegistry::new(root.path());
        assert_eq!(registry.list_packs().len(), 1);
        assert_eq!(registry.list_tools().len(), 2);
    }

    #[test]
    fn test_missing_root_yields_empty_index() {
        let registry = SkillRegistry::new("/nonexistent/skills/root");
        assert!(registry.list_tools().is_empty());
    }

    #[test]
    fn test_list_for_skips_unknown_pack_ids() {
        let (_root, registry) = registry_with_lithology();
        let tools = registry.list_for(&[
            "lithology-classification".to_string(),
            "no-such-pack".to_string(),
        ]);
        assert_eq!(tools.len(), 2);
        assert!(registry.list_for(&["no-such-pack".to_string()]).is_empty());
    }

    #[test]
    fn test_match_is_case_insensitive_substring() {
        let (_root, registry) = registry_with_lithology();
        let packs = vec!["lithology-classification".to_string()];

        // Keyword "Vsh" embedded in a CJK query.
        let matched = registry.match_keywords("请计算vSH数值", Some(packs.as_slice()));
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "calc_vsh");

        assert!(registry.match_keywords("分析孔隙度", Some(packs.as_slice())).is_empty());
    }

    #[test]
    fn test_match_scenario_vsh_agent_pack() {
        // Scenario: a pack exposes calc_vsh with keyword "Vsh"; an agent
        // granted that pack and queried with "请计算Vsh" sees calc_vsh.
        let (_root, registry) = registry_with_lithology();
        let packs = vec!["lithology-classification".to_string()];
        let matched = registry.match_keywords("请计算Vsh", Some(packs.as_slice()));
        assert!(matched.iter().any(|t| t.name == "calc_vsh"));
    }

    #[test]
    fn test_execute_not_found_and_load_errors() {
        let (_root, registry) = registry_with_lithology();
        assert!(matches!(
            registry.execute("missing_tool", Map::new(), None),
            Err(SkillError::NotFound(_))
        ));
        // analyze_crossplot has no registered executable.
        assert!(matches!(
            registry.execute("analyze_crossplot", Map::new(), None),
            Err(SkillError::Load { .. })
        ));
    }

    #[test]
    fn test_execute_wraps_tool_failure() {
        let (_root, registry) = registry_with_lithology();
        // No dataset in scope, so the builtin fails inside its body.
        let err = registry.execute("calc_vsh", Map::new(), None).unwrap_err();
        assert!(matches!(err, SkillError::Execution { .. }));
    }

    #[test]
    fn test_execute_injects_dataset() {
        let (_root, registry) = registry_with_lithology();
        let mut ds = WellDataset::new();
        ds.insert_curve("GR", vec![Some(20.0), Some(140.0)]);
        let out = registry
            .execute("calc_vsh", Map::new(), Some(Arc::new(ds)))
            .unwrap();
        assert_eq!(out["samples"], json!(2));
    }

    #[test]
    fn test_reload_is_idempotent_set_equal() {
        let (_root, registry) = registry_with_lithology();
        let before: BTreeMap<String, Vec<String>> = registry
            .list_tools()
            .into_iter()
            .map(|t| (t.name, t.trigger_keywords))
            .collect();
        registry.reload();
        registry.reload();
        let after: BTreeMap<String, Vec<String>> = registry
            .list_tools()
            .into_iter()
            .map(|t| (t.name, t.trigger_keywords))
            .collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_snapshot_is_stable_across_reload() {
        let (root, registry) = registry_with_lithology();
        let snapshot = registry.snapshot();

        // Replace the pack on disk, then reload.
        write_manifest(
            &root,
            "lithology-classification",
            r#"
skill_pack: lithology-classification
tools:
  - name: renamed_tool
    trigger_keywords: ["other"]
"#,
        );
        registry.reload();

        // Old snapshot still shows the old generation in full.
        assert!(snapshot.tools.contains_key("calc_vsh"));
        assert!(!snapshot.tools.contains_key("renamed_tool"));
        // New reads see the new generation in full.
        let fresh = registry.snapshot();
        assert!(fresh.tools.contains_key("renamed_tool"));
        assert!(!fresh.tools.contains_key("calc_vsh"));
    }

    #[test]
    fn test_descriptor_directory_matches_declared_pack() {
        // Every descriptor must point at its own pack's directory, even
        // while reloads are happening.
        let root = TempDir::new().unwrap();
        write_manifest(&root, "pack-a", "skill_pack: pack-a\ntools:\n  - name: tool_a\n");
        write_manifest(&root, "pack-b", "skill_pack: pack-b\ntools:\n  - name: tool_b\n");
        let registry = SkillRegistry::new(root.path());

        for _ in 0..10 {
            registry.reload();
            let index = registry.snapshot();
            for (name, tool) in &index.tools {
                let pack = index.packs.get(&tool.skill_pack).unwrap();
                assert_eq!(tool.directory, pack.directory, "tool {name}");
            }
        }
    }
}
