//! Skill-pack manifest model.
//!
//! A skill pack is one directory under the skills root. It declares its
//! tools either in a `tools.yaml` manifest (preferred) or, for legacy
//! single-tool packs, in a `skill.json` file whose top level *is* the tool
//! definition. Directories with neither file are knowledge-only packs and
//! carry no executable tools.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Preferred manifest file name.
pub const MANIFEST_FILE: &str = "tools.yaml";
/// Legacy single-tool metadata file name.
pub const LEGACY_FILE: &str = "skill.json";

/// A named, independently invocable unit of domain logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Unique tool name within the registry.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// Keywords that trigger this tool in keyword matching.
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    /// JSON schema for the tool's parameters.
    #[serde(default)]
    pub parameters: Value,
    /// Display text describing when to reach for the tool.
    #[serde(default)]
    pub use_cases: Option<String>,
    /// `module:function` locator resolved against the pack's `scripts/`
    /// namespace, with a legacy pack-root fallback. A locator without `:`
    /// implies function `execute`.
    #[serde(default)]
    pub entry_point: Option<String>,
    /// Owning skill pack id. Stamped at load time.
    #[serde(default)]
    pub skill_pack: String,
    /// Directory the pack was loaded from. Stamped at load time.
    #[serde(default)]
    pub directory: PathBuf,
}

/// On-disk shape of `tools.yaml`.
#[derive(Debug, Deserialize)]
struct PackManifest {
    /// Explicit pack id; falls back to `name`, then the directory name.
    #[serde(default)]
    skill_pack: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    tools: Vec<ToolDescriptor>,
}

/// A loaded skill pack: the unit of installation and agent assignment.
#[derive(Debug, Clone, Serialize)]
pub struct SkillPack {
    /// Pack id.
    pub id: String,
    /// Directory the pack was loaded from.
    pub directory: PathBuf,
    /// Tools declared by the pack.
    pub tools: Vec<ToolDescriptor>,
}

/// Load one skill pack from its directory.
///
/// Returns `Ok(None)` for knowledge-only directories. Parse failures are
/// `Err` so the caller can log and skip the pack without aborting the scan.
pub fn load_pack(dir: &Path) -> Result<Option<SkillPack>, ConfigError> {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let manifest_path = dir.join(MANIFEST_FILE);
    if manifest_path.exists() {
        let raw = read(&manifest_path)?;
        let manifest: PackManifest =
            serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: manifest_path.display().to_string(),
                message: e.to_string(),
            })?;
        let id = manifest
            .skill_pack
            .or(manifest.name)
            .unwrap_or(dir_name);
        let tools = manifest
            .tools
            .into_iter()
            .map(|t| stamp(t, &id, dir))
            .collect();
        return Ok(Some(SkillPack {
            id,
            directory: dir.to_path_buf(),
            tools,
        }));
    }

    let legacy_path = dir.join(LEGACY_FILE);
    if legacy_path.exists() {
        let raw = read(&legacy_path)?;
        let tool: ToolDescriptor =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
                path: legacy_path.display().to_string(),
                message: e.to_string(),
            })?;
        if tool.entry_point.is_none() {
            return Err(ConfigError::MissingField {
                path: legacy_path.display().to_string(),
                field: "entry_point".to_string(),
            });
        }
        let id = if tool.name.is_empty() {
            dir_name
        } else {
            tool.name.clone()
        };
        let tool = stamp(tool, &id, dir);
        return Ok(Some(SkillPack {
            id,
            directory: dir.to_path_buf(),
            tools: vec![tool],
        }));
    }

    Ok(None)
}

fn stamp(mut tool: ToolDescriptor, pack_id: &str, dir: &Path) -> ToolDescriptor {
    tool.skill_pack = pack_id.to_string();
    tool.directory = dir.to_path_buf();
    tool
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}
