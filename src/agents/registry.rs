//! Agent roster: declarative specs, typed factory table, reloadable table.
//!
//! Agents are declared in a YAML roster (`config/agents.yaml`) and
//! instantiated through an explicit factory table keyed by each entry's
//! `implementation` field, with no runtime code loading. The instantiated
//! roster is an immutable snapshot swapped atomically on reload, shared by
//! every concurrent run. Roster order defines router precedence.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::arbitrator::ArbitratorAgent;
use super::base::Agent;
use super::specialist::SpecialistAgent;
use crate::error::ConfigError;
use crate::llm::ReasoningService;
use crate::skills::SkillRegistry;

/// Factory key for the generic specialist implementation.
pub const IMPL_SPECIALIST: &str = "specialist";
/// Factory key for the arbitrator implementation.
pub const IMPL_ARBITRATOR: &str = "arbitrator";

/// One declarative roster entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Unique agent key.
    pub key: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Short display abbreviation.
    #[serde(default)]
    pub abbr: String,
    /// Display color.
    #[serde(default)]
    pub color: String,
    /// Factory key; defaults to the generic specialist.
    #[serde(default)]
    pub implementation: String,
    /// System prompt describing the agent's role.
    #[serde(default)]
    pub role_prompt: String,
    /// Human-readable responsibility descriptions.
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Routing keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Skill packs this agent may use.
    #[serde(default)]
    pub skill_packs: Vec<String>,
    /// Whether this is the distinguished arbitrator.
    #[serde(default)]
    pub is_arbitrator: bool,
}

/// Frontend projection of an agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentCard {
    pub key: String,
    pub name: String,
    pub abbr: String,
    pub color: String,
}

/// An instantiated roster entry.
#[derive(Clone)]
pub struct RegisteredAgent {
    /// The declarative spec.
    pub spec: AgentSpec,
    /// The live implementation.
    pub agent: Arc<dyn Agent>,
}

/// Constructor for a concrete agent implementation.
pub type AgentFactory = Arc<
    dyn Fn(&AgentSpec, Arc<dyn ReasoningService>, Arc<SkillRegistry>) -> Arc<dyn Agent>
        + Send
        + Sync,
>;

/// One consistent generation of the instantiated roster.
#[derive(Default)]
struct Roster {
    /// Keys in declaration order (router precedence).
    order: Vec<String>,
    agents: HashMap<String, RegisteredAgent>,
    /// Router fallback key.
    default_key: String,
}

/// On-disk shape of `config/agents.yaml`.
#[derive(Debug, Default, Deserialize)]
struct RosterFile {
    #[serde(default)]
    router: RouterSection,
    #[serde(default)]
    agents: Vec<AgentSpec>,
}

#[derive(Debug, Default, Deserialize)]
struct RouterSection {
    #[serde(default)]
    default: Option<String>,
}

/// Process-wide, read-mostly agent registry.
pub struct AgentRegistry {
    factories: DashMap<String, AgentFactory>,
    reasoner: Arc<dyn ReasoningService>,
    skills: Arc<SkillRegistry>,
    roster_path: Option<PathBuf>,
    roster: RwLock<Arc<Roster>>,
}

impl AgentRegistry {
    /// Create an empty registry with the built-in factories registered.
    pub fn new(reasoner: Arc<dyn ReasoningService>, skills: Arc<SkillRegistry>) -> Self {
        let registry = Self {
            factories: DashMap::new(),
            reasoner,
            skills,
            roster_path: None,
            roster: RwLock::new(Arc::new(Roster::default())),
        };
        registry.register_factory(IMPL_SPECIALIST, |spec, reasoner, skills| {
            Arc::new(SpecialistAgent::from_spec(spec, reasoner, skills))
        });
        registry.register_factory(IMPL_ARBITRATOR, |spec, reasoner, _skills| {
            Arc::new(ArbitratorAgent::from_spec(spec, reasoner))
        });
        registry
    }

    /// Register a factory under an implementation key.
    pub fn register_factory<F>(&self, implementation: impl Into<String>, factory: F)
    where
        F: Fn(&AgentSpec, Arc<dyn ReasoningService>, Arc<SkillRegistry>) -> Arc<dyn Agent>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(implementation.into(), Arc::new(factory));
    }

    /// Load the roster from a YAML file and remember the path for
    /// [`AgentRegistry::reload`].
    pub fn load_from_path(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let file: RosterFile = serde_yaml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        self.roster_path = Some(path.to_path_buf());
        self.load_specs(file.agents, file.router.default);
        Ok(())
    }

    /// Load the built-in default roster.
    pub fn load_default_roster(&self) {
        self.load_specs(default_roster(), Some("LithologyExpert".to_string()));
    }

    /// Instantiate a roster from specs and swap it in. Malformed entries
    /// are logged and skipped; loading never aborts wholesale.
    pub fn load_specs(&self, specs: Vec<AgentSpec>, default_key: Option<String>) {
        let mut roster = Roster::default();

        for spec in specs {
            if spec.key.is_empty() {
                warn!("agent spec missing 'key', skipping");
                continue;
            }
            if roster.agents.contains_key(&spec.key) {
                warn!(key = %spec.key, "duplicate agent key, keeping first definition");
                continue;
            }
            let implementation = if spec.implementation.is_empty() {
                if spec.is_arbitrator {
                    IMPL_ARBITRATOR
                } else {
                    IMPL_SPECIALIST
                }
            } else {
                spec.implementation.as_str()
            };
            let Some(factory) = self.factories.get(implementation) else {
                warn!(key = %spec.key, implementation, "unknown agent implementation, skipping");
                continue;
            };
            let agent = factory(&spec, self.reasoner.clone(), self.skills.clone());
            roster.order.push(spec.key.clone());
            roster
                .agents
                .insert(spec.key.clone(), RegisteredAgent { spec, agent });
        }

        roster.default_key = default_key
            .filter(|k| roster.agents.contains_key(k))
            .or_else(|| {
                roster
                    .order
                    .iter()
                    .find(|k| !roster.agents[*k].spec.is_arbitrator)
                    .cloned()
            })
            .unwrap_or_default();

        info!(
            agents = roster.order.len(),
            default = %roster.default_key,
            "agent roster loaded"
        );
        *self.roster.write() = Arc::new(roster);
    }

    /// Re-read the roster file, if one was loaded.
    pub fn reload(&mut self) -> Result<(), ConfigError> {
        match self.roster_path.clone() {
            Some(path) => self.load_from_path(path),
            None => {
                self.load_default_roster();
                Ok(())
            }
        }
    }

    /// An agent by key.
    pub fn get(&self, key: &str) -> Option<RegisteredAgent> {
        self.roster.read().agents.get(key).cloned()
    }

    /// Whether `key` names a registered non-arbitrator agent.
    pub fn is_specialist(&self, key: &str) -> bool {
        self.roster
            .read()
            .agents
            .get(key)
            .is_some_and(|a| !a.spec.is_arbitrator)
    }

    /// Specialist specs in roster (precedence) order.
    pub fn specialists(&self) -> Vec<AgentSpec> {
        let roster = self.roster.read();
        roster
            .order
            .iter()
            .filter_map(|k| roster.agents.get(k))
            .filter(|a| !a.spec.is_arbitrator)
            .map(|a| a.spec.clone())
            .collect()
    }

    /// The distinguished arbitrator, if one is registered.
    pub fn arbitrator(&self) -> Option<RegisteredAgent> {
        let roster = self.roster.read();
        roster
            .order
            .iter()
            .filter_map(|k| roster.agents.get(k))
            .find(|a| a.spec.is_arbitrator)
            .cloned()
    }

    /// Router precedence list: (key, keywords) in roster order.
    pub fn router_keywords(&self) -> Vec<(String, Vec<String>)> {
        self.specialists()
            .into_iter()
            .map(|s| (s.key, s.keywords))
            .collect()
    }

    /// Router fallback key.
    pub fn default_agent_key(&self) -> String {
        self.roster.read().default_key.clone()
    }

    /// Frontend projection of the full roster.
    pub fn frontend_list(&self) -> Vec<AgentCard> {
        let roster = self.roster.read();
        roster
            .order
            .iter()
            .filter_map(|k| roster.agents.get(k))
            .map(|a| AgentCard {
                key: a.spec.key.clone(),
                name: a.spec.name.clone(),
                abbr: a.spec.abbr.clone(),
                color: a.spec.color.clone(),
            })
            .collect()
    }

    /// Human-readable specialist summary for the arbitrator prompt.
    pub fn team_description(&self) -> String {
        self.specialists()
            .iter()
            .map(|s| format!("- **{}** ({}): {}", s.name, s.key, s.capabilities.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Specialist summary including each agent's tool inventory, used for
    /// tool-aware dispatch.
    pub fn team_description_with_tools(&self) -> String {
        let mut lines = Vec::new();
        for spec in self.specialists() {
            let tools = self.skills.list_for(&spec.skill_packs);
            lines.push(format!("### {} ({})", spec.name, spec.key));
            lines.push(format!("- duties: {}", spec.capabilities.join(", ")));
            if tools.is_empty() {
                lines.push("- tools: none".to_string());
            } else {
                let names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
                let mut keywords: Vec<&str> = tools
                    .iter()
                    .flat_map(|t| t.trigger_keywords.iter().map(String::as_str))
                    .collect();
                keywords.truncate(10);
                lines.push(format!("- tools: {}", names.join(", ")));
                lines.push(format!("- tool trigger keywords: {}", keywords.join(", ")));
            }
            lines.push(String::new());
        }
        lines.join("\n")
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roster = self.roster.read();
        f.debug_struct("AgentRegistry")
            .field("agents", &roster.order)
            .field("default_key", &roster.default_key)
            .finish()
    }
}

/// The shipped roster: six specialists and the arbitrator, mirroring
/// `config/agents.yaml`.
pub fn default_roster() -> Vec<AgentSpec> {
    fn spec(
        key: &str,
        name: &str,
        abbr: &str,
        color: &str,
        role_prompt: &str,
        capabilities: &[&str],
        keywords: &[&str],
        skill_packs: &[&str],
    ) -> AgentSpec {
        AgentSpec {
            key: key.into(),
            name: name.into(),
            abbr: abbr.into(),
            color: color.into(),
            implementation: IMPL_SPECIALIST.into(),
            role_prompt: role_prompt.into(),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            skill_packs: skill_packs.iter().map(|s| s.to_string()).collect(),
            is_arbitrator: false,
        }
    }

    vec![
        spec(
            "ReservoirPropertyExpert",
            "储层物性专家",
            "R",
            "#1f77b4",
            "You are a reservoir engineer. Assess porosity and permeability from density, neutron, and sonic logs.",
            &["porosity and permeability estimation"],
            &["孔隙度", "渗透率", "porosity", "permeability", "储层物性"],
            &["reservoir-properties", "statistics"],
        ),
        spec(
            "MudLoggingExpert",
            "录井专家",
            "M",
            "#2ca02c",
            "You are a mud logging analyst. Interpret gas shows and cuttings descriptions.",
            &["gas show and cuttings interpretation"],
            &["录井", "气测", "mud logging", "total gas"],
            &["statistics"],
        ),
        spec(
            "MineralogyExpert",
            "矿物专家",
            "X",
            "#9467bd",
            "You are a mineralogist. Identify clay types and matrix minerals from spectral logs.",
            &["clay typing and matrix mineralogy"],
            &["矿物", "粘土", "mineral", "clay"],
            &["statistics"],
        ),
        spec(
            "SaturationExpert",
            "饱和度专家",
            "S",
            "#d62728",
            "You are a petrophysicist specializing in water saturation from resistivity and porosity.",
            &["water saturation estimation"],
            &["饱和度", "含水", "saturation", "sw"],
            &["statistics"],
        ),
        spec(
            "ElectricalExpert",
            "电性专家",
            "E",
            "#ff7f0e",
            "You are a resistivity log analyst. Interpret shallow/deep resistivity separation and invasion.",
            &["resistivity interpretation"],
            &["电阻率", "电性", "resistivity", "invasion"],
            &["statistics"],
        ),
        spec(
            "LithologyExpert",
            "岩性专家",
            "L",
            "#8c564b",
            "You are a senior petrophysicist specializing in lithology identification from GR, density, neutron, and sonic logs.",
            &["lithology identification"],
            &["岩性", "lithology", "vsh", "泥质"],
            &["lithology-classification", "statistics"],
        ),
        AgentSpec {
            key: "Arbitrator".into(),
            name: "首席解释工程师".into(),
            abbr: "A".into(),
            color: "#7f7f7f".into(),
            implementation: IMPL_ARBITRATOR.into(),
            role_prompt: "You are the chief interpreting engineer. You coordinate a team of \
                          specialists to analyze well log data and deliver the final conclusion."
                .into(),
            capabilities: vec!["coordination and final decisions".into()],
            keywords: vec![],
            skill_packs: vec![],
            is_arbitrator: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedReasoner;

    fn registry() -> AgentRegistry {
        let skills = Arc::new(SkillRegistry::new("/nonexistent"));
        let registry = AgentRegistry::new(Arc::new(ScriptedReasoner::default()), skills);
        registry.load_default_roster();
        registry
    }

    #[test]
    fn test_default_roster_has_exactly_one_arbitrator() {
        let registry = registry();
        let arbitrators: Vec<_> = registry
            .frontend_list()
            .into_iter()
            .filter(|c| !registry.is_specialist(&c.key) && registry.get(&c.key).is_some())
            .collect();
        assert_eq!(arbitrators.len(), 1);
        assert_eq!(registry.arbitrator().unwrap().spec.key, "Arbitrator");
        assert_eq!(registry.specialists().len(), 6);
    }

    #[test]
    fn test_precedence_order_and_default() {
        let registry = registry();
        let precedence = registry.router_keywords();
        assert_eq!(precedence[0].0, "ReservoirPropertyExpert");
        assert_eq!(precedence.last().unwrap().0, "LithologyExpert");
        assert_eq!(registry.default_agent_key(), "LithologyExpert");
    }

    #[test]
    fn test_unknown_implementation_is_skipped() {
        let skills = Arc::new(SkillRegistry::new("/nonexistent"));
        let registry = AgentRegistry::new(Arc::new(ScriptedReasoner::default()), skills);
        registry.load_specs(
            vec![
                AgentSpec {
                    key: "Good".into(),
                    ..Default::default()
                },
                AgentSpec {
                    key: "Bad".into(),
                    implementation: "quantum".into(),
                    ..Default::default()
                },
                AgentSpec::default(), // missing key
            ],
            None,
        );
        assert!(registry.get("Good").is_some());
        assert!(registry.get("Bad").is_none());
        assert_eq!(registry.default_agent_key(), "Good");
    }

    #[test]
    fn test_team_description_lists_specialists_only() {
        let registry = registry();
        let desc = registry.team_description();
        assert!(desc.contains("LithologyExpert"));
        assert!(!desc.contains("Arbitrator"));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("agents.yaml");
        std::fs::write(
            &path,
            r#"
router:
  default: OnlyExpert
agents:
  - key: OnlyExpert
    name: 唯一专家
    keywords: ["only"]
  - key: Arbitrator
    is_arbitrator: true
"#,
        )
        .unwrap();

        let skills = Arc::new(SkillRegistry::new("/nonexistent"));
        let mut registry = AgentRegistry::new(Arc::new(ScriptedReasoner::default()), skills);
        registry.load_from_path(&path).unwrap();
        assert_eq!(registry.specialists().len(), 1);
        assert!(registry.arbitrator().is_some());
        assert_eq!(registry.default_agent_key(), "OnlyExpert");

        registry.reload().unwrap();
        assert_eq!(registry.specialists().len(), 1);
    }
}
