//! Reasoning agents: contract, roster registry, and the shipped
//! specialist/arbitrator implementations.

pub mod arbitrator;
pub mod base;
pub mod registry;
pub mod specialist;

pub use arbitrator::{ArbitratorAgent, Verdict, STATUS_CONTINUE, STATUS_FINAL};
pub use base::{extract_json, Agent, AgentAction, AgentContext, AgentResult};
pub use registry::{default_roster, AgentCard, AgentRegistry, AgentSpec, RegisteredAgent};
pub use specialist::SpecialistAgent;
