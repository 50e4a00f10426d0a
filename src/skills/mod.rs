//! Skill packs: manifest model, registry, and executable tool table.

pub mod builtin;
pub mod executor;
pub mod manifest;
pub mod registry;

pub use executor::{ExecutorTable, ToolContext, ToolFn};
pub use manifest::{SkillPack, ToolDescriptor};
pub use registry::{SkillIndex, SkillRegistry};
