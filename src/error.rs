//! Error types for the wellcouncil engine.
//!
//! Every error below the workflow boundary is converted into a typed result
//! value before it reaches a caller; nothing here is allowed to escape as a
//! panic or an unhandled fault.

use thiserror::Error;

/// Errors surfaced by [`crate::skills::SkillRegistry::execute`].
#[derive(Debug, Error)]
pub enum SkillError {
    /// The requested tool name is not present in the current index.
    #[error("tool '{0}' is not registered")]
    NotFound(String),

    /// The tool's entry point locator does not resolve to a registered
    /// executable function.
    #[error("tool '{tool}': entry point '{locator}' cannot be resolved")]
    Load { tool: String, locator: String },

    /// The tool body itself failed during invocation.
    #[error("tool '{tool}' failed during execution: {message}")]
    Execution { tool: String, message: String },
}

/// Errors raised while loading declarative configuration (skill-pack
/// manifests, the agent roster).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A file could not be parsed.
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// A definition is missing a required field.
    #[error("{path}: missing required field '{field}'")]
    MissingField { path: String, field: String },
}

/// Unrecoverable workflow faults. Everything else degrades into a
/// confidence-0 result instead.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The roster contains no arbitrator agent.
    #[error("no arbitrator agent is registered")]
    ArbitratorMissing,
}
