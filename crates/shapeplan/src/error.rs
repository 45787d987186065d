//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` categories and `ConfigError` into user-facing errors
//! with actionable help text.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use shapeplan_config::ConfigError;
use shapeplan_core::{CoreError, ErrorCategory};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const VALIDATION: i32 = 3;
    pub const STRUCTURAL: i32 = 4;
    pub const ENVIRONMENT: i32 = 5;
    pub const STATE: i32 = 6;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Input documents ──────────────────────────────────────────────

    #[error("Cannot read {}", path.display())]
    #[diagnostic(
        code(shapeplan::input_missing),
        help(
            "Point paths.network / paths.circuits at existing files,\n\
             or pass --network / --circuits."
        )
    )]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{error}")]
    #[diagnostic(
        code(shapeplan::input),
        help("Check the document syntax; nothing was applied.")
    )]
    Input { error: CoreError },

    // ── Build ────────────────────────────────────────────────────────

    #[error("{error}")]
    #[diagnostic(
        code(shapeplan::structural),
        help("Fix the network document or circuit table; nothing was applied.")
    )]
    Structural { error: CoreError },

    #[error("Validation found {issues} warning(s)")]
    #[diagnostic(
        code(shapeplan::validation),
        help(
            "Run: shapeplan validate to list them.\n\
             Running queues are left as they are until the documents validate."
        )
    )]
    ValidationFailed { issues: usize },

    #[error("{error}")]
    #[diagnostic(
        code(shapeplan::environment),
        help("Check the interfaces and queue count, or set queues.count / --queues.")
    )]
    Environment { error: CoreError },

    // ── State ────────────────────────────────────────────────────────

    #[error("{error}")]
    #[diagnostic(
        code(shapeplan::state),
        help(
            "Check permissions on the state directory.\n\
             A lock left by a crashed run is reclaimed automatically."
        )
    )]
    State { error: CoreError },

    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(shapeplan::config),
        help("Run: shapeplan config show to inspect the resolved configuration.")
    )]
    Config(#[from] ConfigError),

    #[error("Config file already exists at {path}")]
    #[diagnostic(code(shapeplan::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render output: {0}")]
    #[diagnostic(code(shapeplan::json))]
    Json(#[from] serde_json::Error),

    #[error("Failed to render config: {0}")]
    #[diagnostic(code(shapeplan::toml))]
    Toml(#[from] toml::ser::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ValidationFailed { .. } => exit_code::VALIDATION,
            Self::Structural { .. } => exit_code::STRUCTURAL,
            Self::Environment { .. } => exit_code::ENVIRONMENT,
            Self::State { .. } => exit_code::STATE,
            Self::Config(_) | Self::ConfigExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        if let CoreError::ValidationAborted { issues } = err {
            return Self::ValidationFailed { issues };
        }
        match err.category() {
            ErrorCategory::Structural => Self::Structural { error: err },
            ErrorCategory::Validation => Self::ValidationFailed { issues: 0 },
            ErrorCategory::Environment => Self::Environment { error: err },
            ErrorCategory::Input => Self::Input { error: err },
            ErrorCategory::State => Self::State { error: err },
        }
    }
}
