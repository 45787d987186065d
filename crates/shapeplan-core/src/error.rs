// ── Core error types ──
//
// Everything that can stop a build. Validation findings and capacity
// clamps are NOT errors: they travel as `ValidationIssue` values and log
// lines so a run can still be judged as a whole.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification used by callers to pick exit codes and recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    /// The network hierarchy itself cannot be built.
    Structural,
    /// Validation findings made the run unsafe to apply.
    Validation,
    /// The host cannot run a shaper (too few queues, bus unreachable).
    Environment,
    /// An input document could not be read or parsed.
    Input,
    /// Persisted planner/reload state could not be read or written.
    State,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Structural errors ────────────────────────────────────────────
    #[error(
        "Circuit {circuit_id} has devices declaring different parent nodes ('{first}' vs '{second}')"
    )]
    HierarchyMismatch {
        circuit_id: String,
        first: String,
        second: String,
    },

    #[error("Promoting children of virtual nodes under '{level}' produced duplicate node '{name}'")]
    PromotionCollision { name: String, level: String },

    #[error("Flattening beyond depth {max_depth} under '{level}' produced duplicate node '{name}'")]
    FlattenCollision {
        name: String,
        level: String,
        max_depth: usize,
    },

    #[error("Node name '{name}' appears more than once in the network hierarchy")]
    DuplicateNodeName { name: String },

    #[error("Node '{name}' not found in the network graph")]
    NodeNotFound { name: String },

    #[error("Ran out of class minors for major {major:x}")]
    ClassIdExhausted { major: u16 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Validation failed with {issues} issue(s); queues already hold a working state")]
    ValidationAborted { issues: usize },

    // ── Environment errors ───────────────────────────────────────────
    #[error("Only {available} usable queue(s); at least 2 are required")]
    InsufficientQueues { available: u32 },

    #[error("Too many queues for the class handle space: {queues}")]
    TooManyQueues { queues: u32 },

    #[error("Execution bus unavailable: {reason}")]
    BusUnavailable { reason: String },

    // ── Input errors ─────────────────────────────────────────────────
    #[error("Invalid network document: {0}")]
    TopologyParse(#[source] serde_json::Error),

    #[error("Invalid circuit table: {0}")]
    CircuitTable(#[from] csv::Error),

    // ── State errors ─────────────────────────────────────────────────
    #[error("State directory {} is locked by another run (pid {pid})", path.display())]
    StateLocked { path: PathBuf, pid: String },

    #[error("Failed to encode state: {0}")]
    StateEncode(#[source] serde_json::Error),

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::HierarchyMismatch { .. }
            | Self::PromotionCollision { .. }
            | Self::FlattenCollision { .. }
            | Self::DuplicateNodeName { .. }
            | Self::NodeNotFound { .. }
            | Self::ClassIdExhausted { .. } => ErrorCategory::Structural,
            Self::ValidationAborted { .. } => ErrorCategory::Validation,
            Self::InsufficientQueues { .. }
            | Self::TooManyQueues { .. }
            | Self::BusUnavailable { .. } => ErrorCategory::Environment,
            Self::TopologyParse(_) | Self::CircuitTable(_) => ErrorCategory::Input,
            Self::StateLocked { .. } | Self::StateEncode(_) | Self::Io { .. } => {
                ErrorCategory::State
            }
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_are_classified() {
        let err = CoreError::PromotionCollision {
            name: "AP_1".into(),
            level: "Site_A".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Structural);
        assert!(err.to_string().contains("AP_1"));
    }

    #[test]
    fn environment_errors_are_classified() {
        let err = CoreError::InsufficientQueues { available: 1 };
        assert_eq!(err.category(), ErrorCategory::Environment);
        assert_eq!(ErrorCategory::Environment.to_string(), "environment");
    }
}
