// ── Reload decisions ──
//
// Each run compares what is about to be applied with what was last applied
// and picks one of three outcomes: rebuild everything, patch the circuits
// that changed, or do nothing.

pub mod patch;

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::classify::ResolvedPlan;
use crate::error::CoreError;
use crate::model::{Circuit, ParentNode};

pub use patch::{Patch, build_patch};

/// The two canonical input documents, verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSet {
    pub network: String,
    pub circuits: String,
}

/// Persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadState {
    /// Boot the state was written under; a different boot means queues are empty.
    pub boot_id: String,
    pub config_fingerprint: String,
    pub last_applied: DocumentSet,
    /// Most recent documents that passed validation.
    #[serde(default)]
    pub last_good_backup: Option<DocumentSet>,
    /// Class layout currently in the kernel, the base for incremental patches.
    #[serde(default)]
    pub last_plan: Option<ResolvedPlan>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FullReason {
    FirstRun,
    NoPriorState,
    ConfigChanged,
    TopologyChanged,
    ShardLayoutChanged,
    /// A changed circuit names a parent the applied plan does not have.
    UnknownParent,
    ValidationFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DocumentSource {
    Current,
    LastKnownGood,
}

/// Circuit-level difference between two loads, keyed by circuit id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl CircuitDelta {
    pub fn between(previous: &[Circuit], current: &[Circuit]) -> Self {
        let old: BTreeMap<&str, &Circuit> =
            previous.iter().map(|c| (c.circuit_id.as_str(), c)).collect();
        let new: BTreeMap<&str, &Circuit> =
            current.iter().map(|c| (c.circuit_id.as_str(), c)).collect();
        let ids: BTreeSet<&str> = old.keys().chain(new.keys()).copied().collect();

        let mut delta = Self::default();
        for id in ids {
            match (old.get(id), new.get(id)) {
                (None, Some(_)) => delta.added.push(id.to_owned()),
                (Some(_), None) => delta.removed.push(id.to_owned()),
                (Some(a), Some(b)) if a != b => delta.changed.push(id.to_owned()),
                _ => {}
            }
        }
        delta
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ReloadDecision {
    Full {
        reason: FullReason,
        source: DocumentSource,
    },
    Incremental {
        delta: CircuitDelta,
    },
    NoOp,
}

impl ReloadDecision {
    fn full(reason: FullReason) -> Self {
        Self::Full {
            reason,
            source: DocumentSource::Current,
        }
    }
}

/// Everything `decide` looks at.
#[derive(Debug)]
pub struct ReloadInputs<'a> {
    pub previous: Option<&'a ReloadState>,
    pub current: &'a DocumentSet,
    pub boot_id: &'a str,
    pub config_fingerprint: &'a str,
    pub validation_passed: bool,
    pub validation_issues: usize,
    /// Circuits of the last applied table, when there is one.
    pub previous_circuits: Option<&'a [Circuit]>,
    pub current_circuits: &'a [Circuit],
}

impl ReloadInputs<'_> {
    pub fn first_run(&self) -> bool {
        self.previous.is_none_or(|state| state.boot_id != self.boot_id)
    }
}

/// Classify a run.
///
/// Validation failures abort unless this is the first run since boot, in
/// which case the last-known-good documents are applied in full (or the
/// current ones when no backup exists).
pub fn decide(inputs: &ReloadInputs<'_>) -> Result<ReloadDecision, CoreError> {
    let first_run = inputs.first_run();

    if !inputs.validation_passed {
        if !first_run {
            warn!(
                issues = inputs.validation_issues,
                "validation failed; leaving running queues untouched"
            );
            return Err(CoreError::ValidationAborted {
                issues: inputs.validation_issues,
            });
        }
        let has_backup = inputs
            .previous
            .and_then(|s| s.last_good_backup.as_ref())
            .is_some();
        let source = if has_backup {
            DocumentSource::LastKnownGood
        } else {
            DocumentSource::Current
        };
        warn!(%source, "validation failed on first run since boot; applying fallback");
        return Ok(ReloadDecision::Full {
            reason: FullReason::ValidationFallback,
            source,
        });
    }

    if first_run {
        return Ok(ReloadDecision::full(FullReason::FirstRun));
    }
    let (Some(previous), Some(previous_circuits)) = (inputs.previous, inputs.previous_circuits) else {
        return Ok(ReloadDecision::full(FullReason::NoPriorState));
    };
    if previous.last_plan.is_none() {
        return Ok(ReloadDecision::full(FullReason::NoPriorState));
    }
    if previous.config_fingerprint != inputs.config_fingerprint {
        info!("configuration changed since last apply");
        return Ok(ReloadDecision::full(FullReason::ConfigChanged));
    }
    if !same_topology(&previous.last_applied.network, &inputs.current.network) {
        info!("network document changed since last apply");
        return Ok(ReloadDecision::full(FullReason::TopologyChanged));
    }

    let delta = CircuitDelta::between(previous_circuits, inputs.current_circuits);
    if delta.is_empty() {
        return Ok(ReloadDecision::NoOp);
    }
    if touches_shard_layout(&delta, previous_circuits, inputs.current_circuits) {
        info!("unparented circuits changed; shard placement must be recomputed");
        return Ok(ReloadDecision::full(FullReason::ShardLayoutChanged));
    }
    info!(
        added = delta.added.len(),
        removed = delta.removed.len(),
        changed = delta.changed.len(),
        "incremental update"
    );
    Ok(ReloadDecision::Incremental { delta })
}

/// Compare documents as JSON values so formatting and key spacing don't matter.
fn same_topology(previous: &str, current: &str) -> bool {
    let parse = |text: &str| -> Option<serde_json::Value> {
        if text.trim().is_empty() {
            return Some(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(text).ok()
    };
    match (parse(previous), parse(current)) {
        (Some(a), Some(b)) => a == b,
        _ => previous == current,
    }
}

/// Additions, removals and parent moves involving unassigned circuits need
/// the shard planner; bandwidth or address edits on them do not.
fn touches_shard_layout(delta: &CircuitDelta, previous: &[Circuit], current: &[Circuit]) -> bool {
    fn find<'c>(list: &'c [Circuit], id: &str) -> Option<&'c ParentNode> {
        list.iter().find(|c| c.circuit_id == id).map(|c| &c.parent_node)
    }
    let unassigned = |parent: Option<&ParentNode>| parent.is_some_and(ParentNode::is_unassigned);

    delta.added.iter().any(|id| unassigned(find(current, id)))
        || delta.removed.iter().any(|id| unassigned(find(previous, id)))
        || delta.changed.iter().any(|id| {
            let before = find(previous, id);
            let after = find(current, id);
            before != after && (unassigned(before) || unassigned(after))
        })
}
