// ── Incremental patches ──
//
// Turn a circuit delta into the narrow set of class changes against the
// plan already in the kernel. Existing classes keep their minors; new ones
// get minors above each CPU's high-water mark.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::emit::{
    add_circuit_ops, address_mappings, change_circuit_op, circuit_mappings, delete_circuit_ops,
};
use crate::classify::plan::resolved_circuit;
use crate::classify::{ClassIdAllocator, InterfaceLayout, PlanEntry, ResolvedCircuit, ResolvedPlan};
use crate::config::ShaperSettings;
use crate::error::CoreError;
use crate::model::{Circuit, Direction, IpMapping, ParentNode, QueueOperation};
use crate::reload::CircuitDelta;

/// Operations and mapping changes for one incremental run.
///
/// The bus must apply `removed_mappings` before `added_mappings`: an address
/// that moved between circuits appears in both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    pub operations: Vec<QueueOperation>,
    pub removed_mappings: Vec<IpMapping>,
    pub added_mappings: Vec<IpMapping>,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty() && self.removed_mappings.is_empty() && self.added_mappings.is_empty()
    }
}

#[derive(Default)]
struct PatchBuilder {
    deletes: Vec<QueueOperation>,
    changes: Vec<QueueOperation>,
    adds: Vec<QueueOperation>,
    removed_mappings: Vec<IpMapping>,
    added_mappings: Vec<IpMapping>,
}

impl PatchBuilder {
    fn delete(&mut self, layout: &InterfaceLayout, circuit: &ResolvedCircuit) {
        for direction in Direction::BOTH {
            self.deletes
                .extend(delete_circuit_ops(layout, circuit, direction));
        }
        self.removed_mappings
            .extend(circuit_mappings(layout, circuit));
    }

    fn add(&mut self, layout: &InterfaceLayout, sqm: &str, circuit: &ResolvedCircuit) {
        for direction in Direction::BOTH {
            self.adds
                .extend(add_circuit_ops(layout, sqm, circuit, direction));
        }
        self.added_mappings.extend(circuit_mappings(layout, circuit));
    }

    fn finish(self) -> Patch {
        let mut operations = self.deletes;
        operations.extend(self.changes);
        operations.extend(self.adds);
        Patch {
            operations,
            removed_mappings: self.removed_mappings,
            added_mappings: self.added_mappings,
        }
    }
}

/// Patch `plan` for `delta`.
///
/// `circuits` is the current circuit list with parents already mapped to
/// physical node names. Returns `None` when a circuit cannot be placed
/// without a full rebuild (its parent is not in the applied plan).
pub fn build_patch(
    plan: &ResolvedPlan,
    delta: &CircuitDelta,
    circuits: &[Circuit],
    settings: &ShaperSettings,
) -> Result<Option<(Patch, ResolvedPlan)>, CoreError> {
    let layout = settings.layout();
    let current: HashMap<&str, &Circuit> = circuits
        .iter()
        .map(|c| (c.circuit_id.as_str(), c))
        .collect();
    let mut entries = plan.entries.clone();
    let mut allocator = ClassIdAllocator::resume(layout.queues, plan.used_minors());
    let mut builder = PatchBuilder::default();

    for id in &delta.removed {
        match take_circuit(&mut entries, id) {
            Some(old) => builder.delete(&layout, &old),
            None => warn!(circuit_id = %id, "removed circuit was not in the applied plan"),
        }
    }

    for id in &delta.changed {
        let Some(circuit) = current.get(id.as_str()) else {
            continue;
        };
        let Some(position) = circuit_position(&entries, id) else {
            debug!(circuit_id = %id, "changed circuit missing from applied plan");
            return Ok(None);
        };
        let PlanEntry::Circuit(old) = entries[position].clone() else {
            continue;
        };
        let target = match &circuit.parent_node {
            ParentNode::Named(name) => name.as_str(),
            ParentNode::Unassigned => old.parent_node.as_str(),
        };
        let Some(node) = plan.node(target) else {
            return Ok(None);
        };

        if target == old.parent_node {
            let updated = resolved_circuit(circuit, target, node.ceil, old.cpu, old.minor, old.parent_minor);
            if updated.rate != old.rate || updated.ceil != old.ceil {
                for direction in Direction::BOTH {
                    builder
                        .changes
                        .push(change_circuit_op(&layout, &updated, direction));
                }
            }
            let dropped: Vec<String> = old
                .addresses
                .iter()
                .filter(|ip| !updated.addresses.contains(ip))
                .cloned()
                .collect();
            let gained: Vec<String> = updated
                .addresses
                .iter()
                .filter(|ip| !old.addresses.contains(ip))
                .cloned()
                .collect();
            builder
                .removed_mappings
                .extend(address_mappings(&layout, &old, &dropped));
            builder
                .added_mappings
                .extend(address_mappings(&layout, &updated, &gained));
            entries[position] = PlanEntry::Circuit(updated);
        } else {
            let major = layout.major(Direction::Download, node.cpu);
            let minor = allocator.allocate(node.cpu, major)?;
            let moved = resolved_circuit(circuit, target, node.ceil, node.cpu, minor, node.minor);
            debug!(circuit_id = %id, from = %old.parent_node, to = %target, "moving circuit");
            builder.delete(&layout, &old);
            builder.add(&layout, &settings.sqm, &moved);
            entries.remove(position);
            entries.push(PlanEntry::Circuit(moved));
        }
    }

    for id in &delta.added {
        let Some(circuit) = current.get(id.as_str()) else {
            continue;
        };
        let Some(node) = circuit.parent_node.name().and_then(|name| plan.node(name)) else {
            return Ok(None);
        };
        let major = layout.major(Direction::Download, node.cpu);
        let minor = allocator.allocate(node.cpu, major)?;
        let added = resolved_circuit(circuit, &node.name, node.ceil, node.cpu, minor, node.minor);
        builder.add(&layout, &settings.sqm, &added);
        entries.push(PlanEntry::Circuit(added));
    }

    let patch = builder.finish();
    debug!(
        operations = patch.operations.len(),
        removed_mappings = patch.removed_mappings.len(),
        added_mappings = patch.added_mappings.len(),
        "patch built"
    );
    Ok(Some((patch, ResolvedPlan { entries })))
}

fn circuit_position(entries: &[PlanEntry], circuit_id: &str) -> Option<usize> {
    entries
        .iter()
        .position(|e| matches!(e, PlanEntry::Circuit(c) if c.circuit_id == circuit_id))
}

fn take_circuit(entries: &mut Vec<PlanEntry>, circuit_id: &str) -> Option<ResolvedCircuit> {
    let position = circuit_position(entries, circuit_id)?;
    match entries.remove(position) {
        PlanEntry::Circuit(circuit) => Some(circuit),
        PlanEntry::Node(_) => None,
    }
}
