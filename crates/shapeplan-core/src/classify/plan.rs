// ── Tree traversal and the resolved plan ──
//
// One walk over the final tree hands out a minor per node and circuit, on
// the major of the CPU the top-level ancestor is bound to. The walk builds a
// fresh `ResolvedPlan`; the topology document is never annotated in place.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::classify::layout::{ClassIdAllocator, InterfaceLayout, ROOT_MINOR};
use crate::error::CoreError;
use crate::model::{Circuit, Direction, NodeBody, TopologyDocument, TreeNode};

/// Fraction of a node's ceiling guaranteed as its rate.
pub const NODE_RATE_FACTOR: f64 = 0.95;

/// A value per direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerDirection {
    pub download: f64,
    pub upload: f64,
}

impl PerDirection {
    pub fn new(download: f64, upload: f64) -> Self {
        Self { download, upload }
    }

    pub fn get(self, direction: Direction) -> f64 {
        direction.pick((self.download, self.upload))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedNode {
    pub name: String,
    pub cpu: u32,
    pub minor: u16,
    pub parent_minor: u16,
    pub rate: PerDirection,
    pub ceil: PerDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedCircuit {
    pub circuit_id: String,
    pub label: String,
    /// Physical node the circuit hangs under (a generated node when unparented).
    pub parent_node: String,
    pub cpu: u32,
    pub minor: u16,
    pub parent_minor: u16,
    pub rate: PerDirection,
    pub ceil: PerDirection,
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum PlanEntry {
    Node(ResolvedNode),
    Circuit(ResolvedCircuit),
}

/// Every class of one build, in emission order (parents before children).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedPlan {
    pub entries: Vec<PlanEntry>,
}

impl ResolvedPlan {
    pub fn nodes(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.entries.iter().filter_map(|e| match e {
            PlanEntry::Node(node) => Some(node),
            PlanEntry::Circuit(_) => None,
        })
    }

    pub fn circuits(&self) -> impl Iterator<Item = &ResolvedCircuit> {
        self.entries.iter().filter_map(|e| match e {
            PlanEntry::Circuit(circuit) => Some(circuit),
            PlanEntry::Node(_) => None,
        })
    }

    pub fn node(&self, name: &str) -> Option<&ResolvedNode> {
        self.nodes().find(|n| n.name == name)
    }

    pub fn circuit(&self, circuit_id: &str) -> Option<&ResolvedCircuit> {
        self.circuits().find(|c| c.circuit_id == circuit_id)
    }

    /// `(cpu, minor)` of every class in the plan.
    pub fn used_minors(&self) -> impl Iterator<Item = (u32, u16)> + '_ {
        self.entries.iter().map(|e| match e {
            PlanEntry::Node(n) => (n.cpu, n.minor),
            PlanEntry::Circuit(c) => (c.cpu, c.minor),
        })
    }
}

/// Turn the final document into typed tree nodes, attaching each circuit
/// (by index) to the node named by its parent.
pub fn build_tree(doc: &TopologyDocument, circuits: &[Circuit]) -> Vec<TreeNode> {
    let mut by_parent: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, circuit) in circuits.iter().enumerate() {
        if let Some(parent) = circuit.parent_node.name() {
            by_parent.entry(parent).or_default().push(idx);
        }
    }
    build_level(doc, &mut by_parent)
}

fn build_level(level: &TopologyDocument, by_parent: &mut HashMap<&str, Vec<usize>>) -> Vec<TreeNode> {
    level
        .iter()
        .map(|(name, spec)| {
            let children = build_level(&spec.children, by_parent);
            let circuits = by_parent.remove(name.as_str()).unwrap_or_default();
            let body = if children.is_empty() && circuits.is_empty() {
                NodeBody::Leaf
            } else {
                NodeBody::Structural { children, circuits }
            };
            TreeNode {
                name: name.clone(),
                download_mbps: spec.download_bandwidth_mbps,
                upload_mbps: spec.upload_bandwidth_mbps,
                body,
            }
        })
        .collect()
}

/// Rate and ceiling of a circuit under a parent capped at `parent_ceil`.
pub fn circuit_rates(circuit: &Circuit, parent_ceil: PerDirection) -> (PerDirection, PerDirection) {
    let ceil = PerDirection::new(
        circuit.max_download_mbps.min(parent_ceil.download),
        circuit.max_upload_mbps.min(parent_ceil.upload),
    );
    let rate = PerDirection::new(
        circuit.min_download_mbps.min(ceil.download),
        circuit.min_upload_mbps.min(ceil.upload),
    );
    if circuit.max_download_mbps > parent_ceil.download || circuit.max_upload_mbps > parent_ceil.upload {
        warn!(
            circuit_id = %circuit.circuit_id,
            max_download = circuit.max_download_mbps,
            max_upload = circuit.max_upload_mbps,
            parent_download = parent_ceil.download,
            parent_upload = parent_ceil.upload,
            "circuit ceiling exceeds parent; clamping"
        );
    }
    (rate, ceil)
}

pub(crate) fn resolved_circuit(
    circuit: &Circuit,
    parent: &str,
    parent_ceil: PerDirection,
    cpu: u32,
    minor: u16,
    parent_minor: u16,
) -> ResolvedCircuit {
    let (rate, ceil) = circuit_rates(circuit, parent_ceil);
    ResolvedCircuit {
        circuit_id: circuit.circuit_id.clone(),
        label: circuit.label().to_owned(),
        parent_node: parent.to_owned(),
        cpu,
        minor,
        parent_minor,
        rate,
        ceil,
        addresses: circuit.addresses().map(str::to_owned).collect(),
    }
}

/// Walk the tree and assign every class.
pub fn resolve(
    tree: &[TreeNode],
    circuits: &[Circuit],
    cpus: &IndexMap<String, u32>,
    layout: &InterfaceLayout,
) -> Result<ResolvedPlan, CoreError> {
    let mut walk = Walk {
        circuits,
        layout,
        allocator: ClassIdAllocator::new(layout.queues),
        entries: Vec::new(),
    };
    for top in tree {
        let cpu = *cpus.get(&top.name).ok_or_else(|| CoreError::NodeNotFound {
            name: top.name.clone(),
        })?;
        walk.visit(top, cpu, ROOT_MINOR)?;
    }
    debug!(classes = walk.entries.len(), "class ids assigned");
    Ok(ResolvedPlan {
        entries: walk.entries,
    })
}

struct Walk<'a> {
    circuits: &'a [Circuit],
    layout: &'a InterfaceLayout,
    allocator: ClassIdAllocator,
    entries: Vec<PlanEntry>,
}

impl Walk<'_> {
    fn visit(&mut self, node: &TreeNode, cpu: u32, parent_minor: u16) -> Result<(), CoreError> {
        let major = self.layout.major(Direction::Download, cpu);
        let minor = self.allocator.allocate(cpu, major)?;
        let ceil = PerDirection::new(node.download_mbps, node.upload_mbps);
        self.entries.push(PlanEntry::Node(ResolvedNode {
            name: node.name.clone(),
            cpu,
            minor,
            parent_minor,
            rate: PerDirection::new(ceil.download * NODE_RATE_FACTOR, ceil.upload * NODE_RATE_FACTOR),
            ceil,
        }));

        for &idx in node.circuits() {
            let Some(circuit) = self.circuits.get(idx) else {
                continue;
            };
            let circuit_minor = self.allocator.allocate(cpu, major)?;
            self.entries.push(PlanEntry::Circuit(resolved_circuit(
                circuit,
                &node.name,
                ceil,
                cpu,
                circuit_minor,
                minor,
            )));
        }
        for child in node.children() {
            self.visit(child, cpu, minor)?;
        }
        Ok(())
    }
}
