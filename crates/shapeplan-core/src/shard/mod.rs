// ── CPU shard planning ──
//
// Every usable CPU queue owns one HTB tree. Top-level nodes are bound to a
// CPU, and circuits without a parent node are spread over generated shard
// nodes (`Generated_PN_<n>`), one pinned to each CPU.

pub mod rendezvous;
pub mod round_robin;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::model::{Circuit, NodeSpec, ParentNode, TopologyDocument};

pub use rendezvous::{
    ALGO_VERSION, PlanItem, PlanOutcome, PlannerParams, PlannerState, Shard, hrw_candidates,
    hrw_score, plan_assignments, refresh_state,
};
pub use round_robin::{bin_pack, round_robin};

pub const GENERATED_NODE_PREFIX: &str = "Generated_PN_";

/// Largest queue count whose majors (download and stick-offset upload)
/// stay below the `mq` root handle.
pub const MAX_QUEUES: u32 = 0x3FFF;

/// Fewest usable queues per direction a build accepts.
pub const MIN_QUEUES: u32 = 2;

/// How circuits without a parent node are spread over shard nodes.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShardStrategy {
    RoundRobin,
    BinPacking,
    #[default]
    Rendezvous,
}

/// How top-level nodes are bound to CPUs.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TopLevelStrategy {
    #[default]
    RoundRobin,
    BinPacking,
}

/// Queues usable per direction.
///
/// `Q = min(nic_queues, cpu_cores)` unless overridden. On a stick both
/// directions share the queue set, so each gets half. At least
/// [`MIN_QUEUES`] must remain per direction.
pub fn usable_queues(
    nic_queues: u32,
    cpu_cores: u32,
    override_queues: Option<u32>,
    on_a_stick: bool,
) -> Result<u32, CoreError> {
    let available = override_queues.unwrap_or_else(|| nic_queues.min(cpu_cores));
    let queues = if on_a_stick { available / 2 } else { available };
    if queues < MIN_QUEUES {
        return Err(CoreError::InsufficientQueues { available: queues });
    }
    if queues > MAX_QUEUES {
        return Err(CoreError::TooManyQueues { queues });
    }
    debug!(nic_queues, cpu_cores, on_a_stick, queues, "usable queues");
    Ok(queues)
}

/// Name of the generated node pinned to `cpu` (0-based).
pub fn shard_node_name(cpu: u32) -> String {
    format!("{GENERATED_NODE_PREFIX}{}", cpu + 1)
}

/// CPU a generated node is pinned to, if `name` is one.
pub fn generated_node_cpu(name: &str) -> Option<u32> {
    let number: u32 = name.strip_prefix(GENERATED_NODE_PREFIX)?.parse().ok()?;
    number.checked_sub(1)
}

/// Generated shard nodes, one per CPU.
pub fn generated_nodes(queues: u32, download_mbps: f64, upload_mbps: f64) -> Vec<(String, NodeSpec)> {
    (0..queues)
        .map(|cpu| {
            let mut node = NodeSpec::new(download_mbps, upload_mbps);
            node.node_type = Some("generated".into());
            (shard_node_name(cpu), node)
        })
        .collect()
}

/// Add generated nodes to the top level. A name already present is a collision.
pub fn inject_generated_nodes(
    tree: &mut TopologyDocument,
    nodes: Vec<(String, NodeSpec)>,
) -> Result<(), CoreError> {
    for (name, node) in nodes {
        if tree.contains_key(&name) {
            return Err(CoreError::DuplicateNodeName { name });
        }
        tree.insert(name, node);
    }
    Ok(())
}

/// Inputs of unparented-circuit placement.
#[derive(Debug)]
pub struct ShardRequest<'a> {
    pub strategy: ShardStrategy,
    pub queues: u32,
    /// Capacity of each shard node (its download ceiling).
    pub shard_capacity_mbps: f64,
    pub params: &'a PlannerParams,
    pub now: i64,
}

/// Point every unassigned circuit at a generated node. Returns how many
/// circuits were placed; the planner state is only touched by the
/// rendezvous strategy.
pub fn assign_unparented(
    circuits: &mut [Circuit],
    request: &ShardRequest<'_>,
    state: &mut PlannerState,
) -> usize {
    let pending: Vec<usize> = circuits
        .iter()
        .enumerate()
        .filter(|(_, c)| c.parent_node.is_unassigned())
        .map(|(idx, _)| idx)
        .collect();
    if pending.is_empty() || request.queues == 0 {
        return 0;
    }
    let shards = usize::try_from(request.queues).unwrap_or(usize::MAX);

    let placement = match request.strategy {
        ShardStrategy::RoundRobin => round_robin(pending.len(), shards),
        ShardStrategy::BinPacking => {
            let weights: Vec<f64> = pending
                .iter()
                .map(|&idx| circuits[idx].max_download_mbps)
                .collect();
            bin_pack(&weights, shards, &[])
        }
        ShardStrategy::Rendezvous => {
            let pool: Vec<Shard> = (0..request.queues)
                .map(|cpu| Shard {
                    id: shard_node_name(cpu),
                    weight: 1.0,
                    capacity: request.shard_capacity_mbps,
                })
                .collect();
            let items: Vec<PlanItem> = pending
                .iter()
                .map(|&idx| PlanItem {
                    circuit_id: circuits[idx].circuit_id.clone(),
                    load: circuits[idx].max_download_mbps,
                })
                .collect();
            plan_assignments(&items, &pool, state, request.params, request.now).placement
        }
    };

    for (&idx, shard) in pending.iter().zip(placement) {
        let cpu = u32::try_from(shard).unwrap_or(0);
        circuits[idx].parent_node = ParentNode::Named(shard_node_name(cpu));
    }
    info!(
        strategy = %request.strategy,
        circuits = pending.len(),
        shards,
        "assigned unparented circuits"
    );
    pending.len()
}

/// Bind every top-level node to a CPU.
///
/// Generated nodes stay on their own CPU. Other nodes go round-robin in
/// document order, or bin-packed by the circuit load beneath them (falling
/// back to the node's ceiling when it carries no circuits).
pub fn assign_top_level_cpus(
    tree: &TopologyDocument,
    circuits: &[Circuit],
    queues: u32,
    strategy: TopLevelStrategy,
) -> IndexMap<String, u32> {
    let mut cpus = IndexMap::with_capacity(tree.len());
    if queues == 0 {
        return cpus;
    }
    let shards = usize::try_from(queues).unwrap_or(usize::MAX);
    let mut pinned_load = vec![0.0; shards];
    let mut free: Vec<(&str, f64)> = Vec::new();

    for (name, node) in tree {
        let load = subtree_load(name, node, circuits);
        match generated_node_cpu(name).filter(|cpu| *cpu < queues) {
            Some(cpu) => {
                if let Some(slot) = usize::try_from(cpu).ok().and_then(|c| pinned_load.get_mut(c)) {
                    *slot += load;
                }
                cpus.insert(name.clone(), cpu);
            }
            None => free.push((name.as_str(), load)),
        }
    }

    let placement = match strategy {
        TopLevelStrategy::RoundRobin => round_robin(free.len(), shards),
        TopLevelStrategy::BinPacking => {
            let weights: Vec<f64> = free.iter().map(|(_, load)| *load).collect();
            bin_pack(&weights, shards, &pinned_load)
        }
    };
    for ((name, _), shard) in free.iter().zip(placement) {
        cpus.insert((*name).to_owned(), u32::try_from(shard).unwrap_or(0));
    }

    // keep document order for traversal
    let ordered: IndexMap<String, u32> = tree
        .keys()
        .filter_map(|name| cpus.get(name).map(|cpu| (name.clone(), *cpu)))
        .collect();
    debug!(nodes = ordered.len(), %strategy, "top-level nodes bound to CPUs");
    ordered
}

fn subtree_load(name: &str, node: &NodeSpec, circuits: &[Circuit]) -> f64 {
    let mut names = vec![name];
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        for (child_name, child) in &current.children {
            names.push(child_name);
            stack.push(child);
        }
    }
    let load: f64 = circuits
        .iter()
        .filter(|c| c.parent_node.name().is_some_and(|p| names.contains(&p)))
        .map(|c| c.max_download_mbps)
        .sum();
    if load > 0.0 {
        load
    } else {
        node.download_bandwidth_mbps
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn circuit(id: &str, parent: ParentNode, max_dl: f64) -> Circuit {
        Circuit {
            circuit_id: id.into(),
            circuit_name: String::new(),
            parent_node: parent,
            devices: Vec::new(),
            min_download_mbps: 1.0,
            min_upload_mbps: 1.0,
            max_download_mbps: max_dl,
            max_upload_mbps: max_dl,
        }
    }

    #[test]
    fn queue_count_rules() {
        assert_eq!(usable_queues(8, 4, None, false).unwrap(), 4);
        assert_eq!(usable_queues(8, 16, None, true).unwrap(), 4);
        assert_eq!(usable_queues(1, 16, Some(6), false).unwrap(), 6);
        assert!(matches!(
            usable_queues(1, 8, None, false),
            Err(CoreError::InsufficientQueues { available: 1 })
        ));
        // a stick halves 3 to a single queue per direction
        assert!(matches!(
            usable_queues(3, 8, None, true),
            Err(CoreError::InsufficientQueues { available: 1 })
        ));
        assert_eq!(usable_queues(4, 8, None, true).unwrap(), 2);
        assert!(matches!(
            usable_queues(64, 64, Some(0x8000), false),
            Err(CoreError::TooManyQueues { .. })
        ));
    }

    #[test]
    fn generated_names_are_one_based() {
        assert_eq!(shard_node_name(0), "Generated_PN_1");
        assert_eq!(generated_node_cpu("Generated_PN_4"), Some(3));
        assert_eq!(generated_node_cpu("Generated_PN_0"), None);
        assert_eq!(generated_node_cpu("Site_A"), None);
    }

    #[test]
    fn injection_rejects_existing_names() {
        let mut tree = TopologyDocument::new();
        tree.insert("Generated_PN_2".into(), NodeSpec::new(1.0, 1.0));
        let err = inject_generated_nodes(&mut tree, generated_nodes(2, 100.0, 100.0)).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateNodeName { ref name } if name == "Generated_PN_2"));
    }

    #[test]
    fn round_robin_assigns_only_unparented() {
        let mut circuits = vec![
            circuit("a", ParentNode::Unassigned, 10.0),
            circuit("b", ParentNode::Named("AP_A".into()), 10.0),
            circuit("c", ParentNode::Unassigned, 10.0),
            circuit("d", ParentNode::Unassigned, 10.0),
        ];
        let params = PlannerParams::default();
        let request = ShardRequest {
            strategy: ShardStrategy::RoundRobin,
            queues: 2,
            shard_capacity_mbps: 1000.0,
            params: &params,
            now: 0,
        };
        let mut state = PlannerState::fresh("", 0);
        assert_eq!(assign_unparented(&mut circuits, &request, &mut state), 3);
        let parents: Vec<_> = circuits.iter().map(|c| c.parent_node.to_string()).collect();
        assert_eq!(parents, ["Generated_PN_1", "AP_A", "Generated_PN_2", "Generated_PN_1"]);
        assert!(state.assignments.is_empty());
    }

    #[test]
    fn rendezvous_records_assignments() {
        let mut circuits = vec![circuit("a", ParentNode::Unassigned, 10.0)];
        let params = PlannerParams::default();
        let request = ShardRequest {
            strategy: ShardStrategy::Rendezvous,
            queues: 4,
            shard_capacity_mbps: 1000.0,
            params: &params,
            now: 100,
        };
        let mut state = PlannerState::fresh("", 0);
        assign_unparented(&mut circuits, &request, &mut state);
        let parent = circuits[0].parent_node.name().unwrap().to_owned();
        assert!(parent.starts_with(GENERATED_NODE_PREFIX));
        assert_eq!(state.assignments["a"], parent);
    }

    #[test]
    fn top_level_binding_pins_generated_nodes() {
        let mut tree = TopologyDocument::new();
        tree.insert("Site_A".into(), NodeSpec::new(100.0, 100.0));
        tree.insert("Site_B".into(), NodeSpec::new(100.0, 100.0));
        tree.insert("Site_C".into(), NodeSpec::new(100.0, 100.0));
        inject_generated_nodes(&mut tree, generated_nodes(2, 500.0, 500.0)).unwrap();

        let cpus = assign_top_level_cpus(&tree, &[], 2, TopLevelStrategy::RoundRobin);
        let pairs: Vec<_> = cpus.iter().map(|(n, c)| (n.as_str(), *c)).collect();
        assert_eq!(
            pairs,
            [
                ("Site_A", 0),
                ("Site_B", 1),
                ("Site_C", 0),
                ("Generated_PN_1", 0),
                ("Generated_PN_2", 1)
            ]
        );
    }

    #[test]
    fn top_level_bin_packing_weighs_circuits() {
        let mut tree = TopologyDocument::new();
        tree.insert(
            "Big".into(),
            NodeSpec::new(1000.0, 1000.0).with_child("AP_Big", NodeSpec::new(1000.0, 1000.0)),
        );
        tree.insert("Small_1".into(), NodeSpec::new(1000.0, 1000.0));
        tree.insert("Small_2".into(), NodeSpec::new(1000.0, 1000.0));
        let circuits = vec![
            circuit("a", ParentNode::Named("AP_Big".into()), 900.0),
            circuit("b", ParentNode::Named("Small_1".into()), 100.0),
            circuit("c", ParentNode::Named("Small_2".into()), 100.0),
        ];
        let cpus = assign_top_level_cpus(&tree, &circuits, 2, TopLevelStrategy::BinPacking);
        assert_eq!(cpus["Big"], 0);
        assert_eq!(cpus["Small_1"], 1);
        assert_eq!(cpus["Small_2"], 1);
    }
}
