// ── Topology resolution ──
//
// Integration graph repair, virtual-node removal, ceiling inheritance, and
// HTB depth flattening.

pub mod graph;
pub mod inherit;
pub mod virtual_nodes;

pub use graph::NetworkGraph;
pub use inherit::{
    HTB_MAX_DEPTH, MAX_NODE_DEPTH, ensure_unique_names, flatten, inherit_ceilings,
};
pub use virtual_nodes::{build_logical_to_physical_map, build_physical_network};
