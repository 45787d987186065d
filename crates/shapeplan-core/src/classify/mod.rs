// ── Class-ID assignment ──
//
// Final tree → resolved plan → queue program.

pub mod emit;
pub mod layout;
pub mod plan;

pub use emit::emit_batch;
pub use layout::{
    ClassIdAllocator, DEFAULT_MINOR, FIRST_MINOR, InterfaceLayout, MQ_MAJOR, ROOT_MINOR,
};
pub use plan::{
    NODE_RATE_FACTOR, PerDirection, PlanEntry, ResolvedCircuit, ResolvedNode, ResolvedPlan,
    build_tree, circuit_rates, resolve,
};
