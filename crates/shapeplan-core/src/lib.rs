//! Control-plane compiler for an ISP traffic shaper.
//!
//! Turns a declarative network hierarchy and a subscriber circuit table into
//! a collision-free HTB program sharded across CPU queues, and decides on
//! every run whether that program must be rebuilt, patched, or left alone:
//!
//! - **[`topology`]**: [`NetworkGraph`](topology::NetworkGraph) for raw
//!   integration data, virtual-node removal, ceiling inheritance, and
//!   depth flattening on the [`TopologyDocument`].
//!
//! - **[`circuits`]**: Circuit table parsing, TCP-overhead adjustment,
//!   device merging, and validation into a [`ValidationReport`].
//!
//! - **[`shard`]**: CPU queue planning: generated shard nodes, round-robin
//!   and bin-packing placement, and the damped rendezvous planner with
//!   persisted [`PlannerState`].
//!
//! - **[`classify`]**: Single traversal that assigns `major:minor` handles
//!   into a [`ResolvedPlan`] and emits the [`QueueBatch`].
//!
//! - **[`reload`]**: Full / incremental / no-op decisions, last-known-good
//!   fallback, and incremental [`Patch`] building.
//!
//! - **[`pipeline`]**: The end-to-end [`prepare`] → [`compile`] →
//!   [`reload`](pipeline::reload) flow over a [`StateDir`] and an
//!   [`ExecutionBus`].

pub mod bus;
pub mod circuits;
pub mod classify;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod reload;
pub mod shard;
pub mod store;
pub mod topology;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bus::ExecutionBus;
pub use circuits::{ValidationIssue, ValidationReport};
pub use classify::ResolvedPlan;
pub use config::ShaperSettings;
pub use error::{CoreError, ErrorCategory};
pub use pipeline::{Compiled, Prepared, ReloadOutcome, ReloadRequest, compile, prepare};
pub use reload::{DocumentSet, Patch, ReloadDecision, ReloadState};
pub use shard::{PlannerParams, PlannerState, ShardStrategy, TopLevelStrategy};
pub use store::StateDir;

pub use model::{
    Circuit, CircuitRow, ClassId, Device, Direction, IpMapping, NetworkNode, NodeSpec, NodeType,
    ParentNode, QueueAction, QueueBatch, QueueOperation, TopologyDocument,
};
