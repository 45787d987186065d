// ── Domain model ──
//
// Canonical types shared by every pass of the compiler: graph nodes fed by
// integrations, the topology document, circuits, and the produced queue
// operations / IP mappings.

pub mod circuit;
pub mod node;
pub mod queue;
pub mod topology;

// ── Re-exports ──────────────────────────────────────────────────────

pub use circuit::{Circuit, CircuitRow, Device, ParentNode};
pub use node::{NetworkNode, NodeType};
pub use queue::{ClassId, Direction, IpMapping, QueueAction, QueueBatch, QueueOperation};
pub use topology::{NodeBody, NodeSpec, TopologyDocument, TreeNode};
