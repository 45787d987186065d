// ── Topology document ──
//
// The declarative network hierarchy: node name → ceilings + children.
// `IndexMap` keeps document order so traversal (and therefore class-ID
// assignment) is stable across runs.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Top level of the topology document.
pub type TopologyDocument = IndexMap<String, NodeSpec>;

/// One node of the topology document as written by operators/integrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub download_bandwidth_mbps: f64,
    pub upload_bandwidth_mbps: f64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub node_type: Option<String>,
    #[serde(rename = "virtual", default, skip_serializing_if = "is_false")]
    pub is_virtual: bool,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub children: IndexMap<String, NodeSpec>,
    /// Keys we do not interpret (ids, coordinates, ...), preserved verbatim.
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl NodeSpec {
    pub fn new(download_mbps: f64, upload_mbps: f64) -> Self {
        Self {
            download_bandwidth_mbps: download_mbps,
            upload_bandwidth_mbps: upload_mbps,
            node_type: None,
            is_virtual: false,
            children: IndexMap::new(),
            extra: IndexMap::new(),
        }
    }

    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = Some(node_type.into());
        self
    }

    pub fn with_child(mut self, name: impl Into<String>, child: Self) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    pub fn virtual_node(mut self) -> Self {
        self.is_virtual = true;
        self
    }

    /// Logical-only node: `"virtual": true` or the legacy `"type": "virtual"`.
    pub fn is_virtual(&self) -> bool {
        self.is_virtual
            || self
                .node_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("virtual"))
    }

    /// Depth of the subtree rooted here (a childless node has depth 1).
    pub fn depth(&self) -> usize {
        1 + self.children.values().map(Self::depth).max().unwrap_or(0)
    }
}

/// Parse a topology document. An empty object is a valid (flat) network.
pub fn parse_topology(text: &str) -> Result<TopologyDocument, CoreError> {
    if text.trim().is_empty() {
        return Ok(TopologyDocument::new());
    }
    serde_json::from_str(text).map_err(CoreError::TopologyParse)
}

/// Maximum depth over every top-level subtree.
pub fn document_depth(doc: &TopologyDocument) -> usize {
    doc.values().map(NodeSpec::depth).max().unwrap_or(0)
}

/// Visit every node name in pre-order.
pub fn walk_names<'a>(doc: &'a TopologyDocument, visit: &mut impl FnMut(&'a str, &'a NodeSpec)) {
    for (name, node) in doc {
        visit(name, node);
        walk_names(&node.children, visit);
    }
}

// ── Resolved tree ───────────────────────────────────────────────────

/// Node of the final tree handed to class-ID assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub name: String,
    pub download_mbps: f64,
    pub upload_mbps: f64,
    pub body: NodeBody,
}

/// Whether a node carries anything beneath it.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeBody {
    /// No child nodes and no circuits.
    Leaf,
    /// Child nodes and/or circuits (indices into the circuit list).
    Structural {
        children: Vec<TreeNode>,
        circuits: Vec<usize>,
    },
}

impl TreeNode {
    pub fn children(&self) -> &[TreeNode] {
        match &self.body {
            NodeBody::Leaf => &[],
            NodeBody::Structural { children, .. } => children,
        }
    }

    pub fn circuits(&self) -> &[usize] {
        match &self.body {
            NodeBody::Leaf => &[],
            NodeBody::Structural { circuits, .. } => circuits,
        }
    }
}
