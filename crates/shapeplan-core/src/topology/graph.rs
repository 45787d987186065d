// ── Integration graph ──
//
// Arena of nodes addressed by index; index 0 is always the root. Integrations
// insert raw nodes, then `prepare_tree` repairs the shape (promotion, site
// collapse, reconnection) before the graph is exported as the two canonical
// input documents.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::model::{CircuitRow, NetworkNode, NodeSpec, NodeType, TopologyDocument};

pub const ROOT_ID: &str = "root";
const ROOT_NAME: &str = "Shaper Root";

/// Serialized graph handed over by an integration.
#[derive(Debug, Deserialize)]
struct GraphDocument {
    nodes: Vec<NetworkNode>,
}

#[derive(Debug, Clone)]
pub struct NetworkGraph {
    nodes: Vec<NetworkNode>,
    excluded: HashSet<String>,
}

impl NetworkGraph {
    pub fn new(excluded_sites: impl IntoIterator<Item = String>) -> Self {
        Self {
            nodes: vec![NetworkNode::new(ROOT_ID, ROOT_NAME, NodeType::Root)],
            excluded: excluded_sites.into_iter().collect(),
        }
    }

    /// Build an (unprepared) graph from `{"nodes": [...]}`.
    pub fn from_document(
        text: &str,
        excluded_sites: impl IntoIterator<Item = String>,
    ) -> Result<Self, CoreError> {
        let doc: GraphDocument = serde_json::from_str(text).map_err(CoreError::TopologyParse)?;
        let mut graph = Self::new(excluded_sites);
        for node in doc.nodes {
            if node.node_type == NodeType::Root {
                graph.replace_root(node);
            } else {
                graph.add_raw_node(node);
            }
        }
        Ok(graph)
    }

    pub fn nodes(&self) -> &[NetworkNode] {
        &self.nodes
    }

    /// Insert a node under the root. Returns `false` if its name is excluded.
    pub fn add_raw_node(&mut self, mut node: NetworkNode) -> bool {
        if self.excluded.contains(&node.display_name) {
            debug!(node = %node.display_name, "skipping excluded node");
            return false;
        }
        node.parent_index = Some(0);
        self.nodes.push(node);
        true
    }

    pub fn replace_root(&mut self, mut node: NetworkNode) {
        node.parent_index = None;
        node.node_type = NodeType::Root;
        self.nodes[0] = node;
    }

    /// Insert `node` beneath the node whose id (or, failing that, display name) is `parent`.
    pub fn add_child(&mut self, parent: &str, mut node: NetworkNode) -> Result<usize, CoreError> {
        let parent_index = self
            .find_by_id(parent)
            .or_else(|| self.nodes.iter().position(|n| n.display_name == parent))
            .ok_or_else(|| CoreError::NodeNotFound {
                name: parent.to_owned(),
            })?;
        if self.excluded.contains(&node.display_name) {
            debug!(node = %node.display_name, "skipping excluded node");
            return Ok(parent_index);
        }
        node.parent_id = Some(self.nodes[parent_index].id.clone());
        node.parent_index = Some(parent_index);
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    fn find_by_id(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    /// Point every node at its declared parent. Unknown parents leave the node where it is.
    pub fn reparent_by_declared_parent_id(&mut self) {
        let mut by_id: HashMap<String, usize> = HashMap::new();
        for (idx, node) in self.nodes.iter().enumerate() {
            by_id.entry(node.id.clone()).or_insert(idx);
        }
        for idx in 1..self.nodes.len() {
            let Some(parent_id) = self.nodes[idx].parent_id.clone() else {
                continue;
            };
            match by_id.get(&parent_id) {
                Some(&parent) if parent != idx => self.nodes[idx].parent_index = Some(parent),
                Some(_) => warn!(node = %self.nodes[idx].id, "node declares itself as parent"),
                None => {
                    debug!(node = %self.nodes[idx].id, %parent_id, "declared parent not in graph");
                }
            }
        }
    }

    pub fn find_child_indices(&self, parent: usize) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(idx, n)| *idx != parent && n.parent_index == Some(parent))
            .map(|(idx, _)| idx)
            .collect()
    }

    /// A client with anything other than devices beneath it becomes `clientWithChildren`.
    pub fn promote_clients_with_children(&mut self) {
        for idx in 0..self.nodes.len() {
            if self.nodes[idx].node_type != NodeType::Client {
                continue;
            }
            let has_structure = self
                .find_child_indices(idx)
                .into_iter()
                .any(|child| self.nodes[child].node_type != NodeType::Device);
            if has_structure {
                debug!(node = %self.nodes[idx].id, "promoting client with children");
                self.nodes[idx].node_type = NodeType::ClientWithChildren;
            }
        }
    }

    /// Give each `clientWithChildren` a generated site that adopts the client
    /// and its non-device children; the client itself reverts to a plain client.
    pub fn collapse_clients_with_children_to_sites(&mut self) {
        let original_len = self.nodes.len();
        for idx in 0..original_len {
            if self.nodes[idx].node_type != NodeType::ClientWithChildren {
                continue;
            }
            let client = &self.nodes[idx];
            let mut site = NetworkNode::new(
                format!("{}_gen", client.id),
                format!("(Generated Site) {}", client.display_name),
                NodeType::Site,
            )
            .with_bandwidth(client.download_mbps, client.upload_mbps);
            site.parent_id.clone_from(&client.parent_id);
            site.parent_index = client.parent_index;

            let site_index = self.nodes.len();
            let site_id = site.id.clone();
            self.nodes.push(site);

            for child in self.find_child_indices(idx) {
                if self.nodes[child].node_type != NodeType::Device {
                    self.nodes[child].parent_index = Some(site_index);
                    self.nodes[child].parent_id = Some(site_id.clone());
                }
            }
            let client = &mut self.nodes[idx];
            client.parent_index = Some(site_index);
            client.parent_id = Some(site_id);
            client.node_type = NodeType::Client;
        }
    }

    fn children_lists(&self) -> Vec<Vec<usize>> {
        let mut children = vec![Vec::new(); self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Some(parent) = node.parent_index {
                if parent != idx && parent < self.nodes.len() {
                    children[parent].push(idx);
                }
            }
        }
        children
    }

    fn reachable(&self) -> Vec<bool> {
        let children = self.children_lists();
        let mut seen = vec![false; self.nodes.len()];
        let mut queue = VecDeque::from([0]);
        seen[0] = true;
        while let Some(idx) = queue.pop_front() {
            for &child in &children[idx] {
                if !seen[child] {
                    seen[child] = true;
                    queue.push_back(child);
                }
            }
        }
        seen
    }

    /// Indices not reachable from the root (including members of parent cycles).
    pub fn unconnected(&self) -> Vec<usize> {
        self.reachable()
            .iter()
            .enumerate()
            .filter(|(_, seen)| !**seen)
            .map(|(idx, _)| idx)
            .collect()
    }

    /// Re-attach unreachable nodes to the root: sites first, then clients with
    /// children, then clients, recomputing reachability between sweeps so a
    /// node adopted through an earlier sweep stays where it is.
    pub fn reconnect_unconnected(&mut self) {
        for sweep in [NodeType::Site, NodeType::ClientWithChildren, NodeType::Client] {
            for idx in self.unconnected() {
                if self.nodes[idx].node_type == sweep {
                    debug!(node = %self.nodes[idx].id, "reconnecting to root");
                    self.nodes[idx].parent_index = Some(0);
                }
            }
        }
        for idx in self.unconnected() {
            let node = &mut self.nodes[idx];
            if node.node_type == NodeType::Device {
                warn!(device = %node.id, "device unreachable from root; it will not be exported");
            } else {
                warn!(node = %node.id, node_type = %node.node_type, "unreachable node re-attached to root");
                node.parent_index = Some(0);
            }
        }
    }

    /// Run every repair pass in order.
    pub fn prepare_tree(&mut self) {
        self.reparent_by_declared_parent_id();
        self.promote_clients_with_children();
        self.collapse_clients_with_children_to_sites();
        self.reconnect_unconnected();
    }

    // ── Export ──────────────────────────────────────────────────────

    /// Topology document holding the structural (site/AP/virtual) nodes.
    pub fn to_network_document(&self) -> Result<TopologyDocument, CoreError> {
        let children = self.children_lists();
        self.export_level(&children, 0)
    }

    fn export_level(
        &self,
        children: &[Vec<usize>],
        parent: usize,
    ) -> Result<TopologyDocument, CoreError> {
        let mut level = TopologyDocument::new();
        for &idx in &children[parent] {
            let node = &self.nodes[idx];
            if !node.node_type.is_structural() {
                continue;
            }
            if level.contains_key(&node.display_name) {
                return Err(CoreError::DuplicateNodeName {
                    name: node.display_name.clone(),
                });
            }
            let mut extra = IndexMap::new();
            extra.insert("id".to_owned(), serde_json::Value::String(node.id.clone()));
            let spec = NodeSpec {
                download_bandwidth_mbps: node.download_mbps,
                upload_bandwidth_mbps: node.upload_mbps,
                node_type: Some(node.node_type.to_string()),
                is_virtual: node.is_virtual || node.node_type == NodeType::Virtual,
                children: self.export_level(children, idx)?,
                extra,
            };
            level.insert(node.display_name.clone(), spec);
        }
        Ok(level)
    }

    /// Nearest structural ancestor's display name, if any.
    fn structural_parent(&self, idx: usize) -> Option<&str> {
        let mut cursor = self.nodes[idx].parent_index;
        for _ in 0..self.nodes.len() {
            let parent = cursor?;
            let node = &self.nodes[parent];
            if node.node_type.is_structural() {
                return Some(&node.display_name);
            }
            cursor = node.parent_index;
        }
        None
    }

    /// Circuit table rows for every reachable client.
    ///
    /// Committed (min) rate is `max × committed_multiplier`, rounded, at least 1.
    pub fn to_circuit_rows(&self, committed_multiplier: f64) -> Vec<CircuitRow> {
        let reachable = self.reachable();
        let children = self.children_lists();
        let mut rows = Vec::new();

        for (idx, client) in self.nodes.iter().enumerate() {
            if client.node_type != NodeType::Client || !reachable[idx] {
                continue;
            }
            let parent = self.structural_parent(idx).unwrap_or("none");
            let template = CircuitRow {
                circuit_id: client.id.clone(),
                circuit_name: client.display_name.clone(),
                parent_node: parent.to_owned(),
                download_min_mbps: format_mbps(committed(client.download_mbps, committed_multiplier)),
                upload_min_mbps: format_mbps(committed(client.upload_mbps, committed_multiplier)),
                download_max_mbps: format_mbps(client.download_mbps),
                upload_max_mbps: format_mbps(client.upload_mbps),
                comment: client.address.clone().unwrap_or_default(),
                ..CircuitRow::default()
            };

            let devices: Vec<&NetworkNode> = children[idx]
                .iter()
                .map(|&child| &self.nodes[child])
                .filter(|n| n.node_type == NodeType::Device)
                .collect();

            if devices.is_empty() {
                if !client.has_addresses() {
                    warn!(client = %client.id, "client has no devices and no addresses; skipped");
                    continue;
                }
                rows.push(device_row(&template, client));
            } else {
                rows.extend(devices.into_iter().map(|device| device_row(&template, device)));
            }
        }
        rows
    }
}

fn committed(max_mbps: f64, multiplier: f64) -> f64 {
    (max_mbps * multiplier).round().max(1.0)
}

fn format_mbps(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn device_row(template: &CircuitRow, device: &NetworkNode) -> CircuitRow {
    CircuitRow {
        device_id: device.id.clone(),
        device_name: device.display_name.clone(),
        mac: device.mac.clone().unwrap_or_default(),
        ipv4: device.ipv4.join(","),
        ipv6: device.ipv6.join(","),
        ..template.clone()
    }
}
