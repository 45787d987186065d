// ── Network graph nodes ──

use serde::{Deserialize, Serialize};

/// Role of a node in the integration graph.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum NodeType {
    Root,
    Site,
    Ap,
    Client,
    ClientWithChildren,
    Device,
    Virtual,
}

impl NodeType {
    /// Site, AP and virtual grouping nodes belong in the topology document;
    /// clients become circuits and devices hang off them.
    pub fn is_structural(self) -> bool {
        matches!(self, Self::Site | Self::Ap | Self::Virtual)
    }
}

/// One vertex of the integration graph.
///
/// `parent_index` is owned by the graph and rewritten by its repair passes;
/// `parent_id` is what the integration declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNode {
    pub id: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(skip)]
    pub parent_index: Option<usize>,
    #[serde(default)]
    pub download_mbps: f64,
    #[serde(default)]
    pub upload_mbps: f64,
    #[serde(rename = "virtual", default)]
    pub is_virtual: bool,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub ipv4: Vec<String>,
    #[serde(default)]
    pub ipv6: Vec<String>,
}

impl NetworkNode {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            node_type,
            parent_id: None,
            parent_index: None,
            download_mbps: 0.0,
            upload_mbps: 0.0,
            is_virtual: false,
            address: None,
            mac: None,
            ipv4: Vec::new(),
            ipv6: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_bandwidth(mut self, download_mbps: f64, upload_mbps: f64) -> Self {
        self.download_mbps = download_mbps;
        self.upload_mbps = upload_mbps;
        self
    }

    pub fn has_addresses(&self) -> bool {
        !self.ipv4.is_empty() || !self.ipv6.is_empty()
    }
}
