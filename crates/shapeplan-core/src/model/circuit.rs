// ── Circuits and devices ──

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a circuit is shaped: a named topology node, or unassigned.
///
/// Unassigned circuits ("none" in the table) are placed by the shard planner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "name")]
pub enum ParentNode {
    Named(String),
    Unassigned,
}

impl ParentNode {
    /// Interpret the `Parent Node` column. Empty and "none" both mean unassigned.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            Self::Unassigned
        } else {
            Self::Named(trimmed.to_owned())
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Named(name) => Some(name),
            Self::Unassigned => None,
        }
    }

    pub fn is_unassigned(&self) -> bool {
        matches!(self, Self::Unassigned)
    }
}

impl fmt::Display for ParentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::Unassigned => write!(f, "none"),
        }
    }
}

/// A piece of customer equipment belonging to exactly one circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub device_name: String,
    pub mac: String,
    pub ipv4: Vec<String>,
    pub ipv6: Vec<String>,
    pub comment: String,
}

impl Device {
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.ipv4.iter().chain(self.ipv6.iter()).map(String::as_str)
    }
}

/// A shaped subscriber circuit. Bandwidth figures already include TCP overhead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Circuit {
    pub circuit_id: String,
    pub circuit_name: String,
    pub parent_node: ParentNode,
    pub devices: Vec<Device>,
    pub min_download_mbps: f64,
    pub min_upload_mbps: f64,
    pub max_download_mbps: f64,
    pub max_upload_mbps: f64,
}

impl Circuit {
    /// Every IP/subnet across all devices, in table order.
    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().flat_map(Device::addresses)
    }

    pub fn has_addresses(&self) -> bool {
        self.addresses().next().is_some()
    }

    /// Comment carried into queue operations: the circuit name, or its id.
    pub fn label(&self) -> &str {
        if self.circuit_name.is_empty() {
            &self.circuit_id
        } else {
            &self.circuit_name
        }
    }

    /// Exact comparison: both sides went through the same rounding.
    #[allow(clippy::float_cmp)]
    pub(crate) fn same_bandwidth(&self, other: &Self) -> bool {
        self.min_download_mbps == other.min_download_mbps
            && self.min_upload_mbps == other.min_upload_mbps
            && self.max_download_mbps == other.max_download_mbps
            && self.max_upload_mbps == other.max_upload_mbps
    }
}

/// One raw row of the circuit table, as read from or written to disk.
///
/// Bandwidth columns are kept as text here; the loader parses and validates them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitRow {
    pub circuit_id: String,
    pub circuit_name: String,
    pub device_id: String,
    pub device_name: String,
    pub parent_node: String,
    pub mac: String,
    pub ipv4: String,
    pub ipv6: String,
    pub download_min_mbps: String,
    pub upload_min_mbps: String,
    pub download_max_mbps: String,
    pub upload_max_mbps: String,
    pub comment: String,
}

impl CircuitRow {
    pub const HEADER: [&'static str; 13] = [
        "Circuit ID",
        "Circuit Name",
        "Device ID",
        "Device Name",
        "Parent Node",
        "MAC",
        "IPv4",
        "IPv6",
        "Download Min Mbps",
        "Upload Min Mbps",
        "Download Max Mbps",
        "Upload Max Mbps",
        "Comment",
    ];

    /// Build a row from a positional record, tolerating short rows.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> Self {
        let mut it = fields.into_iter().map(|f| f.trim().to_owned());
        let mut next = || it.next().unwrap_or_default();
        Self {
            circuit_id: next(),
            circuit_name: next(),
            device_id: next(),
            device_name: next(),
            parent_node: next(),
            mac: next(),
            ipv4: next(),
            ipv6: next(),
            download_min_mbps: next(),
            upload_min_mbps: next(),
            download_max_mbps: next(),
            upload_max_mbps: next(),
            comment: next(),
        }
    }

    pub fn fields(&self) -> [&str; 13] {
        [
            self.circuit_id.as_str(),
            self.circuit_name.as_str(),
            self.device_id.as_str(),
            self.device_name.as_str(),
            self.parent_node.as_str(),
            self.mac.as_str(),
            self.ipv4.as_str(),
            self.ipv6.as_str(),
            self.download_min_mbps.as_str(),
            self.upload_min_mbps.as_str(),
            self.download_max_mbps.as_str(),
            self.upload_max_mbps.as_str(),
            self.comment.as_str(),
        ]
    }
}
