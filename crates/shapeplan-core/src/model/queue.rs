// ── Produced queue program ──
//
// What the compiler hands to the execution bus: an ordered operation list
// (parents before children) and a batch of IP → class/CPU mappings.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// `major:minor` traffic-control handle, rendered in hex the way `tc` expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ClassId {
    pub major: u16,
    pub minor: u16,
}

impl ClassId {
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// Handle of the HTB qdisc owning this class (`major:`).
    pub fn qdisc_handle(self) -> String {
        format!("{:x}:", self.major)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}", self.major, self.minor)
    }
}

impl From<ClassId> for String {
    fn from(id: ClassId) -> Self {
        id.to_string()
    }
}

impl FromStr for ClassId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once(':')
            .ok_or_else(|| format!("class id '{s}' is not major:minor"))?;
        let major = u16::from_str_radix(major, 16).map_err(|e| format!("major in '{s}': {e}"))?;
        let minor = u16::from_str_radix(minor, 16).map_err(|e| format!("minor in '{s}': {e}"))?;
        Ok(Self { major, minor })
    }
}

impl TryFrom<String> for ClassId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Traffic direction. Download is shaped on interface A, upload on B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub const BOTH: [Self; 2] = [Self::Download, Self::Upload];

    /// Pick the value for this direction out of a `(download, upload)` pair.
    pub fn pick<T: Copy>(self, pair: (T, T)) -> T {
        match self {
            Self::Download => pair.0,
            Self::Upload => pair.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum QueueAction {
    AddQdisc,
    AddClass,
    ChangeClass,
    DeleteClass,
    DeleteQdisc,
}

/// One step of the queue program.
///
/// For classes `id` is the class handle and `parent` the parent class; for
/// qdiscs `parent` is the class (or mq slot) the qdisc hangs off and `id` its
/// handle when it has one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueOperation {
    pub interface: String,
    pub action: QueueAction,
    pub parent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ceil_mbps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qdisc_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl QueueOperation {
    /// Class operation. `parent` is a class id or, for a CPU root class, the
    /// owning qdisc handle.
    pub fn class(
        action: QueueAction,
        interface: &str,
        parent: impl Into<String>,
        id: ClassId,
        rate_mbps: f64,
        ceil_mbps: f64,
    ) -> Self {
        Self {
            interface: interface.to_owned(),
            action,
            parent: parent.into(),
            id: Some(id.to_string()),
            rate_mbps: Some(rate_mbps),
            ceil_mbps: Some(ceil_mbps),
            qdisc_kind: None,
            comment: None,
        }
    }

    pub fn qdisc(
        action: QueueAction,
        interface: &str,
        parent: impl Into<String>,
        handle: Option<String>,
        kind: Option<&str>,
    ) -> Self {
        Self {
            interface: interface.to_owned(),
            action,
            parent: parent.into(),
            id: handle,
            rate_mbps: None,
            ceil_mbps: None,
            qdisc_kind: kind.map(str::to_owned),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

impl fmt::Display for QueueOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} parent {}", self.interface, self.action, self.parent)?;
        if let Some(id) = &self.id {
            write!(f, " id {id}")?;
        }
        if let (Some(rate), Some(ceil)) = (self.rate_mbps, self.ceil_mbps) {
            write!(f, " rate {rate}mbit ceil {ceil}mbit")?;
        }
        if let Some(kind) = &self.qdisc_kind {
            write!(f, " {kind}")?;
        }
        if let Some(comment) = &self.comment {
            write!(f, " # {comment}")?;
        }
        Ok(())
    }
}

/// Classification entry: traffic for `ip` goes to `class_id` on CPU `cpu`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpMapping {
    pub ip: String,
    #[serde(rename = "classID")]
    pub class_id: ClassId,
    #[serde(rename = "cpuNum")]
    pub cpu: u32,
    #[serde(rename = "uploadDirection")]
    pub upload: bool,
}

/// Everything a full build hands to the execution bus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueBatch {
    pub operations: Vec<QueueOperation>,
    pub ip_mappings: Vec<IpMapping>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn class_id_renders_hex() {
        let id = ClassId::new(0x1a, 0x2f);
        assert_eq!(id.to_string(), "1a:2f");
        assert_eq!(id.qdisc_handle(), "1a:");
        assert_eq!("1a:2f".parse::<ClassId>().unwrap(), id);
    }

    #[test]
    fn class_id_rejects_garbage() {
        assert!("12".parse::<ClassId>().is_err());
        assert!("x:1".parse::<ClassId>().is_err());
    }

    #[test]
    fn ip_mapping_uses_wire_names() {
        let mapping = IpMapping {
            ip: "100.64.0.1".into(),
            class_id: ClassId::new(1, 3),
            cpu: 0,
            upload: false,
        };
        let json = serde_json::to_value(&mapping).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"ip": "100.64.0.1", "classID": "1:3", "cpuNum": 0, "uploadDirection": false})
        );
    }

    #[test]
    fn direction_picks_pair_member() {
        assert_eq!(Direction::Download.pick((1, 2)), 1);
        assert_eq!(Direction::Upload.pick((1, 2)), 2);
    }

    #[test]
    fn operation_renders_one_line() {
        let op = QueueOperation::class(
            QueueAction::AddClass,
            "eth1",
            "1:3",
            ClassId::new(1, 4),
            5.0,
            11.0,
        )
        .with_comment("Alice");
        assert_eq!(
            op.to_string(),
            "eth1 addClass parent 1:3 id 1:4 rate 5mbit ceil 11mbit # Alice"
        );
    }
}
