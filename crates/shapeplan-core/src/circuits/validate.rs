// ── Validation findings ──
//
// Findings never abort a load on their own. Warnings collectively decide
// whether a run is safe to apply; notices are surfaced but never gate.

use std::fmt;
use std::net::IpAddr;

use ipnet::IpNet;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, strum::Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Notice,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum IssueKind {
    MissingCircuitId,
    DuplicateIp { ip: String, first_circuit: String },
    MalformedIp { ip: String },
    /// A subnet written with host bits set, e.g. `192.168.1.1/24`.
    HostBitsSet { ip: String, network: String },
    NotNumeric { field: &'static str, value: String },
    BandwidthTooLow { field: &'static str, value: f64, minimum: f64 },
    MinExceedsMax { direction: &'static str, min: f64, max: f64 },
    /// Merged rows disagree on bandwidth; the first row's values are kept.
    BandwidthMismatch,
    UnknownParent { parent: String },
    CircuitDropped { reason: &'static str },
}

impl IssueKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::HostBitsSet { .. } | Self::CircuitDropped { .. } => Severity::Notice,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCircuitId => write!(f, "row has no circuit id"),
            Self::DuplicateIp { ip, first_circuit } => {
                write!(f, "IP {ip} is already used by circuit {first_circuit}")
            }
            Self::MalformedIp { ip } => write!(f, "'{ip}' is not a valid IP address or subnet"),
            Self::HostBitsSet { ip, network } => {
                write!(f, "{ip} has host bits set (network is {network})")
            }
            Self::NotNumeric { field, value } => write!(f, "{field} '{value}' is not a number"),
            Self::BandwidthTooLow {
                field,
                value,
                minimum,
            } => write!(f, "{field} {value} is below the minimum of {minimum} Mbps"),
            Self::MinExceedsMax {
                direction,
                min,
                max,
            } => write!(f, "{direction} min {min} exceeds max {max}"),
            Self::BandwidthMismatch => {
                write!(f, "rows of this circuit declare different bandwidths")
            }
            Self::UnknownParent { parent } => {
                write!(f, "parent node '{parent}' is not in the network; treating as unassigned")
            }
            Self::CircuitDropped { reason } => write!(f, "circuit dropped: {reason}"),
        }
    }
}

/// One finding, located by table line and circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    /// 1-based line in the circuit table, when the finding comes from a row.
    pub line: Option<u64>,
    pub circuit_id: String,
    #[serde(flatten)]
    pub kind: IssueKind,
}

impl ValidationIssue {
    pub fn severity(&self) -> Severity {
        self.kind.severity()
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(line) = self.line {
            write!(f, "line {line}: ")?;
        }
        if !self.circuit_id.is_empty() {
            write!(f, "circuit {}: ", self.circuit_id)?;
        }
        write!(f, "{}", self.kind)
    }
}

/// Aggregated findings of one load.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn push(&mut self, line: Option<u64>, circuit_id: &str, kind: IssueKind) {
        self.issues.push(ValidationIssue {
            line,
            circuit_id: circuit_id.to_owned(),
            kind,
        });
    }

    /// Safe to apply: no warning-level findings.
    pub fn passed(&self) -> bool {
        self.warnings().next().is_none()
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity() == Severity::Warning)
    }

    pub fn notices(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity() == Severity::Notice)
    }

    pub fn extend(&mut self, other: Self) {
        self.issues.extend(other.issues);
    }
}

// ── Address checks ──────────────────────────────────────────────────

/// A syntactically valid address entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedAddress {
    /// Canonical network form used for duplicate detection (`10.0.0.1/32`).
    pub key: String,
    /// Set when a subnet was written with host bits set.
    pub host_bits: Option<String>,
}

/// Parse a host address or CIDR subnet.
pub fn check_address(raw: &str) -> Option<CheckedAddress> {
    if let Ok(addr) = raw.parse::<IpAddr>() {
        return Some(CheckedAddress {
            key: IpNet::from(addr).to_string(),
            host_bits: None,
        });
    }
    let net: IpNet = raw.parse().ok()?;
    let trunc = net.trunc();
    Some(CheckedAddress {
        key: trunc.to_string(),
        host_bits: (trunc != net).then(|| trunc.to_string()),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn hosts_and_subnets_normalise_to_networks() {
        assert_eq!(check_address("100.64.0.1").unwrap().key, "100.64.0.1/32");
        assert_eq!(check_address("100.64.0.1/32").unwrap().key, "100.64.0.1/32");
        assert_eq!(check_address("2001:db8::/64").unwrap().key, "2001:db8::/64");
        assert!(check_address("300.1.1.1").is_none());
        assert!(check_address("10.0.0.0/33").is_none());
    }

    #[test]
    fn host_bits_are_flagged_not_rejected() {
        let checked = check_address("192.168.1.1/24").unwrap();
        assert_eq!(checked.host_bits.as_deref(), Some("192.168.1.0/24"));
        assert_eq!(checked.key, "192.168.1.0/24");
    }

    #[test]
    fn notices_do_not_fail_the_report() {
        let mut report = ValidationReport::default();
        report.push(
            Some(2),
            "c1",
            IssueKind::CircuitDropped {
                reason: "no devices",
            },
        );
        assert!(report.passed());
        report.push(
            Some(3),
            "c2",
            IssueKind::MalformedIp { ip: "nope".into() },
        );
        assert!(!report.passed());
        assert_eq!(report.warnings().count(), 1);
        assert_eq!(report.notices().count(), 1);
        assert_eq!(
            report.issues[1].to_string(),
            "line 3: circuit c2: 'nope' is not a valid IP address or subnet"
        );
    }
}
