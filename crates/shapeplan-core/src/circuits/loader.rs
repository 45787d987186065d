// ── Circuit table loading ──
//
// Rows → merged circuits. Each row is one device; rows sharing a circuit id
// are folded into one circuit. Bandwidth gets the TCP overhead applied here,
// so every later stage works with on-the-wire figures.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::circuits::validate::{IssueKind, ValidationReport, check_address};
use crate::error::CoreError;
use crate::model::{Circuit, CircuitRow, Device, ParentNode};

/// Multiplier applied to every declared bandwidth to cover TCP/IP overhead.
pub const TCP_OVERHEAD_FACTOR: f64 = 1.09;

/// Ceiling given to every circuit in monitor-only mode.
pub const MONITOR_ONLY_MBPS: f64 = 10_000.0;

const MIN_RATE_FLOOR: f64 = 1.0;
const MAX_RATE_FLOOR: f64 = 2.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    pub monitor_only: bool,
}

/// Result of a load: usable circuits plus everything worth telling the operator.
#[derive(Debug, Clone, Default)]
pub struct LoadedCircuits {
    pub circuits: Vec<Circuit>,
    pub report: ValidationReport,
}

/// A parsed row together with its line in the source table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberedRow {
    pub line: u64,
    pub row: CircuitRow,
}

/// Split the delimited circuit table into rows. The header and `#` comment
/// lines are skipped; short rows are padded.
pub fn parse_circuit_table(text: &str) -> Result<Vec<NumberedRow>, CoreError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        rows.push(NumberedRow {
            line: record.position().map_or(0, csv::Position::line),
            row: CircuitRow::from_fields(record.iter()),
        });
    }
    Ok(rows)
}

/// Convenience: parse then load.
pub fn load_circuit_table(text: &str, options: LoadOptions) -> Result<LoadedCircuits, CoreError> {
    load_circuits(&parse_circuit_table(text)?, options)
}

/// Fold rows into circuits and validate them.
///
/// Only a hierarchy mismatch between merged rows is an error; every other
/// problem is recorded in the report and the offending value or row skipped.
pub fn load_circuits(rows: &[NumberedRow], options: LoadOptions) -> Result<LoadedCircuits, CoreError> {
    let mut report = ValidationReport::default();
    let mut circuits: IndexMap<String, Circuit> = IndexMap::new();
    // canonical address → owning circuit
    let mut seen_ips: HashMap<String, String> = HashMap::new();

    for NumberedRow { line, row } in rows {
        let line = Some(*line);
        if row.circuit_id.is_empty() {
            report.push(line, "", IssueKind::MissingCircuitId);
            continue;
        }
        let Some(bandwidth) = parse_bandwidth(row, line, &mut report) else {
            continue;
        };
        let bandwidth = if options.monitor_only {
            [MONITOR_ONLY_MBPS; 4]
        } else {
            bandwidth.map(with_overhead)
        };
        let device = build_device(row, line, &mut seen_ips, &mut report);
        let parent = ParentNode::parse(&row.parent_node);

        match circuits.get_mut(&row.circuit_id) {
            Some(existing) => {
                merge_parent(existing, parent)?;
                let candidate = circuit_from(row, ParentNode::Unassigned, bandwidth);
                if !existing.same_bandwidth(&candidate) {
                    report.push(line, &row.circuit_id, IssueKind::BandwidthMismatch);
                }
                existing.devices.extend(device);
            }
            None => {
                let mut circuit = circuit_from(row, parent, bandwidth);
                circuit.devices.extend(device);
                circuits.insert(row.circuit_id.clone(), circuit);
            }
        }
    }

    let total = circuits.len();
    let circuits: Vec<Circuit> = circuits
        .into_values()
        .filter(|circuit| {
            let reason = if circuit.devices.is_empty() {
                Some("no devices")
            } else if !circuit.has_addresses() {
                Some("no valid IP addresses")
            } else {
                None
            };
            if let Some(reason) = reason {
                warn!(circuit_id = %circuit.circuit_id, reason, "dropping circuit");
                report.push(None, &circuit.circuit_id, IssueKind::CircuitDropped { reason });
            }
            reason.is_none()
        })
        .collect();

    info!(
        rows = rows.len(),
        circuits = circuits.len(),
        dropped = total - circuits.len(),
        issues = report.issues.len(),
        "circuit table loaded"
    );
    Ok(LoadedCircuits { circuits, report })
}

fn with_overhead(mbps: f64) -> f64 {
    (mbps * TCP_OVERHEAD_FACTOR).round()
}

const BANDWIDTH_FIELDS: [&str; 4] = [
    "Download Min Mbps",
    "Upload Min Mbps",
    "Download Max Mbps",
    "Upload Max Mbps",
];

/// `[min_dl, min_ul, max_dl, max_ul]` as declared, or `None` if any is unusable.
fn parse_bandwidth(row: &CircuitRow, line: Option<u64>, report: &mut ValidationReport) -> Option<[f64; 4]> {
    let raw = [
        &row.download_min_mbps,
        &row.upload_min_mbps,
        &row.download_max_mbps,
        &row.upload_max_mbps,
    ];
    let mut values = [0.0; 4];
    let mut usable = true;
    for (slot, (&field, text)) in BANDWIDTH_FIELDS.iter().zip(raw).enumerate() {
        match text.parse::<f64>() {
            Ok(value) if value.is_finite() => values[slot] = value,
            _ => {
                report.push(
                    line,
                    &row.circuit_id,
                    IssueKind::NotNumeric {
                        field,
                        value: text.clone(),
                    },
                );
                usable = false;
            }
        }
    }
    if !usable {
        return None;
    }

    for (slot, &field) in BANDWIDTH_FIELDS.iter().enumerate() {
        let minimum = if slot < 2 { MIN_RATE_FLOOR } else { MAX_RATE_FLOOR };
        if values[slot] < minimum {
            report.push(
                line,
                &row.circuit_id,
                IssueKind::BandwidthTooLow {
                    field,
                    value: values[slot],
                    minimum,
                },
            );
        }
    }
    for (direction, min, max) in [("download", values[0], values[2]), ("upload", values[1], values[3])] {
        if min > max {
            report.push(
                line,
                &row.circuit_id,
                IssueKind::MinExceedsMax { direction, min, max },
            );
        }
    }
    Some(values)
}

fn build_device(
    row: &CircuitRow,
    line: Option<u64>,
    seen_ips: &mut HashMap<String, String>,
    report: &mut ValidationReport,
) -> Option<Device> {
    if row.device_id.is_empty() && row.ipv4.is_empty() && row.ipv6.is_empty() {
        debug!(circuit_id = %row.circuit_id, "row carries no device");
        return None;
    }
    let mut accept = |column: &str| -> Vec<String> {
        split_addresses(column)
            .filter(|ip| {
                let Some(checked) = check_address(ip) else {
                    report.push(line, &row.circuit_id, IssueKind::MalformedIp { ip: (*ip).to_owned() });
                    return false;
                };
                if let Some(network) = checked.host_bits {
                    report.push(
                        line,
                        &row.circuit_id,
                        IssueKind::HostBitsSet {
                            ip: (*ip).to_owned(),
                            network,
                        },
                    );
                }
                if let Some(owner) = seen_ips.get(&checked.key) {
                    report.push(
                        line,
                        &row.circuit_id,
                        IssueKind::DuplicateIp {
                            ip: (*ip).to_owned(),
                            first_circuit: owner.clone(),
                        },
                    );
                    return false;
                }
                seen_ips.insert(checked.key, row.circuit_id.clone());
                true
            })
            .map(str::to_owned)
            .collect()
    };
    let ipv4 = accept(&row.ipv4);
    let ipv6 = accept(&row.ipv6);

    Some(Device {
        device_id: row.device_id.clone(),
        device_name: row.device_name.clone(),
        mac: row.mac.clone(),
        ipv4,
        ipv6,
        comment: row.comment.clone(),
    })
}

fn split_addresses(column: &str) -> impl Iterator<Item = &str> {
    column.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn circuit_from(row: &CircuitRow, parent_node: ParentNode, bandwidth: [f64; 4]) -> Circuit {
    let [min_download_mbps, min_upload_mbps, max_download_mbps, max_upload_mbps] = bandwidth;
    Circuit {
        circuit_id: row.circuit_id.clone(),
        circuit_name: row.circuit_name.clone(),
        parent_node,
        devices: Vec::new(),
        min_download_mbps,
        min_upload_mbps,
        max_download_mbps,
        max_upload_mbps,
    }
}

fn merge_parent(existing: &mut Circuit, parent: ParentNode) -> Result<(), CoreError> {
    match (&existing.parent_node, parent) {
        (ParentNode::Named(first), ParentNode::Named(second)) if *first != second => {
            Err(CoreError::HierarchyMismatch {
                circuit_id: existing.circuit_id.clone(),
                first: first.clone(),
                second,
            })
        }
        (ParentNode::Unassigned, named @ ParentNode::Named(_)) => {
            existing.parent_node = named;
            Ok(())
        }
        _ => Ok(()),
    }
}
