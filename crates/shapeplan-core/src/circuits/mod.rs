// ── Circuit table ──

pub mod loader;
pub mod validate;
pub mod writer;

pub use loader::{
    LoadOptions, LoadedCircuits, MONITOR_ONLY_MBPS, NumberedRow, TCP_OVERHEAD_FACTOR,
    load_circuit_table, load_circuits, parse_circuit_table,
};
pub use validate::{IssueKind, Severity, ValidationIssue, ValidationReport, check_address};
pub use writer::write_circuit_table;
