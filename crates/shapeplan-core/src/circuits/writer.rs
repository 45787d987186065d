// ── Circuit table writing ──

use crate::error::CoreError;
use crate::model::CircuitRow;

/// Render rows as a circuit table, header first.
pub fn write_circuit_table(rows: &[CircuitRow]) -> Result<String, CoreError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(CircuitRow::HEADER)?;
    for row in rows {
        writer.write_record(row.fields())?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| CoreError::io("circuit table", e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::circuits::loader::parse_circuit_table;

    #[test]
    fn written_table_reads_back() {
        let row = CircuitRow {
            circuit_id: "c1".into(),
            circuit_name: "Alice, Main St".into(),
            device_id: "d1".into(),
            parent_node: "AP_A".into(),
            ipv4: "100.64.0.1, 100.64.0.2".into(),
            download_min_mbps: "5".into(),
            upload_min_mbps: "5".into(),
            download_max_mbps: "10".into(),
            upload_max_mbps: "10".into(),
            ..CircuitRow::default()
        };
        let text = write_circuit_table(std::slice::from_ref(&row)).unwrap();
        assert!(text.starts_with("Circuit ID,Circuit Name,"));
        assert!(text.contains("\"Alice, Main St\""));

        let parsed = parse_circuit_table(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].line, 2);
        assert_eq!(parsed[0].row, row);
    }
}
