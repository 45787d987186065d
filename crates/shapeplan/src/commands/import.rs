//! `shapeplan import`: turn raw integration graph data into the two
//! input documents.

use std::fs;
use std::path::Path;

use tracing::info;

use shapeplan_core::circuits::write_circuit_table;
use shapeplan_core::topology::NetworkGraph;

use super::Context;
use crate::cli::ImportArgs;
use crate::error::CliError;

pub fn handle(args: &ImportArgs, ctx: &Context<'_>) -> Result<(), CliError> {
    let text = fs::read_to_string(&args.graph).map_err(|source| CliError::ReadInput {
        path: args.graph.clone(),
        source,
    })?;

    let mut graph = NetworkGraph::from_document(&text, ctx.cfg.shaping.exclude_sites.clone())?;
    graph.prepare_tree();

    let network = graph.to_network_document()?;
    let rows = graph.to_circuit_rows(ctx.cfg.shaping.committed_bandwidth_multiplier);
    let table = write_circuit_table(&rows)?;

    let network_out = args.network_out.as_deref().unwrap_or(ctx.network_path());
    let circuits_out = args.circuits_out.as_deref().unwrap_or(ctx.circuits_path());
    write_output(network_out, &serde_json::to_string_pretty(&network)?)?;
    write_output(circuits_out, &table)?;
    info!(nodes = graph.nodes().len(), rows = rows.len(), "graph imported");

    ctx.print(&format!(
        "Wrote {} top-level node(s) to {}\nWrote {} circuit row(s) to {}",
        network.len(),
        network_out.display(),
        rows.len(),
        circuits_out.display(),
    ));
    Ok(())
}

fn write_output(path: &Path, contents: &str) -> Result<(), CliError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
