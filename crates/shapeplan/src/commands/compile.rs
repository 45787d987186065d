//! `shapeplan compile`: a dry run of the full build.
//!
//! Persisted planner state is read but never written back, so compiling
//! never moves a circuit on the next real reload.

use serde::Serialize;
use tabled::Tabled;

use shapeplan_core::classify::{InterfaceLayout, PlanEntry};
use shapeplan_core::{Direction, QueueBatch, compile, prepare};

use super::Context;
use crate::cli::CompileArgs;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "Kind")]
    kind: &'static str,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Parent")]
    parent: String,
    #[tabled(rename = "CPU")]
    cpu: u32,
    #[tabled(rename = "Class (down)")]
    class_id: String,
    #[tabled(rename = "Rate ↓/↑")]
    rate: String,
    #[tabled(rename = "Ceil ↓/↑")]
    ceil: String,
}

impl PlanRow {
    fn new(entry: &PlanEntry, layout: &InterfaceLayout) -> Self {
        match entry {
            PlanEntry::Node(n) => Self {
                kind: "node",
                name: n.name.clone(),
                parent: layout
                    .class_id(Direction::Download, n.cpu, n.parent_minor)
                    .to_string(),
                cpu: n.cpu,
                class_id: layout.class_id(Direction::Download, n.cpu, n.minor).to_string(),
                rate: pair(n.rate.download, n.rate.upload),
                ceil: pair(n.ceil.download, n.ceil.upload),
            },
            PlanEntry::Circuit(c) => Self {
                kind: "circuit",
                name: c.label.clone(),
                parent: c.parent_node.clone(),
                cpu: c.cpu,
                class_id: layout.class_id(Direction::Download, c.cpu, c.minor).to_string(),
                rate: pair(c.rate.download, c.rate.upload),
                ceil: pair(c.ceil.download, c.ceil.upload),
            },
        }
    }
}

fn pair(download: f64, upload: f64) -> String {
    format!("{}/{}", output::mbps(download), output::mbps(upload))
}

fn entry_id(entry: &PlanEntry) -> String {
    match entry {
        PlanEntry::Node(n) => n.name.clone(),
        PlanEntry::Circuit(c) => c.circuit_id.clone(),
    }
}

#[derive(Serialize)]
struct BatchSummary<'a> {
    queues: u32,
    sharded: usize,
    batch: &'a QueueBatch,
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: &CompileArgs, ctx: &Context<'_>) -> Result<(), CliError> {
    let settings = ctx.settings()?;
    let documents = ctx.documents()?;
    let prepared = prepare(&documents, &settings)?;
    if !prepared.report.passed() {
        return Err(CliError::ValidationFailed {
            issues: prepared.report.warnings().count(),
        });
    }

    let planner_state = ctx.store().load_planner_state()?;
    let now = chrono::Utc::now().timestamp();
    let compiled = compile(prepared, &settings, planner_state, now)?;

    let out = if args.batch {
        let summary = BatchSummary {
            queues: settings.queues,
            sharded: compiled.sharded,
            batch: &compiled.batch,
        };
        output::render_single(
            &ctx.global.output,
            &summary,
            |s| render_operations(s.batch),
            |s| s.batch.operations.len().to_string(),
        )?
    } else {
        let layout = settings.layout();
        output::render_list(
            &ctx.global.output,
            &compiled.plan.entries,
            |e| PlanRow::new(e, &layout),
            entry_id,
        )?
    };
    ctx.print(&out);

    if !ctx.global.quiet {
        eprintln!(
            "{} node(s), {} circuit(s) on {} queue(s); {} operation(s), {} IP mapping(s)",
            compiled.plan.nodes().count(),
            compiled.plan.circuits().count(),
            settings.queues,
            compiled.batch.operations.len(),
            compiled.batch.ip_mappings.len(),
        );
    }
    Ok(())
}

/// One operation per line, in apply order.
fn render_operations(batch: &QueueBatch) -> String {
    batch
        .operations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
