//! `shapeplan shards`: persisted shard assignments of unparented circuits.

use chrono::DateTime;
use serde::Serialize;
use tabled::Tabled;

use super::Context;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Assignment {
    circuit_id: String,
    shard: String,
    last_change: Option<i64>,
}

#[derive(Tabled)]
struct AssignmentRow {
    #[tabled(rename = "Circuit")]
    circuit: String,
    #[tabled(rename = "Shard")]
    shard: String,
    #[tabled(rename = "Last Change")]
    last_change: String,
}

impl From<&Assignment> for AssignmentRow {
    fn from(a: &Assignment) -> Self {
        Self {
            circuit: a.circuit_id.clone(),
            shard: a.shard.clone(),
            last_change: a
                .last_change
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".into()),
        }
    }
}

pub fn handle(ctx: &Context<'_>) -> Result<(), CliError> {
    let store = ctx.store();
    let Some(state) = store.load_planner_state()? else {
        if !ctx.global.quiet {
            eprintln!(
                "No planner state in {}; run `shapeplan reload` first.",
                store.root().display()
            );
        }
        return Ok(());
    };

    let assignments: Vec<Assignment> = state
        .assignments
        .iter()
        .map(|(circuit_id, shard)| Assignment {
            circuit_id: circuit_id.clone(),
            shard: shard.clone(),
            last_change: state.last_change_timestamps.get(circuit_id).copied(),
        })
        .collect();

    let out = output::render_list(
        &ctx.global.output,
        &assignments,
        |a| AssignmentRow::from(a),
        |a| format!("{}\t{}", a.circuit_id, a.shard),
    )?;
    ctx.print(&out);

    if !ctx.global.quiet {
        let updated = state
            .updated_at_utc()
            .map_or_else(|| "never".to_owned(), |dt| dt.to_rfc3339());
        eprintln!(
            "{} assignment(s), salt {}, updated {updated}",
            assignments.len(),
            state.salt
        );
    }
    Ok(())
}
