//! `shapeplan reload`

use shapeplan_core::pipeline::reload;
use shapeplan_core::reload::FullReason;
use shapeplan_core::{ReloadDecision, ReloadOutcome, ReloadRequest};

use super::Context;
use crate::bus::FileBus;
use crate::cli::ReloadArgs;
use crate::env;
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ReloadArgs, ctx: &Context<'_>) -> Result<(), CliError> {
    let settings = ctx.settings()?;
    let documents = ctx.documents()?;
    let boot_id = args.boot_id.clone().unwrap_or_else(env::boot_id);
    let output_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| ctx.cfg.paths.output_dir.clone());

    let mut bus = FileBus::new(output_dir);
    let outcome = reload(
        &ctx.store(),
        &mut bus,
        &ReloadRequest {
            documents: &documents,
            settings: &settings,
            boot_id: &boot_id,
            now: chrono::Utc::now().timestamp(),
        },
    )?;

    let out = output::render_single(&ctx.global.output, &outcome, detail, |o| {
        outcome_label(&o.decision).to_owned()
    })?;
    ctx.print(&out);
    Ok(())
}

fn outcome_label(decision: &ReloadDecision) -> &'static str {
    match decision {
        ReloadDecision::Full { .. } => "full",
        ReloadDecision::Incremental { .. } => "incremental",
        ReloadDecision::NoOp => "no_op",
    }
}

fn detail(outcome: &ReloadOutcome) -> String {
    let mut lines = Vec::new();
    match &outcome.decision {
        ReloadDecision::Full { reason, source } => {
            lines.push(format!("Full reload ({reason})"));
            if *reason == FullReason::ValidationFallback {
                lines.push(format!("Applied documents: {source}"));
            }
        }
        ReloadDecision::Incremental { delta } => {
            lines.push(format!(
                "Incremental reload: {} added, {} removed, {} changed",
                delta.added.len(),
                delta.removed.len(),
                delta.changed.len()
            ));
        }
        ReloadDecision::NoOp => lines.push("Nothing to do: documents unchanged".into()),
    }
    if !matches!(outcome.decision, ReloadDecision::NoOp) {
        lines.push(format!("Operations:  {}", outcome.operations));
        lines.push(format!("IP mappings: {}", outcome.ip_mappings));
    }
    let warnings = outcome.report.warnings().count();
    if warnings > 0 {
        lines.push(format!("Warnings:    {warnings}"));
    }
    lines.join("\n")
}
