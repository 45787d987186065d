//! `shapeplan validate`

use tabled::Tabled;

use shapeplan_core::{ValidationIssue, prepare};

use super::Context;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct IssueRow {
    #[tabled(rename = "Line")]
    line: String,
    #[tabled(rename = "Circuit")]
    circuit: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Issue")]
    issue: String,
}

impl From<&ValidationIssue> for IssueRow {
    fn from(i: &ValidationIssue) -> Self {
        Self {
            line: i.line.map(|l| l.to_string()).unwrap_or_default(),
            circuit: i.circuit_id.clone(),
            severity: i.severity().to_string(),
            issue: i.kind.to_string(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(ctx: &Context<'_>) -> Result<(), CliError> {
    let documents = ctx.documents()?;
    let prepared = prepare(&documents, &ctx.load_settings())?;
    let report = &prepared.report;

    if !report.issues.is_empty() {
        let out = output::render_list(
            &ctx.global.output,
            &report.issues,
            |i| IssueRow::from(i),
            ToString::to_string,
        )?;
        ctx.print(&out);
    }

    let warnings = report.warnings().count();
    if !ctx.global.quiet {
        eprintln!(
            "{} circuit(s), {} top-level node(s), {warnings} warning(s), {} notice(s)",
            prepared.circuits.len(),
            prepared.network.len(),
            report.notices().count(),
        );
    }
    if report.passed() {
        Ok(())
    } else {
        Err(CliError::ValidationFailed { issues: warnings })
    }
}
