//! CLI provenance subcommands: lineage and reproducibility audits.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use triform_types::provenance::{LineageDirection, ReproducibilityIssue};

use crate::state::AppState;

fn short_id(id: &Uuid) -> String {
    id.to_string().chars().take(8).collect()
}

// ---------------------------------------------------------------------------
// Lineage
// ---------------------------------------------------------------------------

pub async fn lineage(
    state: &AppState,
    artifact: &str,
    forward: bool,
    depth: Option<usize>,
    json: bool,
) -> Result<()> {
    let direction = if forward {
        LineageDirection::Forward
    } else {
        LineageDirection::Backward
    };
    let max_depth = depth.unwrap_or(state.config.lineage_max_depth);

    let graph = state
        .recorder
        .trace_lineage(artifact, direction, max_depth)
        .await
        .context("Failed to trace lineage")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&graph)?);
        return Ok(());
    }

    println!();
    if graph.records.is_empty() {
        println!("  No recorded operations touch artifact {artifact}.");
        println!();
        return Ok(());
    }

    let label = match direction {
        LineageDirection::Backward => "produced",
        LineageDirection::Forward => "consumed",
    };
    println!(
        "  {} Operations that {} {} ({} record(s), {} edge(s))",
        style("Lineage").bold(),
        label,
        style(artifact).cyan(),
        graph.records.len(),
        graph.edges.len()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Record").fg(Color::Cyan),
            Cell::new("Step"),
            Cell::new("Tool"),
            Cell::new("Attempt"),
            Cell::new("Status"),
            Cell::new("Inputs"),
            Cell::new("Outputs"),
        ]);

    for r in &graph.records {
        let status = if r.is_success() {
            Cell::new("success").fg(Color::Green)
        } else {
            Cell::new("failure").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(short_id(&r.id)),
            Cell::new(r.step_id.as_deref().unwrap_or("-")),
            Cell::new(format!("{}@{}", r.tool_id, r.tool_version)),
            Cell::new(r.attempt),
            status,
            Cell::new(r.inputs.len()),
            Cell::new(r.outputs.len()),
        ]);
    }
    println!("{table}");

    if graph.truncated {
        println!(
            "  {} stopped at depth {max_depth}; pass --depth to go further",
            style("!").yellow()
        );
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Verify
// ---------------------------------------------------------------------------

pub async fn verify(state: &AppState, workflow_id: &str, json: bool) -> Result<()> {
    let id: Uuid = workflow_id
        .parse()
        .with_context(|| format!("'{workflow_id}' is not a workflow UUID"))?;

    let report = state
        .recorder
        .verify_reproducibility(id, &state.registry, state.artifacts.as_ref())
        .await
        .context("Failed to audit reproducibility")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    let score = format!("{:.2}", report.score);
    let score = if report.is_reproducible() {
        style(score).green().bold()
    } else {
        style(score).red().bold()
    };
    println!(
        "  {} Workflow {}: score {} over {} check(s)",
        style("Reproducibility").bold(),
        id,
        score,
        report.checks
    );

    for issue in &report.issues {
        let line = match issue {
            ReproducibilityIssue::ToolMissing { record_id, tool_id } => {
                format!("tool '{tool_id}' is not registered (record {})", short_id(record_id))
            }
            ReproducibilityIssue::VersionMismatch {
                record_id,
                tool_id,
                recorded,
                registered,
            } => format!(
                "tool '{tool_id}' recorded at {recorded}, registered at {registered} (record {})",
                short_id(record_id)
            ),
            ReproducibilityIssue::InputMissing {
                record_id,
                artifact,
            } => format!(
                "input {artifact} is missing (record {})",
                short_id(record_id)
            ),
            ReproducibilityIssue::NoRecords => "no operations recorded".to_string(),
        };
        println!("    {} {line}", style("-").yellow());
    }
    println!();
    Ok(())
}
