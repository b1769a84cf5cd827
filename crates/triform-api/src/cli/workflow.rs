//! CLI workflow subcommands: validate, run, resume, status.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use futures_util::StreamExt;
use uuid::Uuid;

use triform_core::workflow::EventStream;
use triform_core::workflow::checkpoint::CheckpointError;
use triform_core::workflow::dag::resolve_groups;
use triform_core::workflow::definition::{definition_hash, load_workflow_file};
use triform_types::event::WorkflowEvent;
use triform_types::workflow::{StepStatus, WorkflowDefinition};

use crate::state::AppState;

/// Parse and structurally validate a definition file. Documents without an
/// id get the content-derived one.
fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    load_workflow_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))
}

fn short(hash: &str) -> &str {
    &hash[..hash.len().min(12)]
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub fn validate(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let def = load_definition(file)?;
    state
        .registry
        .validate_workflow(&def)
        .context("Workflow validation failed")?;
    let groups = resolve_groups(&def.steps).context("Workflow validation failed")?;

    let named: Vec<Vec<&str>> = groups
        .iter()
        .map(|g| g.iter().map(|&i| def.steps[i].id.as_str()).collect())
        .collect();

    if json {
        let out = serde_json::json!({
            "id": def.id.to_string(),
            "name": def.name,
            "version": def.version,
            "steps": def.steps.len(),
            "groups": named,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("*").green().bold(),
        style(&def.name).cyan()
    );
    println!("  ID: {}", def.id);
    println!("  Steps: {}", def.steps.len());
    println!();
    for (n, group) in named.iter().enumerate() {
        println!("  {} {}", style(format!("group {}", n + 1)).dim(), group.join(", "));
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Run / Resume
// ---------------------------------------------------------------------------

pub async fn run(state: &AppState, file: &Path, json: bool, quiet: bool) -> Result<()> {
    let def = load_definition(file)?;
    let id = state
        .orchestrator
        .create_workflow(def)
        .context("Failed to register workflow")?;
    let events = state
        .orchestrator
        .execute_workflow(id)
        .context("Failed to start workflow")?;
    follow(state, id, file, events, json, quiet).await
}

pub async fn resume(state: &AppState, file: &Path, json: bool, quiet: bool) -> Result<()> {
    let def = load_definition(file)?;
    let id = state
        .orchestrator
        .create_workflow(def)
        .context("Failed to register workflow")?;
    let events = state
        .orchestrator
        .resume_workflow(id)
        .await
        .context("Failed to resume workflow")?;
    follow(state, id, file, events, json, quiet).await
}

/// Drain an event stream, printing as it goes. Ctrl+C requests a pause at
/// the next group boundary instead of killing in-flight steps.
async fn follow(
    state: &AppState,
    id: Uuid,
    file: &Path,
    mut events: EventStream,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let mut interrupted = false;
    let mut last: Option<WorkflowEvent> = None;

    loop {
        tokio::select! {
            next = events.next() => {
                let Some(item) = next else { break };
                let event = item.context("Workflow execution aborted")?;
                print_event(&event, json, quiet)?;
                last = Some(event);
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                match state.orchestrator.pause_workflow(id) {
                    Ok(()) if !json => eprintln!(
                        "  {} pausing after the current group...",
                        style("||").yellow()
                    ),
                    Ok(()) => {}
                    Err(e) => tracing::warn!(workflow_id = %id, error = %e, "pause rejected"),
                }
            }
        }
    }

    match last {
        Some(WorkflowEvent::WorkflowFailed {
            step_id,
            classification,
            error,
            ..
        }) => bail!("Step '{step_id}' failed ({classification}): {error}"),
        Some(WorkflowEvent::WorkflowPaused { .. }) if !json => {
            println!(
                "  Continue with: {}",
                style(format!("triform resume {}", file.display())).cyan()
            );
            Ok(())
        }
        _ => Ok(()),
    }
}

fn print_event(event: &WorkflowEvent, json: bool, quiet: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    if quiet && !event.is_terminal() {
        return Ok(());
    }

    match event {
        WorkflowEvent::WorkflowStarted {
            workflow_id,
            resumed_from,
        } => {
            println!();
            match resumed_from {
                Some(seq) => println!(
                    "  {} Resuming workflow {} from checkpoint {}",
                    style(">").cyan().bold(),
                    workflow_id,
                    seq
                ),
                None => println!(
                    "  {} Starting workflow {}",
                    style(">").cyan().bold(),
                    workflow_id
                ),
            }
        }
        WorkflowEvent::GroupDispatched {
            group, step_ids, ..
        } => {
            println!(
                "  {} {}",
                style(format!("group {}", group + 1)).dim(),
                step_ids.join(", ")
            );
        }
        WorkflowEvent::StepCompleted {
            step_id,
            output,
            attempts,
            duration_ms,
            ..
        } => {
            let confidence = output
                .confidence
                .map(|c| format!(", confidence {:.2}", c.score))
                .unwrap_or_default();
            println!(
                "    {} {} {}",
                style("✓").green(),
                step_id,
                style(format!(
                    "({attempts} attempt(s), {duration_ms} ms{confidence}) {}",
                    short(&output.hash)
                ))
                .dim()
            );
        }
        WorkflowEvent::StepFailed {
            step_id,
            classification,
            error,
            optional,
            attempts,
            ..
        } => {
            let marker = if *optional {
                style("!").yellow()
            } else {
                style("✗").red()
            };
            println!(
                "    {} {} [{}] {} {}",
                marker,
                step_id,
                classification,
                error,
                style(format!("({attempts} attempt(s))")).dim()
            );
        }
        WorkflowEvent::CheckpointWritten { sequence, .. } => {
            println!("    {}", style(format!("checkpoint {sequence}")).dim());
        }
        WorkflowEvent::WorkflowPaused { workflow_id } => {
            println!();
            println!(
                "  {} Workflow {} paused",
                style("||").yellow().bold(),
                workflow_id
            );
        }
        WorkflowEvent::WorkflowCompleted {
            workflow_id,
            failed_optional,
        } => {
            println!();
            println!(
                "  {} Workflow {} completed",
                style("*").green().bold(),
                workflow_id
            );
            if !failed_optional.is_empty() {
                println!(
                    "  Optional steps failed: {}",
                    style(failed_optional.join(", ")).yellow()
                );
            }
            println!();
        }
        WorkflowEvent::WorkflowFailed {
            workflow_id,
            step_id,
            ..
        } => {
            println!();
            println!(
                "  {} Workflow {} failed at step '{}'",
                style("✗").red().bold(),
                workflow_id,
                step_id
            );
            println!();
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn status(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let def = load_definition(file)?;
    let hash = definition_hash(&def)?;

    let checkpoint = match state.checkpoints.load_latest(&def).await {
        Ok(cp) => cp,
        Err(err @ CheckpointError::Corrupt { .. }) => {
            if json {
                let out = serde_json::json!({
                    "workflow_id": def.id.to_string(),
                    "corrupt": err.to_string(),
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!();
                println!("  {} {err}", style("!").yellow().bold());
                println!("  The next resume starts from scratch.");
                println!();
            }
            return Ok(());
        }
        Err(err) => return Err(err).context("Failed to read checkpoints"),
    };

    let Some(cp) = checkpoint else {
        if json {
            let out = serde_json::json!({
                "workflow_id": def.id.to_string(),
                "checkpoint": null,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else {
            println!();
            println!("  No checkpoint for workflow '{}' ({}).", def.name, def.id);
            println!();
        }
        return Ok(());
    };
    let stale = cp.definition_hash != hash;

    if json {
        let out = serde_json::json!({
            "workflow_id": def.id.to_string(),
            "stale": stale,
            "checkpoint": cp,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} '{}' checkpoint {} ({})",
        style("Workflow").bold(),
        style(&def.name).cyan(),
        cp.sequence,
        cp.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    if stale {
        println!(
            "  {} taken against a different definition; the next resume starts from scratch",
            style("!").yellow()
        );
    }
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Output"),
            Cell::new("Updated"),
        ]);

    for step in &cp.steps {
        table.add_row(vec![
            Cell::new(&step.step_id),
            format_status(step.status),
            Cell::new(step.attempts),
            Cell::new(step.output.as_ref().map_or("-", |o| short(&o.hash))),
            Cell::new(step.timestamp.format("%H:%M:%S").to_string()),
        ]);
    }
    println!("{table}");
    println!();
    Ok(())
}

fn format_status(status: StepStatus) -> Cell {
    match status {
        StepStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        StepStatus::Running => Cell::new("running").fg(Color::Blue),
        StepStatus::Paused => Cell::new("paused").fg(Color::Magenta),
        StepStatus::Completed => Cell::new("completed").fg(Color::Green),
        StepStatus::Failed => Cell::new("failed").fg(Color::Red),
    }
}
