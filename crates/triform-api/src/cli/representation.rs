//! CLI representation subcommands: mode selection and conversion.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use triform_core::repository::representation::RepresentationStore;
use triform_core::tool::builtin::representation_from;
use triform_types::mode::DataCharacteristics;
use triform_types::representation::{Mode, Representation};

use super::ModeArgs;
use crate::state::AppState;

async fn read_representation(file: &Path) -> Result<Representation> {
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", file.display()))?;
    representation_from(value)
        .with_context(|| format!("{} is not a representation", file.display()))
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

pub async fn mode(state: &AppState, args: &ModeArgs, json: bool) -> Result<()> {
    let characteristics = match &args.data {
        Some(file) => read_representation(file).await?.data.characteristics(),
        None => DataCharacteristics {
            record_count: args.records,
            node_count: args.nodes,
            edge_count: args.edges,
            density: DataCharacteristics::graph_density(args.nodes, args.edges),
            numeric_column_ratio: args.numeric_ratio.clamp(0.0, 1.0),
            has_embeddings: args.embeddings,
        },
    };

    let selection = state.selector.select(&args.intent, &characteristics);

    if json {
        println!("{}", serde_json::to_string_pretty(&selection)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} {}",
        style("Recommended mode:").bold(),
        style(selection.primary).cyan().bold()
    );
    println!();

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Mode").fg(Color::Cyan), Cell::new("Score")]);
    for m in Mode::ALL {
        let score = match m {
            Mode::Graph => selection.scores.graph,
            Mode::Table => selection.scores.table,
            Mode::Vector => selection.scores.vector,
        };
        let cell = Cell::new(format!("{score:.1}"));
        let cell = if m == selection.primary {
            cell.fg(Color::Green)
        } else {
            cell
        };
        table.add_row(vec![Cell::new(m), cell]);
    }
    println!("{table}");

    if !selection.signals.is_empty() {
        println!();
        for signal in &selection.signals {
            println!(
                "    {} {} {} {}",
                style("-").dim(),
                style(signal.mode).cyan(),
                signal.feature,
                style(format!("+{:.1}", signal.weight)).dim()
            );
        }
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Convert
// ---------------------------------------------------------------------------

pub async fn convert(
    state: &AppState,
    file: &Path,
    to: Mode,
    out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let source = read_representation(file).await?;
    let from = source.mode();

    state
        .representations
        .save(&source)
        .await
        .context("Failed to store source representation")?;
    let converted = state
        .bridge
        .convert_stored(&state.representations, &source.id, to)
        .await
        .with_context(|| format!("Failed to convert {from} to {to}"))?;

    let rendered = serde_json::to_string_pretty(&converted)?;
    match out {
        Some(path) => {
            tokio::fs::write(path, &rendered)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
        }
        None if json => {
            println!("{rendered}");
            return Ok(());
        }
        None => {}
    }

    if json {
        let summary = serde_json::json!({
            "id": converted.id.to_string(),
            "from": from,
            "to": to,
            "hops": converted.conversions.len() - source.conversions.len(),
            "out": out.map(|p| p.display().to_string()),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Converted {} -> {} ({})",
        style("*").green().bold(),
        style(from).cyan(),
        style(to).cyan(),
        converted.id
    );
    let chain: Vec<&str> = converted
        .conversions
        .iter()
        .skip(source.conversions.len())
        .map(|c| c.strategy.as_str())
        .collect();
    if !chain.is_empty() {
        println!("  Path: {}", chain.join(" -> "));
    }
    match out {
        Some(path) => println!("  Written to {}", path.display()),
        None => {
            println!();
            println!("{rendered}");
        }
    }
    println!();
    Ok(())
}
