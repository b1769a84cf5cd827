//! Deterministic tools shipped with the engine.
//!
//! - `data.literal` -- emits its `value` input unchanged
//! - `stats.correlation` -- Pearson correlation matrix of a table's numeric columns
//! - `representation.convert` -- the conversion bridge as a workflow step
//! - `mode.select` -- the mode selector as a workflow step

use std::collections::BTreeMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use triform_types::config::ConversionConfig;
use triform_types::mode::DataCharacteristics;
use triform_types::representation::{
    Mode, Representation, RepresentationData, SourceRef, TableData, TableRow,
};
use triform_types::tool::{Confidence, ToolDescriptor, ToolOutput};

use super::registry::ToolRegistry;
use super::{Tool, ToolError};
use crate::conversion::ConversionBridge;
use crate::hash::{canonical_json, content_uuid};
use crate::mode::ModeSelector;

fn descriptor(id: &str, description: &str) -> ToolDescriptor {
    ToolDescriptor {
        id: id.to_string(),
        version: semver::Version::new(1, 0, 0),
        description: description.to_string(),
    }
}

fn parse_input<T: for<'de> Deserialize<'de>>(input: Value) -> Result<T, ToolError> {
    serde_json::from_value(input).map_err(ToolError::invalid_input)
}

fn to_data<T: serde::Serialize>(value: &T) -> Result<Value, ToolError> {
    serde_json::to_value(value).map_err(|e| ToolError::fatal(format!("output encoding: {e}")))
}

/// Registry holding every built-in tool.
pub fn builtin_registry(conversion: &ConversionConfig) -> ToolRegistry {
    ToolRegistry::new()
        .with(LiteralTool)
        .with(CorrelationMatrixTool)
        .with(ConvertRepresentationTool::new(Arc::new(
            ConversionBridge::with_defaults(conversion),
        )))
        .with(SelectModeTool::new(ModeSelector::default()))
}

// ---------------------------------------------------------------------------
// data.literal
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct LiteralInput {
    /// Any JSON value.
    value: Value,
}

/// Emits the `value` input as its output data.
pub struct LiteralTool;

impl Tool for LiteralTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor("data.literal", "Emit the `value` input unchanged")
    }

    fn input_schema(&self) -> Value {
        schemars::schema_for!(LiteralInput).to_value()
    }

    fn output_schema(&self) -> Value {
        json!({})
    }

    async fn execute(&self, input: Value, _options: Value) -> Result<ToolOutput, ToolError> {
        let input: LiteralInput = parse_input(input)?;
        Ok(ToolOutput::success(input.value, Confidence::certain()))
    }
}

// ---------------------------------------------------------------------------
// stats.correlation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct CorrelationInput {
    /// Table representation data, or a bare table.
    table: Value,
}

/// Rows needed for full confidence in a correlation estimate.
const FULL_CONFIDENCE_ROWS: f64 = 30.0;

/// Pearson correlation matrix over the numeric columns of a table.
///
/// The result is a table representation with one row per numeric column,
/// keyed by column name, which `table_to_graph` recognizes as a matrix.
pub struct CorrelationMatrixTool;

impl CorrelationMatrixTool {
    fn table_from(value: Value) -> Result<TableData, ToolError> {
        match serde_json::from_value::<RepresentationData>(value.clone()) {
            Ok(RepresentationData::Table(table)) => Ok(table),
            Ok(other) => Err(ToolError::invalid_input(format!(
                "expected a table, got {}",
                other.mode()
            ))),
            Err(_) => serde_json::from_value::<TableData>(value).map_err(ToolError::invalid_input),
        }
    }

    /// Correlation matrix as table data. Zero-variance pairs correlate at 0.
    pub fn correlate(table: &TableData) -> Result<TableData, ToolError> {
        let columns: Vec<String> = table
            .numeric_columns()
            .into_iter()
            .map(String::from)
            .collect();
        if columns.len() < 2 {
            return Err(ToolError::invalid_input("need at least two numeric columns"));
        }

        let samples: Vec<Vec<f64>> = table
            .rows
            .iter()
            .filter_map(|row| {
                columns
                    .iter()
                    .map(|c| row.values.get(c).and_then(Value::as_f64))
                    .collect::<Option<Vec<f64>>>()
            })
            .collect();
        if samples.len() < 2 {
            return Err(ToolError::invalid_input(
                "need at least two rows with every numeric column present",
            ));
        }

        let series: Vec<Vec<f64>> = (0..columns.len())
            .map(|j| samples.iter().map(|s| s[j]).collect())
            .collect();

        let rows = columns
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let values = columns
                    .iter()
                    .enumerate()
                    .map(|(j, other)| {
                        let r = if i == j { 1.0 } else { pearson(&series[i], &series[j]) };
                        (other.clone(), json!(r))
                    })
                    .collect::<BTreeMap<_, _>>();
                TableRow {
                    id: name.clone(),
                    values,
                }
            })
            .collect();

        Ok(TableData {
            columns,
            rows,
            relations: Vec::new(),
        })
    }
}

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mean_x, b - mean_y);
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    (cov / (var_x.sqrt() * var_y.sqrt())).clamp(-1.0, 1.0)
}

impl Tool for CorrelationMatrixTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "stats.correlation",
            "Pearson correlation matrix of a table's numeric columns",
        )
    }

    fn input_schema(&self) -> Value {
        schemars::schema_for!(CorrelationInput).to_value()
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "object", "required": ["mode", "columns", "rows"] })
    }

    async fn execute(&self, input: Value, _options: Value) -> Result<ToolOutput, ToolError> {
        let input: CorrelationInput = parse_input(input)?;
        let table = Self::table_from(input.table)?;
        let matrix = Self::correlate(&table)?;
        let sample_rows = table.rows.len() as f64;
        let data = to_data(&RepresentationData::Table(matrix))?;
        Ok(ToolOutput::success(
            data,
            Confidence::new(sample_rows / FULL_CONFIDENCE_ROWS),
        )
        .with_metadata(json!({ "rows": table.rows.len() })))
    }
}

// ---------------------------------------------------------------------------
// representation.convert
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct ConvertInput {
    /// A representation, or bare representation data.
    representation: Value,
    /// Target mode.
    to: Mode,
}

/// Runs the conversion bridge on its input.
pub struct ConvertRepresentationTool {
    bridge: Arc<ConversionBridge>,
}

impl ConvertRepresentationTool {
    pub fn new(bridge: Arc<ConversionBridge>) -> Self {
        Self { bridge }
    }
}

/// Accept a full representation or wrap bare data in one whose id is derived
/// from the data, so repeated runs produce the same ids.
pub fn representation_from(value: Value) -> Result<Representation, ToolError> {
    if let Ok(rep) = serde_json::from_value::<Representation>(value.clone()) {
        return Ok(rep);
    }
    let data: RepresentationData = serde_json::from_value(value).map_err(ToolError::invalid_input)?;
    let bytes = canonical_json(&data).map_err(ToolError::invalid_input)?;
    Ok(Representation {
        id: content_uuid(&bytes),
        source: SourceRef::Raw { artifact: None },
        data,
        conversions: Vec::new(),
    })
}

impl Tool for ConvertRepresentationTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor(
            "representation.convert",
            "Convert a representation to another mode without losing information",
        )
    }

    fn input_schema(&self) -> Value {
        schemars::schema_for!(ConvertInput).to_value()
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "object", "required": ["id", "source", "data"] })
    }

    async fn execute(&self, input: Value, _options: Value) -> Result<ToolOutput, ToolError> {
        let input: ConvertInput = parse_input(input)?;
        let rep = representation_from(input.representation)?;
        let converted = self
            .bridge
            .convert(&rep, rep.mode(), input.to)
            .map_err(|e| ToolError::fatal(e.to_string()))?;
        Ok(ToolOutput::success(to_data(&converted)?, Confidence::certain()))
    }
}

// ---------------------------------------------------------------------------
// mode.select
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct SelectModeInput {
    /// Free-text analytical intent.
    intent: String,
    /// Explicit data profile.
    #[serde(default)]
    characteristics: Option<DataCharacteristics>,
    /// Representation data to profile when no explicit profile is given.
    #[serde(default)]
    data: Option<Value>,
}

/// Scores graph, table, and vector for an intent.
pub struct SelectModeTool {
    selector: ModeSelector,
}

impl SelectModeTool {
    pub fn new(selector: ModeSelector) -> Self {
        Self { selector }
    }
}

impl Tool for SelectModeTool {
    fn descriptor(&self) -> ToolDescriptor {
        descriptor("mode.select", "Choose a representation mode for an intent")
    }

    fn input_schema(&self) -> Value {
        schemars::schema_for!(SelectModeInput).to_value()
    }

    fn output_schema(&self) -> Value {
        json!({ "type": "object", "required": ["primary", "scores", "signals", "strategy"] })
    }

    async fn execute(&self, input: Value, _options: Value) -> Result<ToolOutput, ToolError> {
        let input: SelectModeInput = parse_input(input)?;
        let characteristics = match (input.characteristics, input.data) {
            (Some(c), _) => c,
            (None, Some(data)) => representation_from(data)?.data.characteristics(),
            (None, None) => DataCharacteristics::default(),
        };
        let selection = self.selector.select(&input.intent, &characteristics);
        Ok(ToolOutput::success(to_data(&selection)?, Confidence::certain()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
