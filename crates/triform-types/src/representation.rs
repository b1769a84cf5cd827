//! Graph, table, and vector representations of one entity set.
//!
//! Each [`Representation`] keeps a back-reference to where it came from and
//! the ordered chain of conversions applied to reach it. Elements (nodes,
//! rows, vectors) are addressed by string ids that survive every conversion.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::mode::DataCharacteristics;

/// Column holding an explicit embedding on tables.
pub const EMBEDDING_FIELD: &str = "embedding";
/// Reserved field holding a node label once nodes become rows. Kept apart
/// from ordinary attribute names so a `label` attribute survives conversion.
pub const LABEL_FIELD: &str = "_label";

/// The three representation modes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Graph,
    Table,
    Vector,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Graph, Mode::Table, Mode::Vector];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Graph => "graph",
            Mode::Table => "table",
            Mode::Vector => "vector",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "graph" => Ok(Mode::Graph),
            "table" => Ok(Mode::Table),
            "vector" => Ok(Mode::Vector),
            other => Err(format!("unknown mode '{other}' (expected graph, table, or vector)")),
        }
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A typed relation between two elements. Relations pass through every
/// converter unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<Relation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRow {
    pub id: String,
    #[serde(default)]
    pub values: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl TableData {
    /// Columns whose every present value is a number (and at least one is).
    pub fn numeric_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| {
                let mut seen = false;
                for row in &self.rows {
                    match row.values.get(c.as_str()) {
                        Some(v) if v.is_number() => seen = true,
                        Some(serde_json::Value::Null) | None => {}
                        Some(_) => return false,
                    }
                }
                seen
            })
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorEntry {
    pub id: String,
    pub embedding: Vec<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorData {
    pub dimension: usize,
    pub entries: Vec<VectorEntry>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

/// Mode-tagged payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RepresentationData {
    Graph(GraphData),
    Table(TableData),
    Vector(VectorData),
}

impl RepresentationData {
    pub fn mode(&self) -> Mode {
        match self {
            RepresentationData::Graph(_) => Mode::Graph,
            RepresentationData::Table(_) => Mode::Table,
            RepresentationData::Vector(_) => Mode::Vector,
        }
    }

    /// Ids of all addressable elements.
    pub fn element_ids(&self) -> BTreeSet<&str> {
        match self {
            RepresentationData::Graph(g) => g.nodes.iter().map(|n| n.id.as_str()).collect(),
            RepresentationData::Table(t) => t.rows.iter().map(|r| r.id.as_str()).collect(),
            RepresentationData::Vector(v) => v.entries.iter().map(|e| e.id.as_str()).collect(),
        }
    }

    /// Field values carried by each element, keyed by element id. Node
    /// labels appear under [`LABEL_FIELD`], embeddings under
    /// [`EMBEDDING_FIELD`].
    pub fn element_values(&self) -> BTreeMap<&str, BTreeMap<&str, serde_json::Value>> {
        match self {
            RepresentationData::Graph(g) => g
                .nodes
                .iter()
                .map(|n| {
                    let mut fields: BTreeMap<&str, serde_json::Value> = n
                        .attributes
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.clone()))
                        .collect();
                    if let Some(label) = &n.label {
                        fields.insert(LABEL_FIELD, serde_json::Value::String(label.clone()));
                    }
                    (n.id.as_str(), fields)
                })
                .collect(),
            RepresentationData::Table(t) => t
                .rows
                .iter()
                .map(|r| {
                    let fields = r.values.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
                    (r.id.as_str(), fields)
                })
                .collect(),
            RepresentationData::Vector(v) => v
                .entries
                .iter()
                .map(|e| {
                    let mut fields: BTreeMap<&str, serde_json::Value> = e
                        .metadata
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.clone()))
                        .collect();
                    fields.insert(EMBEDDING_FIELD, serde_json::Value::from(e.embedding.clone()));
                    (e.id.as_str(), fields)
                })
                .collect(),
        }
    }

    pub fn relations(&self) -> &[Relation] {
        match self {
            RepresentationData::Graph(g) => &g.edges,
            RepresentationData::Table(t) => &t.relations,
            RepresentationData::Vector(v) => &v.relations,
        }
    }

    /// Structural characteristics used by mode selection.
    pub fn characteristics(&self) -> DataCharacteristics {
        match self {
            RepresentationData::Graph(g) => DataCharacteristics {
                record_count: g.nodes.len(),
                node_count: g.nodes.len(),
                edge_count: g.edges.len(),
                density: DataCharacteristics::graph_density(g.nodes.len(), g.edges.len()),
                ..DataCharacteristics::default()
            },
            RepresentationData::Table(t) => {
                let numeric = t.numeric_columns().len();
                DataCharacteristics {
                    record_count: t.rows.len(),
                    numeric_column_ratio: if t.columns.is_empty() {
                        0.0
                    } else {
                        numeric as f64 / t.columns.len() as f64
                    },
                    has_embeddings: t.columns.iter().any(|c| c == EMBEDDING_FIELD),
                    ..DataCharacteristics::default()
                }
            }
            RepresentationData::Vector(v) => DataCharacteristics {
                record_count: v.entries.len(),
                has_embeddings: !v.entries.is_empty(),
                ..DataCharacteristics::default()
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// Where a representation came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    /// Raw data, optionally identified by an artifact hash.
    Raw {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<String>,
    },
    /// A prior representation.
    Representation { id: Uuid },
}

/// One hop applied by the conversion bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRecord {
    pub strategy: String,
    pub timestamp: DateTime<Utc>,
    pub from: Mode,
    pub to: Mode,
}

/// A representation instance plus its lineage metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Representation {
    pub id: Uuid,
    pub source: SourceRef,
    pub data: RepresentationData,
    #[serde(default)]
    pub conversions: Vec<ConversionRecord>,
}

impl Representation {
    /// A new representation built directly from raw data.
    pub fn from_raw(data: RepresentationData, artifact: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            source: SourceRef::Raw { artifact },
            data,
            conversions: Vec::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.data.mode()
    }
}
