//! Default pairwise converters.
//!
//! Four direct converters are registered by default: graph <-> table and
//! table <-> vector. Graph <-> vector is reached in two hops through the
//! table. Every converter keeps all element ids, all original fields, and
//! all relations; it may only add computed fields.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};
use triform_types::representation::{
    EMBEDDING_FIELD, GraphData, GraphNode, LABEL_FIELD, Mode, Relation, RepresentationData,
    TableData, TableRow, VectorData, VectorEntry,
};

use super::ConversionError;

/// Relation kind emitted for correlation-matrix entries.
pub const CORRELATES_WITH: &str = "correlates_with";

/// A single-hop conversion strategy.
///
/// Converters are pure: they never perform I/O and never mutate their
/// input. The bridge checks the enrichment invariant after every hop.
pub trait Converter: Send + Sync {
    /// Stable strategy id recorded in the conversion chain.
    fn strategy(&self) -> &str;

    fn from_mode(&self) -> Mode;

    fn to_mode(&self) -> Mode;

    fn convert(&self, data: &RepresentationData) -> Result<RepresentationData, ConversionError>;
}

fn mismatch(expected: Mode, data: &RepresentationData) -> ConversionError {
    ConversionError::ModeMismatch {
        expected,
        actual: data.mode(),
    }
}

fn rejected(strategy: &str, reason: String) -> ConversionError {
    ConversionError::HopRejected {
        strategy: strategy.to_string(),
        reason,
    }
}

fn sorted_columns<'a>(keys: impl Iterator<Item = &'a String>) -> Vec<String> {
    keys.cloned().collect::<BTreeSet<_>>().into_iter().collect()
}

// ---------------------------------------------------------------------------
// Graph -> Table
// ---------------------------------------------------------------------------

/// Nodes become rows; degree centralities are added as computed columns.
/// A node label lands in the reserved `_label` column.
pub struct GraphToTable;

impl Converter for GraphToTable {
    fn strategy(&self) -> &str {
        "graph_to_table.node_rows"
    }

    fn from_mode(&self) -> Mode {
        Mode::Graph
    }

    fn to_mode(&self) -> Mode {
        Mode::Table
    }

    fn convert(&self, data: &RepresentationData) -> Result<RepresentationData, ConversionError> {
        let RepresentationData::Graph(graph) = data else {
            return Err(mismatch(Mode::Graph, data));
        };

        let mut in_degree: BTreeMap<&str, u64> = BTreeMap::new();
        let mut out_degree: BTreeMap<&str, u64> = BTreeMap::new();
        for edge in &graph.edges {
            *out_degree.entry(edge.source.as_str()).or_default() += 1;
            *in_degree.entry(edge.target.as_str()).or_default() += 1;
        }

        let mut rows: Vec<TableRow> = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            let mut values = node.attributes.clone();
            if let Some(label) = &node.label {
                if values.contains_key(LABEL_FIELD) {
                    return Err(rejected(
                        self.strategy(),
                        format!("node '{}' has both a label and a '{LABEL_FIELD}' attribute", node.id),
                    ));
                }
                values.insert(LABEL_FIELD.to_string(), json!(label));
            }
            let inn = in_degree.get(node.id.as_str()).copied().unwrap_or(0);
            let out = out_degree.get(node.id.as_str()).copied().unwrap_or(0);
            // Computed fields never overwrite an attribute of the same name.
            values.entry("centrality.degree".to_string()).or_insert(json!(inn + out));
            values.entry("centrality.in_degree".to_string()).or_insert(json!(inn));
            values.entry("centrality.out_degree".to_string()).or_insert(json!(out));
            rows.push(TableRow {
                id: node.id.clone(),
                values,
            });
        }

        Ok(RepresentationData::Table(TableData {
            columns: sorted_columns(rows.iter().flat_map(|r| r.values.keys())),
            rows,
            relations: graph.edges.clone(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Table -> Graph
// ---------------------------------------------------------------------------

/// Rows become nodes. A square correlation matrix (every row id is also a
/// numeric column) additionally yields `correlates_with` edges for each
/// off-diagonal pair whose absolute correlation exceeds the threshold.
pub struct TableToGraph {
    pub correlation_threshold: f64,
}

impl TableToGraph {
    pub fn new(correlation_threshold: f64) -> Self {
        Self {
            correlation_threshold,
        }
    }

    fn correlation_edges(&self, table: &TableData) -> Vec<Relation> {
        if !is_correlation_matrix(table) {
            return Vec::new();
        }
        let mut edges = Vec::new();
        for (i, row) in table.rows.iter().enumerate() {
            for other in &table.rows[i + 1..] {
                let Some(r) = row.values.get(&other.id).and_then(Value::as_f64) else {
                    continue;
                };
                if r.abs() > self.correlation_threshold {
                    edges.push(Relation {
                        source: row.id.clone(),
                        target: other.id.clone(),
                        kind: CORRELATES_WITH.to_string(),
                        weight: Some(r),
                        attributes: BTreeMap::new(),
                    });
                }
            }
        }
        edges
    }
}

/// Every row id names a column, and every such cell is numeric.
fn is_correlation_matrix(table: &TableData) -> bool {
    if table.rows.len() < 2 {
        return false;
    }
    let columns: BTreeSet<&str> = table.columns.iter().map(String::as_str).collect();
    table.rows.iter().all(|row| {
        columns.contains(row.id.as_str())
            && table
                .rows
                .iter()
                .all(|other| row.values.get(&other.id).is_some_and(Value::is_number))
    })
}

impl Converter for TableToGraph {
    fn strategy(&self) -> &str {
        "table_to_graph.row_nodes"
    }

    fn from_mode(&self) -> Mode {
        Mode::Table
    }

    fn to_mode(&self) -> Mode {
        Mode::Graph
    }

    fn convert(&self, data: &RepresentationData) -> Result<RepresentationData, ConversionError> {
        let RepresentationData::Table(table) = data else {
            return Err(mismatch(Mode::Table, data));
        };

        let nodes = table
            .rows
            .iter()
            .map(|row| {
                let mut attributes = row.values.clone();
                let label = match attributes.get(LABEL_FIELD) {
                    Some(Value::String(s)) => Some(s.clone()),
                    _ => None,
                };
                if label.is_some() {
                    attributes.remove(LABEL_FIELD);
                }
                GraphNode {
                    id: row.id.clone(),
                    label,
                    attributes,
                }
            })
            .collect();

        let mut edges = table.relations.clone();
        for edge in self.correlation_edges(table) {
            if !edges.contains(&edge) {
                edges.push(edge);
            }
        }

        Ok(RepresentationData::Graph(GraphData { nodes, edges }))
    }
}

// ---------------------------------------------------------------------------
// Table -> Vector
// ---------------------------------------------------------------------------

/// Rows become vectors. An explicit `embedding` column is used as-is;
/// otherwise the numeric columns (in column order) form the embedding.
/// Every row value is kept as vector metadata.
pub struct TableToVector;

impl Converter for TableToVector {
    fn strategy(&self) -> &str {
        "table_to_vector.numeric_embedding"
    }

    fn from_mode(&self) -> Mode {
        Mode::Table
    }

    fn to_mode(&self) -> Mode {
        Mode::Vector
    }

    fn convert(&self, data: &RepresentationData) -> Result<RepresentationData, ConversionError> {
        let RepresentationData::Table(table) = data else {
            return Err(mismatch(Mode::Table, data));
        };

        let explicit = table.columns.iter().any(|c| c == EMBEDDING_FIELD);
        let numeric: Vec<&str> = table
            .numeric_columns()
            .into_iter()
            .filter(|c| *c != EMBEDDING_FIELD)
            .collect();
        if !explicit && numeric.is_empty() && !table.rows.is_empty() {
            return Err(self.reject("table has no numeric columns to embed"));
        }

        let mut entries = Vec::with_capacity(table.rows.len());
        for row in &table.rows {
            let mut metadata = row.values.clone();
            let embedding = if explicit {
                let raw = metadata.remove(EMBEDDING_FIELD);
                parse_embedding(raw.as_ref()).ok_or_else(|| {
                    self.reject(&format!("row '{}' has no numeric embedding array", row.id))
                })?
            } else {
                numeric
                    .iter()
                    .map(|c| row.values.get(*c).and_then(Value::as_f64).unwrap_or(0.0))
                    .collect()
            };
            entries.push(VectorEntry {
                id: row.id.clone(),
                embedding,
                metadata,
            });
        }

        let dimension = entries.first().map_or(0, |e| e.embedding.len());
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimension) {
            return Err(self.reject(&format!(
                "row '{}' has embedding dimension {}, expected {}",
                bad.id,
                bad.embedding.len(),
                dimension
            )));
        }

        Ok(RepresentationData::Vector(VectorData {
            dimension,
            entries,
            relations: table.relations.clone(),
        }))
    }
}

impl TableToVector {
    fn reject(&self, reason: &str) -> ConversionError {
        rejected(self.strategy(), reason.to_string())
    }
}

fn parse_embedding(value: Option<&Value>) -> Option<Vec<f64>> {
    value?.as_array()?.iter().map(Value::as_f64).collect()
}

// ---------------------------------------------------------------------------
// Vector -> Table
// ---------------------------------------------------------------------------

/// Vectors become rows: metadata keys become columns and the embedding is
/// kept whole in an `embedding` column. Metadata that already uses that
/// key is rejected rather than overwritten.
pub struct VectorToTable;

impl Converter for VectorToTable {
    fn strategy(&self) -> &str {
        "vector_to_table.metadata_rows"
    }

    fn from_mode(&self) -> Mode {
        Mode::Vector
    }

    fn to_mode(&self) -> Mode {
        Mode::Table
    }

    fn convert(&self, data: &RepresentationData) -> Result<RepresentationData, ConversionError> {
        let RepresentationData::Vector(vectors) = data else {
            return Err(mismatch(Mode::Vector, data));
        };

        let mut rows: Vec<TableRow> = Vec::with_capacity(vectors.entries.len());
        for entry in &vectors.entries {
            if entry.metadata.contains_key(EMBEDDING_FIELD) {
                return Err(rejected(
                    self.strategy(),
                    format!("entry '{}' has a '{EMBEDDING_FIELD}' metadata key", entry.id),
                ));
            }
            let mut values = entry.metadata.clone();
            values.insert(EMBEDDING_FIELD.to_string(), json!(entry.embedding));
            rows.push(TableRow {
                id: entry.id.clone(),
                values,
            });
        }

        Ok(RepresentationData::Table(TableData {
            columns: sorted_columns(rows.iter().flat_map(|r| r.values.keys())),
            rows,
            relations: vectors.relations.clone(),
        }))
    }
}
