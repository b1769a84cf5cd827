//! Mode-selection inputs and outputs.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::representation::Mode;

/// Structural features of the data a caller wants to analyze.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DataCharacteristics {
    #[serde(default)]
    pub record_count: usize,
    #[serde(default)]
    pub node_count: usize,
    #[serde(default)]
    pub edge_count: usize,
    /// Directed graph density `E / (V * (V - 1))`, in `[0, 1]`.
    #[serde(default)]
    pub density: f64,
    /// Share of table columns that are numeric, in `[0, 1]`.
    #[serde(default)]
    pub numeric_column_ratio: f64,
    #[serde(default)]
    pub has_embeddings: bool,
}

impl DataCharacteristics {
    /// Density of a directed graph with `nodes` vertices and `edges` edges.
    /// Graphs with fewer than two nodes have density 0; parallel edges are
    /// capped at 1.
    pub fn graph_density(nodes: usize, edges: usize) -> f64 {
        if nodes < 2 {
            return 0.0;
        }
        let possible = nodes as f64 * (nodes - 1) as f64;
        (edges as f64 / possible).min(1.0)
    }
}

/// Score per mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeScores {
    pub graph: f64,
    pub table: f64,
    pub vector: f64,
}

impl ModeScores {
    pub fn get(&self, mode: Mode) -> f64 {
        match mode {
            Mode::Graph => self.graph,
            Mode::Table => self.table,
            Mode::Vector => self.vector,
        }
    }

    pub fn add(&mut self, mode: Mode, weight: f64) {
        match mode {
            Mode::Graph => self.graph += weight,
            Mode::Table => self.table += weight,
            Mode::Vector => self.vector += weight,
        }
    }

    /// Highest-scoring mode; ties go to graph, then table, then vector.
    pub fn arg_max(&self) -> Mode {
        let mut best = Mode::Graph;
        for mode in [Mode::Table, Mode::Vector] {
            if self.get(mode) > self.get(best) {
                best = mode;
            }
        }
        best
    }
}

/// One rubric rule that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSignal {
    pub mode: Mode,
    /// Keyword stem or structural feature that matched.
    pub feature: String,
    pub weight: f64,
}

/// Auditable result of mode selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeSelection {
    pub primary: Mode,
    pub scores: ModeScores,
    pub signals: Vec<ModeSignal>,
    /// Name of the scoring strategy that produced this selection.
    pub strategy: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_max_tie_priority() {
        let tied = ModeScores {
            graph: 1.0,
            table: 1.0,
            vector: 1.0,
        };
        assert_eq!(tied.arg_max(), Mode::Graph);

        let table_vector = ModeScores {
            graph: 0.0,
            table: 2.0,
            vector: 2.0,
        };
        assert_eq!(table_vector.arg_max(), Mode::Table);

        let mut scores = ModeScores::default();
        scores.add(Mode::Vector, 0.5);
        assert_eq!(scores.arg_max(), Mode::Vector);
    }

    #[test]
    fn test_characteristics_partial_json() {
        let c: DataCharacteristics = serde_json::from_str(r#"{"node_count": 12}"#).unwrap();
        assert_eq!(c.node_count, 12);
        assert_eq!(c.density, 0.0);
        assert!(!c.has_embeddings);
    }

    #[test]
    fn test_graph_density() {
        assert_eq!(DataCharacteristics::graph_density(0, 0), 0.0);
        assert_eq!(DataCharacteristics::graph_density(1, 3), 0.0);
        assert!((DataCharacteristics::graph_density(4, 3) - 0.25).abs() < 1e-12);
        assert_eq!(DataCharacteristics::graph_density(2, 2), 1.0);
        assert_eq!(DataCharacteristics::graph_density(2, 5), 1.0);
    }
}
