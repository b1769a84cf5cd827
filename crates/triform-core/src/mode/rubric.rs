//! Deterministic keyword and structure rubric.
//!
//! Each distinct keyword stem found in the intent adds a fixed weight to its
//! mode; structural features of the data add fixed bonuses. Signals are
//! emitted in rubric order, so identical inputs give identical output.

use std::collections::BTreeSet;

use triform_types::mode::{DataCharacteristics, ModeScores, ModeSignal};
use triform_types::representation::Mode;

use super::ScoringStrategy;

pub const RUBRIC_STRATEGY_NAME: &str = "rubric-v1";

/// Weight of one matched keyword stem.
pub const KEYWORD_WEIGHT: f64 = 2.0;

/// Density at which relationships dominate the data.
const DENSE_GRAPH: f64 = 0.1;

const GRAPH_STEMS: &[&str] = &[
    "relation", "network", "connect", "link", "path", "centralit", "communit", "neighbor",
    "influen", "graph", "edge", "node", "hub", "bridge",
];

const TABLE_STEMS: &[&str] = &[
    "aggregat", "statist", "average", "mean", "median", "count", "sum", "total", "regress",
    "correlat", "distribut", "compar", "trend", "table", "column", "percent",
];

const VECTOR_STEMS: &[&str] = &[
    "similar", "cluster", "semantic", "embed", "nearest", "topic", "analog", "resembl",
    "vector", "group",
];

/// The default scoring strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RubricStrategy;

impl ScoringStrategy for RubricStrategy {
    fn name(&self) -> &str {
        RUBRIC_STRATEGY_NAME
    }

    fn score(
        &self,
        intent: &str,
        characteristics: &DataCharacteristics,
    ) -> (ModeScores, Vec<ModeSignal>) {
        let words: BTreeSet<String> = intent
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut scores = ModeScores::default();
        let mut signals = Vec::new();
        let mut fire = |mode: Mode, feature: String, weight: f64| {
            scores.add(mode, weight);
            signals.push(ModeSignal {
                mode,
                feature,
                weight,
            });
        };

        for (mode, stems) in [
            (Mode::Graph, GRAPH_STEMS),
            (Mode::Table, TABLE_STEMS),
            (Mode::Vector, VECTOR_STEMS),
        ] {
            for stem in stems {
                if words.iter().any(|w| w.starts_with(stem)) {
                    fire(mode, format!("keyword:{stem}"), KEYWORD_WEIGHT);
                }
            }
        }

        let c = characteristics;
        if c.node_count >= 10 {
            fire(Mode::Graph, "structure:node_count>=10".into(), 1.5);
        }
        if c.edge_count > 0 {
            fire(Mode::Graph, "structure:edge_count>0".into(), 1.0);
        }
        if c.density >= DENSE_GRAPH {
            fire(Mode::Graph, format!("structure:density>={DENSE_GRAPH}"), 1.0);
        }
        if c.numeric_column_ratio >= 0.5 {
            fire(Mode::Table, "structure:numeric_column_ratio>=0.5".into(), 1.5);
        }
        if c.record_count >= 100 {
            fire(Mode::Table, "structure:record_count>=100".into(), 0.5);
        }
        if c.has_embeddings {
            fire(Mode::Vector, "structure:has_embeddings".into(), 2.0);
        }

        (scores, signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeSelector;

    fn select(intent: &str, c: DataCharacteristics) -> triform_types::mode::ModeSelection {
        ModeSelector::new(RubricStrategy).select(intent, &c)
    }

    #[test]
    fn test_network_intent_prefers_graph() {
        let s = select(
            "Identify influential actors in the co-authorship network",
            DataCharacteristics::default(),
        );
        assert_eq!(s.primary, Mode::Graph);
        assert_eq!(s.scores.graph, 4.0);
        assert!(s.signals.iter().any(|x| x.feature == "keyword:network"));
        assert!(s.signals.iter().any(|x| x.feature == "keyword:influen"));
    }

    #[test]
    fn test_statistical_intent_prefers_table() {
        let s = select(
            "Compute the average income, its distribution, and its correlation with education",
            DataCharacteristics {
                numeric_column_ratio: 0.8,
                ..Default::default()
            },
        );
        assert_eq!(s.primary, Mode::Table);
        assert_eq!(s.scores.table, 2.0 * 3.0 + 1.5);
    }

    #[test]
    fn test_similarity_intent_prefers_vector() {
        let s = select(
            "Find documents similar to this abstract and cluster them",
            DataCharacteristics {
                has_embeddings: true,
                ..Default::default()
            },
        );
        assert_eq!(s.primary, Mode::Vector);
        assert_eq!(s.scores.vector, 6.0);
    }

    #[test]
    fn test_stem_counted_once() {
        let s = select("network networks networking", DataCharacteristics::default());
        assert_eq!(s.scores.graph, KEYWORD_WEIGHT);
        assert_eq!(s.signals.len(), 1);
    }

    #[test]
    fn test_structural_bonuses() {
        let s = select(
            "",
            DataCharacteristics {
                record_count: 500,
                node_count: 25,
                edge_count: 40,
                density: DataCharacteristics::graph_density(25, 40),
                numeric_column_ratio: 0.2,
                has_embeddings: false,
            },
        );
        assert_eq!(s.scores.graph, 2.5);
        assert_eq!(s.scores.table, 0.5);
        assert_eq!(s.scores.vector, 0.0);
        assert_eq!(s.primary, Mode::Graph);
    }

    #[test]
    fn test_dense_graph_bonus() {
        let sparse = select(
            "",
            DataCharacteristics {
                node_count: 4,
                edge_count: 1,
                density: DataCharacteristics::graph_density(4, 1),
                ..Default::default()
            },
        );
        assert_eq!(sparse.scores.graph, 1.0);

        let dense = select(
            "",
            DataCharacteristics {
                node_count: 4,
                edge_count: 6,
                density: DataCharacteristics::graph_density(4, 6),
                ..Default::default()
            },
        );
        assert_eq!(dense.scores.graph, 2.0);
        assert!(dense.signals.iter().any(|s| s.feature == "structure:density>=0.1"));
    }

    #[test]
    fn test_tie_prefers_graph_then_table() {
        let s = select("network average", DataCharacteristics::default());
        assert_eq!(s.scores.graph, s.scores.table);
        assert_eq!(s.primary, Mode::Graph);

        let s = select("average similar", DataCharacteristics::default());
        assert_eq!(s.primary, Mode::Table);
    }

    #[test]
    fn test_deterministic() {
        let c = DataCharacteristics {
            record_count: 120,
            node_count: 3,
            edge_count: 1,
            density: DataCharacteristics::graph_density(3, 1),
            numeric_column_ratio: 0.6,
            has_embeddings: true,
        };
        let intent = "Cluster similar regions and compare their average growth";
        let first = select(intent, c.clone());
        for _ in 0..10 {
            assert_eq!(select(intent, c.clone()), first);
        }
    }
}
