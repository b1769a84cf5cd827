//! Conversion bridge: converter registry plus shortest-path search.
//!
//! The registry is keyed by `(from, to)` and populated at startup; it is not
//! mutated while conversions run. When no direct converter exists the bridge
//! runs a breadth-first search over the (tiny) converter graph and applies
//! each hop in turn, appending one `ConversionRecord` per hop. The result is
//! only returned once every hop has succeeded and passed the enrichment
//! check.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use triform_types::config::ConversionConfig;
use triform_types::representation::{
    ConversionRecord, Mode, Representation, RepresentationData, SourceRef,
};
use uuid::Uuid;

use super::ConversionError;
use super::converters::{Converter, GraphToTable, TableToGraph, TableToVector, VectorToTable};
use crate::hash::content_uuid;
use crate::repository::representation::RepresentationStore;

/// A registered converter, as exposed for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionEdge {
    pub from: Mode,
    pub to: Mode,
    pub strategy: String,
}

/// Registry of pairwise converters.
#[derive(Clone, Default)]
pub struct ConversionBridge {
    converters: BTreeMap<(Mode, Mode), Arc<dyn Converter>>,
}

impl ConversionBridge {
    /// An empty bridge.
    pub fn new() -> Self {
        Self::default()
    }

    /// A bridge with the four default converters.
    pub fn with_defaults(config: &ConversionConfig) -> Self {
        let mut bridge = Self::new();
        bridge
            .register(GraphToTable)
            .register(TableToGraph::new(config.correlation_threshold))
            .register(TableToVector)
            .register(VectorToTable);
        bridge
    }

    /// Register a converter for its `(from, to)` pair, replacing any other.
    pub fn register<C: Converter + 'static>(&mut self, converter: C) -> &mut Self {
        let key = (converter.from_mode(), converter.to_mode());
        self.converters.insert(key, Arc::new(converter));
        self
    }

    pub fn edges(&self) -> Vec<ConversionEdge> {
        self.converters
            .iter()
            .map(|(&(from, to), c)| ConversionEdge {
                from,
                to,
                strategy: c.strategy().to_string(),
            })
            .collect()
    }

    /// Shortest sequence of converters leading from `from` to `to`.
    ///
    /// Empty when `from == to`. Neighbours are explored in mode order, so
    /// ties between equally short paths resolve the same way every time.
    pub fn find_path(
        &self,
        from: Mode,
        to: Mode,
    ) -> Result<Vec<Arc<dyn Converter>>, ConversionError> {
        if from == to {
            return Ok(Vec::new());
        }
        if let Some(direct) = self.converters.get(&(from, to)) {
            return Ok(vec![direct.clone()]);
        }

        let mut previous: HashMap<Mode, Mode> = HashMap::new();
        let mut queue = VecDeque::from([from]);
        while let Some(mode) = queue.pop_front() {
            if mode == to {
                break;
            }
            for &(a, b) in self.converters.keys() {
                if a == mode && b != from && !previous.contains_key(&b) {
                    previous.insert(b, a);
                    queue.push_back(b);
                }
            }
        }

        if !previous.contains_key(&to) {
            return Err(ConversionError::NoPath { from, to });
        }
        let mut hops = Vec::new();
        let mut current = to;
        while current != from {
            let prior = previous[&current];
            hops.push(self.converters[&(prior, current)].clone());
            current = prior;
        }
        hops.reverse();
        Ok(hops)
    }

    /// Convert a representation from `from` to `to`.
    ///
    /// The returned representation has a fresh id derived from the source id
    /// and target mode, points back at its source, and carries the source's
    /// conversion chain extended by one record per hop.
    pub fn convert(
        &self,
        representation: &Representation,
        from: Mode,
        to: Mode,
    ) -> Result<Representation, ConversionError> {
        if representation.mode() != from {
            return Err(ConversionError::ModeMismatch {
                expected: from,
                actual: representation.mode(),
            });
        }
        if from == to {
            return Ok(representation.clone());
        }

        let hops = self.find_path(from, to)?;
        let mut data = representation.data.clone();
        let mut chain = representation.conversions.clone();
        for converter in &hops {
            let next = converter.convert(&data)?;
            verify_enrichment(converter.strategy(), &data, &next)?;
            tracing::debug!(
                strategy = converter.strategy(),
                from = %converter.from_mode(),
                to = %converter.to_mode(),
                "conversion hop applied"
            );
            chain.push(ConversionRecord {
                strategy: converter.strategy().to_string(),
                timestamp: Utc::now(),
                from: converter.from_mode(),
                to: converter.to_mode(),
            });
            data = next;
        }

        Ok(Representation {
            id: derived_id(representation.id, to),
            source: SourceRef::Representation {
                id: representation.id,
            },
            data,
            conversions: chain,
        })
    }

    /// Load a stored representation, convert it, and save the result.
    ///
    /// The output id is derived from the input id and target mode, so
    /// retrying after a failed save overwrites rather than duplicates.
    pub async fn convert_stored<S: RepresentationStore>(
        &self,
        store: &S,
        id: &Uuid,
        to: Mode,
    ) -> Result<Representation, ConversionError> {
        let source = store
            .load(id)
            .await?
            .ok_or(ConversionError::NotFound(*id))?;
        let converted = self.convert(&source, source.mode(), to)?;
        store.save(&converted).await?;
        Ok(converted)
    }
}

impl std::fmt::Debug for ConversionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionBridge")
            .field("edges", &self.edges())
            .finish()
    }
}

fn derived_id(source: Uuid, to: Mode) -> Uuid {
    content_uuid(format!("{source}:{to}").as_bytes())
}

/// Check that `after` keeps every element, field value, and relation of
/// `before`. Numbers compare by value, so `1` and `1.0` match.
pub fn verify_enrichment(
    strategy: &str,
    before: &RepresentationData,
    after: &RepresentationData,
) -> Result<(), ConversionError> {
    let violation = |detail: String| ConversionError::EnrichmentViolation {
        strategy: strategy.to_string(),
        detail,
    };

    let after_values = after.element_values();
    for (id, fields) in before.element_values() {
        let Some(kept) = after_values.get(id) else {
            return Err(violation(format!("element '{id}' was dropped")));
        };
        for (field, value) in &fields {
            match kept.get(field) {
                None => {
                    return Err(violation(format!(
                        "field '{field}' of element '{id}' was dropped"
                    )));
                }
                Some(new) if !same_value(value, new) => {
                    return Err(violation(format!(
                        "field '{field}' of element '{id}' was overwritten"
                    )));
                }
                Some(_) => {}
            }
        }
    }

    let kept_relations = after.relations();
    if let Some(lost) = before
        .relations()
        .iter()
        .find(|r| !kept_relations.contains(r))
    {
        return Err(violation(format!(
            "relation {} -[{}]-> {} was dropped",
            lost.source, lost.kind, lost.target
        )));
    }

    Ok(())
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| same_value(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .all(|(k, v)| y.get(k).is_some_and(|w| same_value(v, w)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryRepresentationStore;
    use serde_json::json;
    use std::collections::{BTreeMap, BTreeSet};
    use triform_types::representation::{GraphData, GraphNode, Relation, TableData, TableRow};

    fn bridge() -> ConversionBridge {
        ConversionBridge::with_defaults(&ConversionConfig::default())
    }

    fn graph() -> Representation {
        Representation::from_raw(
            RepresentationData::Graph(GraphData {
                nodes: (0..4)
                    .map(|i| GraphNode {
                        id: format!("n{i}"),
                        label: None,
                        attributes: BTreeMap::from([("weight".to_string(), json!(i))]),
                    })
                    .collect(),
                edges: vec![Relation {
                    source: "n0".into(),
                    target: "n1".into(),
                    kind: "cites".into(),
                    weight: Some(0.5),
                    attributes: BTreeMap::new(),
                }],
            }),
            None,
        )
    }

    fn ids(rep: &Representation) -> BTreeSet<String> {
        rep.data.element_ids().into_iter().map(String::from).collect()
    }

    /// Drops every row but the first.
    struct Lossy;

    impl Converter for Lossy {
        fn strategy(&self) -> &str {
            "lossy"
        }
        fn from_mode(&self) -> Mode {
            Mode::Graph
        }
        fn to_mode(&self) -> Mode {
            Mode::Table
        }
        fn convert(
            &self,
            data: &RepresentationData,
        ) -> Result<RepresentationData, ConversionError> {
            let RepresentationData::Graph(g) = data else {
                unreachable!()
            };
            Ok(RepresentationData::Table(TableData {
                columns: vec![],
                rows: g
                    .nodes
                    .iter()
                    .take(1)
                    .map(|n| TableRow {
                        id: n.id.clone(),
                        values: BTreeMap::new(),
                    })
                    .collect(),
                relations: g.edges.clone(),
            }))
        }
    }

    /// Keeps every row and field but rewrites one attribute value.
    struct Overwrites;

    impl Converter for Overwrites {
        fn strategy(&self) -> &str {
            "overwrites"
        }
        fn from_mode(&self) -> Mode {
            Mode::Graph
        }
        fn to_mode(&self) -> Mode {
            Mode::Table
        }
        fn convert(
            &self,
            data: &RepresentationData,
        ) -> Result<RepresentationData, ConversionError> {
            let RepresentationData::Table(mut table) = GraphToTable.convert(data)? else {
                unreachable!()
            };
            table.rows[0]
                .values
                .insert("weight".to_string(), json!("replaced"));
            Ok(RepresentationData::Table(table))
        }
    }

    /// Always refuses.
    struct Refuses;

    impl Converter for Refuses {
        fn strategy(&self) -> &str {
            "refuses"
        }
        fn from_mode(&self) -> Mode {
            Mode::Table
        }
        fn to_mode(&self) -> Mode {
            Mode::Vector
        }
        fn convert(&self, _: &RepresentationData) -> Result<RepresentationData, ConversionError> {
            Err(ConversionError::HopRejected {
                strategy: "refuses".into(),
                reason: "nope".into(),
            })
        }
    }

    #[test]
    fn test_direct_conversion_records_one_hop() {
        let source = graph();
        let table = bridge().convert(&source, Mode::Graph, Mode::Table).unwrap();
        assert_eq!(table.mode(), Mode::Table);
        assert_eq!(table.conversions.len(), 1);
        assert_eq!(table.conversions[0].from, Mode::Graph);
        assert_eq!(table.source, SourceRef::Representation { id: source.id });
        assert_eq!(ids(&table), ids(&source));
    }

    #[test]
    fn test_graph_to_vector_goes_through_table() {
        let vector = bridge().convert(&graph(), Mode::Graph, Mode::Vector).unwrap();
        assert_eq!(vector.mode(), Mode::Vector);
        let hops: Vec<(Mode, Mode)> = vector.conversions.iter().map(|c| (c.from, c.to)).collect();
        assert_eq!(hops, vec![(Mode::Graph, Mode::Table), (Mode::Table, Mode::Vector)]);
        assert_eq!(vector.data.relations().len(), 1);
    }

    #[test]
    fn test_round_trips_preserve_identity() {
        let b = bridge();
        let source = graph();
        for via in [Mode::Table, Mode::Vector] {
            let there = b.convert(&source, Mode::Graph, via).unwrap();
            let back = b.convert(&there, via, Mode::Graph).unwrap();
            assert_eq!(ids(&back), ids(&source), "graph -> {via} -> graph");
            assert!(back.conversions.len() >= 2);
        }
    }

    #[test]
    fn test_same_mode_is_identity() {
        let source = graph();
        let same = bridge().convert(&source, Mode::Graph, Mode::Graph).unwrap();
        assert_eq!(same, source);
    }

    #[test]
    fn test_no_path() {
        let mut b = ConversionBridge::new();
        b.register(GraphToTable);
        let err = b.convert(&graph(), Mode::Graph, Mode::Vector).unwrap_err();
        assert!(matches!(
            err,
            ConversionError::NoPath {
                from: Mode::Graph,
                to: Mode::Vector
            }
        ));
    }

    #[test]
    fn test_mode_mismatch() {
        let err = bridge()
            .convert(&graph(), Mode::Table, Mode::Vector)
            .unwrap_err();
        assert!(matches!(err, ConversionError::ModeMismatch { .. }));
    }

    #[test]
    fn test_lossy_converter_rejected() {
        let mut b = ConversionBridge::new();
        b.register(Lossy);
        let err = b.convert(&graph(), Mode::Graph, Mode::Table).unwrap_err();
        match err {
            ConversionError::EnrichmentViolation { strategy, detail } => {
                assert_eq!(strategy, "lossy");
                assert!(detail.contains("dropped"));
            }
            other => panic!("expected EnrichmentViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_overwritten_value_rejected() {
        let mut b = ConversionBridge::new();
        b.register(Overwrites);
        let err = b.convert(&graph(), Mode::Graph, Mode::Table).unwrap_err();
        match err {
            ConversionError::EnrichmentViolation { strategy, detail } => {
                assert_eq!(strategy, "overwrites");
                assert!(detail.contains("'weight'"));
                assert!(detail.contains("overwritten"));
            }
            other => panic!("expected EnrichmentViolation, got {other:?}"),
        }
    }

    #[test]
    fn test_verify_enrichment_compares_numbers_by_value() {
        let before = RepresentationData::Table(TableData {
            columns: vec!["embedding".into()],
            rows: vec![TableRow {
                id: "r1".into(),
                values: BTreeMap::from([("embedding".to_string(), json!([1, 2]))]),
            }],
            relations: vec![],
        });
        let after = TableToVector.convert(&before).unwrap();
        assert!(verify_enrichment("table_to_vector", &before, &after).is_ok());

        let mut changed = after.clone();
        if let RepresentationData::Vector(v) = &mut changed {
            v.entries[0].embedding = vec![1.0, 3.0];
        }
        assert!(verify_enrichment("table_to_vector", &before, &changed).is_err());
    }

    #[test]
    fn test_label_attribute_survives_round_trip() {
        let source = Representation::from_raw(
            RepresentationData::Graph(GraphData {
                nodes: vec![GraphNode {
                    id: "n1".into(),
                    label: Some("Display".into()),
                    attributes: BTreeMap::from([("label".to_string(), json!("original-attr"))]),
                }],
                edges: vec![],
            }),
            None,
        );
        let b = bridge();
        let table = b.convert(&source, Mode::Graph, Mode::Table).unwrap();
        let back = b.convert(&table, Mode::Table, Mode::Graph).unwrap();
        let RepresentationData::Graph(graph) = &back.data else {
            panic!("expected graph");
        };
        assert_eq!(graph.nodes[0].label.as_deref(), Some("Display"));
        assert_eq!(graph.nodes[0].attributes["label"], json!("original-attr"));
    }

    #[test]
    fn test_failing_second_hop_aborts_whole_call() {
        let mut b = bridge();
        b.register(Refuses);
        let err = b.convert(&graph(), Mode::Graph, Mode::Vector).unwrap_err();
        assert!(matches!(err, ConversionError::HopRejected { .. }));
    }

    #[test]
    fn test_edges_listed() {
        let edges = bridge().edges();
        assert_eq!(edges.len(), 4);
        assert!(edges
            .iter()
            .any(|e| e.from == Mode::Table && e.to == Mode::Graph));
    }

    #[tokio::test]
    async fn test_convert_stored_is_idempotent() {
        let store = InMemoryRepresentationStore::new();
        let source = graph();
        store.save(&source).await.unwrap();

        let b = bridge();
        let first = b.convert_stored(&store, &source.id, Mode::Table).await.unwrap();
        let second = b.convert_stored(&store, &source.id, Mode::Table).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.len(), 2);
        assert_eq!(store.load(&first.id).await.unwrap().unwrap().mode(), Mode::Table);
    }

    #[tokio::test]
    async fn test_convert_stored_missing_source() {
        let store = InMemoryRepresentationStore::new();
        let err = bridge()
            .convert_stored(&store, &Uuid::now_v7(), Mode::Table)
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::NotFound(_)));
    }
}
