//! Provenance recorder: append-only ledger plus lineage indexes.
//!
//! The recorder keeps two reverse indexes over the ledger -- artifact ->
//! producing records and artifact -> consuming records -- and the most recent
//! producer of each artifact, which is what `depends_on` links to. Appends
//! are serialized through one async lock so `depends_on` always reflects the
//! ledger order.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex;
use triform_types::error::RepositoryError;
use triform_types::provenance::{
    ArtifactRef, LineageDirection, LineageEdge, LineageGraph, OperationStatus, ProvenanceRecord,
    ReproducibilityIssue, ReproducibilityReport,
};
use triform_types::tool::{Confidence, ToolDescriptor};
use uuid::Uuid;

use crate::repository::artifact::ArtifactStore;
use crate::repository::provenance::ProvenanceLedger;
use crate::tool::ToolRegistry;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProvenanceError {
    #[error("ledger error: {0}")]
    Ledger(#[from] RepositoryError),

    #[error("ledger index references missing record {0}")]
    MissingRecord(Uuid),
}

// ---------------------------------------------------------------------------
// New operation
// ---------------------------------------------------------------------------

/// Everything needed to record one operation. The recorder assigns the id,
/// timestamp, and `depends_on`.
#[derive(Debug, Clone)]
pub struct OperationRecord {
    pub operation: String,
    pub tool: ToolDescriptor,
    pub inputs: Vec<ArtifactRef>,
    pub outputs: Vec<ArtifactRef>,
    pub duration_ms: u64,
    pub confidence: Option<Confidence>,
    pub workflow_id: Option<Uuid>,
    pub step_id: Option<String>,
    pub attempt: u32,
    pub status: OperationStatus,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LineageIndex {
    last_producer: HashMap<String, Uuid>,
    producers: HashMap<String, Vec<Uuid>>,
    consumers: HashMap<String, Vec<Uuid>>,
}

impl LineageIndex {
    fn depends_on(&self, inputs: &[ArtifactRef]) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        inputs
            .iter()
            .filter_map(|r| self.last_producer.get(&r.hash).copied())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    fn insert(&mut self, record: &ProvenanceRecord) {
        for input in &record.inputs {
            self.consumers
                .entry(input.hash.clone())
                .or_default()
                .push(record.id);
        }
        for output in &record.outputs {
            self.producers
                .entry(output.hash.clone())
                .or_default()
                .push(record.id);
            self.last_producer.insert(output.hash.clone(), record.id);
        }
    }
}

// ---------------------------------------------------------------------------
// ProvenanceRecorder
// ---------------------------------------------------------------------------

/// Records operations and answers lineage and reproducibility queries.
///
/// Generic over `L: ProvenanceLedger` so it works with any backend.
pub struct ProvenanceRecorder<L: ProvenanceLedger> {
    ledger: L,
    index: Mutex<LineageIndex>,
}

impl<L: ProvenanceLedger> ProvenanceRecorder<L> {
    /// Wrap an empty ledger.
    pub fn new(ledger: L) -> Self {
        Self {
            ledger,
            index: Mutex::new(LineageIndex::default()),
        }
    }

    /// Wrap an existing ledger, rebuilding the indexes from its contents.
    pub async fn open(ledger: L) -> Result<Self, ProvenanceError> {
        let mut index = LineageIndex::default();
        let records = ledger.list_all().await?;
        for record in &records {
            index.insert(record);
        }
        tracing::debug!(records = records.len(), "provenance index rebuilt");
        Ok(Self {
            ledger,
            index: Mutex::new(index),
        })
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Append one record, linking it to the latest producers of its inputs.
    pub async fn record_operation(
        &self,
        op: OperationRecord,
    ) -> Result<ProvenanceRecord, ProvenanceError> {
        let mut index = self.index.lock().await;
        let record = ProvenanceRecord {
            id: Uuid::now_v7(),
            timestamp: Utc::now(),
            operation: op.operation,
            tool_id: op.tool.id,
            tool_version: op.tool.version,
            depends_on: index.depends_on(&op.inputs),
            inputs: op.inputs,
            outputs: op.outputs,
            duration_ms: op.duration_ms,
            confidence: op.confidence,
            workflow_id: op.workflow_id,
            step_id: op.step_id,
            attempt: op.attempt,
            status: op.status,
            error: op.error,
        };
        self.ledger.append(&record).await?;
        index.insert(&record);

        tracing::debug!(
            record_id = %record.id,
            tool = %record.tool_id,
            step_id = record.step_id.as_deref().unwrap_or("-"),
            attempt = record.attempt,
            status = ?record.status,
            "provenance recorded"
        );
        Ok(record)
    }

    /// Bounded breadth-first lineage walk from one artifact.
    ///
    /// Backward visits the records that produced the artifact, then the
    /// producers of their inputs, and so on. Forward visits consumers, then
    /// consumers of their outputs. Each record is visited once; `max_depth`
    /// bounds the number of record levels.
    pub async fn trace_lineage(
        &self,
        artifact: &str,
        direction: LineageDirection,
        max_depth: usize,
    ) -> Result<LineageGraph, ProvenanceError> {
        let mut records: Vec<ProvenanceRecord> = Vec::new();
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut seen_artifacts: HashSet<String> = HashSet::from([artifact.to_string()]);
        let mut frontier: VecDeque<(String, usize)> = VecDeque::from([(artifact.to_string(), 0)]);
        let mut truncated = false;

        while let Some((hash, depth)) = frontier.pop_front() {
            let candidates: Vec<Uuid> = {
                let index = self.index.lock().await;
                let map = match direction {
                    LineageDirection::Backward => &index.producers,
                    LineageDirection::Forward => &index.consumers,
                };
                map.get(&hash)
                    .map(|ids| ids.iter().filter(|id| !visited.contains(id)).copied().collect())
                    .unwrap_or_default()
            };
            if candidates.is_empty() {
                continue;
            }
            if depth >= max_depth {
                truncated = true;
                continue;
            }

            for id in candidates {
                if !visited.insert(id) {
                    continue;
                }
                let record = self
                    .ledger
                    .get(&id)
                    .await?
                    .ok_or(ProvenanceError::MissingRecord(id))?;
                let next = match direction {
                    LineageDirection::Backward => &record.inputs,
                    LineageDirection::Forward => &record.outputs,
                };
                for r in next {
                    if seen_artifacts.insert(r.hash.clone()) {
                        frontier.push_back((r.hash.clone(), depth + 1));
                    }
                }
                records.push(record);
            }
        }

        let edges = records
            .iter()
            .flat_map(|r| {
                r.depends_on
                    .iter()
                    .filter(|d| visited.contains(d))
                    .map(|d| LineageEdge { from: *d, to: r.id })
            })
            .collect();

        Ok(LineageGraph {
            root: artifact.to_string(),
            direction,
            records,
            edges,
            truncated,
        })
    }

    /// Audit whether a workflow's recorded operations can be replayed.
    ///
    /// One check per distinct tool and per distinct input artifact. A missing
    /// tool or input costs a full check; a version mismatch costs half.
    pub async fn verify_reproducibility<A: ArtifactStore>(
        &self,
        workflow_id: Uuid,
        registry: &ToolRegistry,
        artifacts: &A,
    ) -> Result<ReproducibilityReport, ProvenanceError> {
        let records = self.ledger.list_for_workflow(&workflow_id).await?;
        if records.is_empty() {
            return Ok(ReproducibilityReport {
                workflow_id,
                score: 0.0,
                checks: 0,
                issues: vec![ReproducibilityIssue::NoRecords],
            });
        }

        let mut issues = Vec::new();
        let mut penalty = 0.0;
        let mut checked_tools: HashSet<(String, String)> = HashSet::new();
        let mut checked_inputs: HashSet<String> = HashSet::new();

        for record in &records {
            let version = record.tool_version.to_string();
            if checked_tools.insert((record.tool_id.clone(), version.clone())) {
                match registry.get(&record.tool_id) {
                    None => {
                        penalty += 1.0;
                        issues.push(ReproducibilityIssue::ToolMissing {
                            record_id: record.id,
                            tool_id: record.tool_id.clone(),
                        });
                    }
                    Some(tool) if tool.descriptor().version != record.tool_version => {
                        penalty += 0.5;
                        issues.push(ReproducibilityIssue::VersionMismatch {
                            record_id: record.id,
                            tool_id: record.tool_id.clone(),
                            recorded: version,
                            registered: tool.descriptor().version.to_string(),
                        });
                    }
                    Some(_) => {}
                }
            }

            for input in &record.inputs {
                if checked_inputs.insert(input.hash.clone()) && !artifacts.contains(&input.hash).await? {
                    penalty += 1.0;
                    issues.push(ReproducibilityIssue::InputMissing {
                        record_id: record.id,
                        artifact: input.hash.clone(),
                    });
                }
            }
        }

        let checks = checked_tools.len() + checked_inputs.len();
        let score = if checks == 0 {
            1.0
        } else {
            (1.0 - penalty / checks as f64).clamp(0.0, 1.0)
        };

        tracing::info!(
            workflow_id = %workflow_id,
            score,
            checks,
            issues = issues.len(),
            "reproducibility verified"
        );

        Ok(ReproducibilityReport {
            workflow_id,
            score,
            checks,
            issues,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
