//! Step executor: bounded-concurrency tool invocation with retry and timeout.
//!
//! The `StepExecutor` runs the members of one parallel group concurrently via
//! `tokio::JoinSet`, gated by a shared `Semaphore` sized to the worker pool.
//! Each step is attempted until it succeeds, fails fatally, or exhausts its
//! retry budget. Every attempt is written to the provenance ledger.
//!
//! # Attempt flow
//!
//! 1. Store the resolved input bundle as an artifact.
//! 2. Invoke the tool under a wall-clock timeout, catching panics.
//! 3. Classify the result: tool error class, `on_error_status` for error
//!    outputs, retryable for timeouts, fatal for panics.
//! 4. On success store the output data as an artifact.
//! 5. Record the attempt in provenance.
//! 6. Retry with exponential backoff if the policy allows.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use triform_types::config::EngineConfig;
use triform_types::error::RepositoryError;
use triform_types::provenance::{ArtifactRef, OperationStatus};
use triform_types::tool::{Confidence, ErrorClass, ToolOutput};
use triform_types::workflow::{RetryConfig, StepDefinition, StepFailure};
use uuid::Uuid;

use crate::provenance::{OperationRecord, ProvenanceError, ProvenanceRecorder};
use crate::repository::artifact::ArtifactStore;
use crate::repository::provenance::ProvenanceLedger;
use crate::tool::ToolRegistry;

use super::retry::RetryHandler;

/// Operation name written to provenance for step attempts.
pub const STEP_OPERATION: &str = "step.execute";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Infrastructure failures. Tool failures are not errors here; they are
/// reported in `StepOutcome::result`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("tool '{tool}' for step '{step}' is not registered")]
    UnknownTool { step: String, tool: String },

    #[error("artifact store error: {0}")]
    Artifact(#[from] RepositoryError),

    #[error(transparent)]
    Provenance(#[from] ProvenanceError),

    #[error("worker pool closed")]
    PoolClosed,

    #[error("step task join error: {0}")]
    Join(String),
}

// ---------------------------------------------------------------------------
// Request / outcome
// ---------------------------------------------------------------------------

/// One step ready for dispatch.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub workflow_id: Uuid,
    /// Arena index of the step in its definition.
    pub index: usize,
    pub step: StepDefinition,
    /// Resolved `input_data`.
    pub input: Value,
    /// Output references of the upstream steps the input was built from.
    pub input_refs: Vec<ArtifactRef>,
}

/// Terminal result of one step after all attempts.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub index: usize,
    pub step_id: String,
    /// Output reference and data on success.
    pub result: Result<(ArtifactRef, Value), StepFailure>,
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    /// Wall-clock time across all attempts, backoff included.
    pub duration_ms: u64,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

// ---------------------------------------------------------------------------
// StepExecutor
// ---------------------------------------------------------------------------

/// Runs steps against the tool registry.
///
/// Generic over the provenance ledger and artifact store backends. Cloning
/// is cheap and shares the worker pool.
pub struct StepExecutor<L: ProvenanceLedger, A: ArtifactStore> {
    registry: Arc<ToolRegistry>,
    recorder: Arc<ProvenanceRecorder<L>>,
    artifacts: Arc<A>,
    pool: Arc<Semaphore>,
    default_timeout: Duration,
    default_retry: RetryConfig,
}

impl<L: ProvenanceLedger, A: ArtifactStore> Clone for StepExecutor<L, A> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            recorder: Arc::clone(&self.recorder),
            artifacts: Arc::clone(&self.artifacts),
            pool: Arc::clone(&self.pool),
            default_timeout: self.default_timeout,
            default_retry: self.default_retry.clone(),
        }
    }
}

impl<L: ProvenanceLedger + 'static, A: ArtifactStore + 'static> StepExecutor<L, A> {
    pub fn new(
        registry: Arc<ToolRegistry>,
        recorder: Arc<ProvenanceRecorder<L>>,
        artifacts: Arc<A>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            registry,
            recorder,
            artifacts,
            pool: Arc::new(Semaphore::new(config.worker_pool_size())),
            default_timeout: Duration::from_secs(config.default_step_timeout_secs.max(1)),
            default_retry: config.retry.clone(),
        }
    }

    /// Override the timeout for steps that do not set `timeout_secs`.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn recorder(&self) -> &Arc<ProvenanceRecorder<L>> {
        &self.recorder
    }

    pub fn artifacts(&self) -> &Arc<A> {
        &self.artifacts
    }

    /// Run every member of a group concurrently and wait for all of them.
    ///
    /// A failing member never cancels its siblings. Outcomes are returned in
    /// arena-index order. An infrastructure error is returned only after every
    /// member has finished.
    pub async fn execute_group(
        &self,
        requests: Vec<StepRequest>,
    ) -> Result<Vec<StepOutcome>, ExecutorError> {
        let mut join_set = JoinSet::new();
        for request in requests {
            let executor = self.clone();
            join_set.spawn(async move { executor.execute_step(request).await });
        }

        let mut outcomes = Vec::with_capacity(join_set.len());
        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "step execution infrastructure failure");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    first_error.get_or_insert(ExecutorError::Join(e.to_string()));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        outcomes.sort_by_key(|o| o.index);
        Ok(outcomes)
    }

    /// Run a single step to a terminal result, holding one pool permit.
    pub async fn execute_step(&self, request: StepRequest) -> Result<StepOutcome, ExecutorError> {
        let _permit = Arc::clone(&self.pool)
            .acquire_owned()
            .await
            .map_err(|_| ExecutorError::PoolClosed)?;

        let step = &request.step;
        let tool = self
            .registry
            .get(&step.tool)
            .ok_or_else(|| ExecutorError::UnknownTool {
                step: step.id.clone(),
                tool: step.tool.clone(),
            })?;
        let descriptor = tool.descriptor().clone();
        let retry = step.retry.clone().unwrap_or_else(|| self.default_retry.clone());
        let timeout = step
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let bundle = self.artifacts.put(&request.input).await?;
        let mut inputs = vec![ArtifactRef::new(bundle)];
        for r in &request.input_refs {
            if !inputs.iter().any(|i| i.hash == r.hash) {
                inputs.push(r.clone());
            }
        }

        let started_at = Utc::now();
        let run_start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            tracing::debug!(
                workflow_id = %request.workflow_id,
                step_id = %step.id,
                tool = %descriptor.id,
                attempt,
                "step attempt started"
            );

            let options = attempt_options(&step.options, request.workflow_id, &step.id, attempt);
            let attempt_start = Instant::now();
            let invocation = AssertUnwindSafe(tool.execute(request.input.clone(), options)).catch_unwind();
            let raw = tokio::time::timeout(timeout, invocation).await;
            let duration_ms = attempt_start.elapsed().as_millis() as u64;

            let classified: Result<ToolOutput, (ErrorClass, String)> = match raw {
                Err(_) => Err((
                    ErrorClass::Retryable,
                    format!("timed out after {}ms", timeout.as_millis()),
                )),
                Ok(Err(panic)) => Err((
                    ErrorClass::Fatal,
                    format!("tool panicked: {}", panic_message(panic.as_ref())),
                )),
                Ok(Ok(Err(e))) => Err((e.class, e.message)),
                Ok(Ok(Ok(output))) if output.is_success() => Ok(output),
                Ok(Ok(Ok(output))) => Err((
                    step.on_error_status,
                    output
                        .error_message()
                        .unwrap_or_else(|| "tool reported an error".to_string()),
                )),
            };

            match classified {
                Ok(output) => {
                    let hash = self.artifacts.put(&output.data).await?;
                    let output_ref = ArtifactRef::new(hash).with_confidence(output.confidence);
                    self.recorder
                        .record_operation(OperationRecord {
                            operation: STEP_OPERATION.to_string(),
                            tool: descriptor.clone(),
                            inputs: inputs.clone(),
                            outputs: vec![output_ref.clone()],
                            duration_ms,
                            confidence: Some(output.confidence),
                            workflow_id: Some(request.workflow_id),
                            step_id: Some(step.id.clone()),
                            attempt,
                            status: OperationStatus::Success,
                            error: None,
                        })
                        .await?;

                    tracing::debug!(
                        step_id = %step.id,
                        attempt,
                        output = %output_ref.hash,
                        "step completed"
                    );
                    return Ok(StepOutcome {
                        index: request.index,
                        step_id: step.id.clone(),
                        result: Ok((output_ref, output.data)),
                        attempts: attempt,
                        started_at,
                        completed_at: Utc::now(),
                        duration_ms: run_start.elapsed().as_millis() as u64,
                    });
                }
                Err((class, message)) => {
                    self.recorder
                        .record_operation(OperationRecord {
                            operation: STEP_OPERATION.to_string(),
                            tool: descriptor.clone(),
                            inputs: inputs.clone(),
                            outputs: Vec::new(),
                            duration_ms,
                            confidence: None::<Confidence>,
                            workflow_id: Some(request.workflow_id),
                            step_id: Some(step.id.clone()),
                            attempt,
                            status: OperationStatus::Failure,
                            error: Some(format!("{class}: {message}")),
                        })
                        .await?;

                    if RetryHandler::should_retry(&retry, attempt, class) {
                        let delay = RetryHandler::backoff_delay(&retry, attempt);
                        tracing::warn!(
                            step_id = %step.id,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %message,
                            "retryable step failure; backing off"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    tracing::debug!(
                        step_id = %step.id,
                        attempt,
                        classification = %class,
                        error = %message,
                        "step failed"
                    );
                    return Ok(StepOutcome {
                        index: request.index,
                        step_id: step.id.clone(),
                        result: Err(StepFailure {
                            classification: class,
                            message,
                            retries_exhausted: class == ErrorClass::Retryable,
                        }),
                        attempts: attempt,
                        started_at,
                        completed_at: Utc::now(),
                        duration_ms: run_start.elapsed().as_millis() as u64,
                    });
                }
            }
        }
    }
}

/// Step options plus the `_context` object handed to tools.
fn attempt_options(options: &Value, workflow_id: Uuid, step_id: &str, attempt: u32) -> Value {
    let mut map = match options {
        Value::Object(m) => m.clone(),
        Value::Null => Map::new(),
        other => {
            let mut m = Map::new();
            m.insert("value".to_string(), other.clone());
            m
        }
    };
    map.insert(
        "_context".to_string(),
        json!({
            "workflow_id": workflow_id,
            "step_id": step_id,
            "attempt": attempt,
        }),
    );
    Value::Object(map)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
