//! Orchestrator: the public face of the engine.
//!
//! Registers immutable workflow definitions and drives them group by group
//! through the `StepExecutor`, writing a checkpoint after every group.
//! Execution is exposed as a lazy stream of `WorkflowEvent`s: nothing runs
//! until the stream is polled, and dropping it leaves the workflow
//! restartable from its last recorded state.
//!
//! # Sessions
//!
//! Each workflow id owns one async mutex. Executing or resuming takes the
//! lock with `try_lock_owned` and holds it inside the stream, so a second
//! concurrent session fails fast with `SessionBusy`. Distinct workflows
//! never contend.
//!
//! # Pause
//!
//! `pause_workflow` cancels a per-workflow `CancellationToken` that the run
//! checks before dispatching each group. In-flight steps always finish.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::stream::{self, BoxStream};
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use triform_types::checkpoint::Checkpoint;
use triform_types::error::RepositoryError;
use triform_types::event::WorkflowEvent;
use triform_types::tool::ErrorClass;
use triform_types::workflow::{
    StepFailure, StepState, StepStatus, WorkflowDefinition, WorkflowState, WorkflowStatus,
};
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::repository::artifact::ArtifactStore;
use crate::repository::checkpoint::CheckpointRepository;
use crate::repository::provenance::ProvenanceLedger;

use super::checkpoint::{CheckpointError, CheckpointManager, RestoreOutcome};
use super::context::WorkflowContext;
use super::dag::{resolve_groups, resolve_remaining};
use super::definition::{WorkflowError, content_id, definition_hash, validate_definition};
use super::executor::{ExecutorError, StepExecutor, StepOutcome, StepRequest};

/// Lazy event stream of one execution session.
pub type EventStream = BoxStream<'static, Result<WorkflowEvent, OrchestratorError>>;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("workflow {0} not found")]
    NotFound(Uuid),

    #[error("workflow {0} is already executing in another session")]
    SessionBusy(Uuid),

    #[error("workflow {id} is {status:?} and cannot be paused")]
    NotRunning { id: Uuid, status: WorkflowStatus },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("artifact store error: {0}")]
    Artifact(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Where a session takes its starting step states from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    /// The state already held in memory.
    InMemory,
    /// The latest valid checkpoint, if any.
    FromStore,
}

/// A registered definition plus its session lock.
struct Session {
    definition: Arc<WorkflowDefinition>,
    hash: String,
    lock: Arc<Mutex<()>>,
}

/// Workflow registry and group-by-group driver.
///
/// Every collaborator is passed in explicitly; there is no global state.
pub struct Orchestrator<C, L, A>
where
    C: CheckpointRepository,
    L: ProvenanceLedger,
    A: ArtifactStore,
{
    executor: StepExecutor<L, A>,
    checkpoints: Arc<CheckpointManager<C>>,
    sessions: DashMap<Uuid, Arc<Session>>,
    states: Arc<DashMap<Uuid, WorkflowState>>,
    pause_flags: Arc<DashMap<Uuid, CancellationToken>>,
    events: EventBus,
}

impl<C, L, A> Orchestrator<C, L, A>
where
    C: CheckpointRepository + 'static,
    L: ProvenanceLedger + 'static,
    A: ArtifactStore + 'static,
{
    pub fn new(
        executor: StepExecutor<L, A>,
        checkpoints: CheckpointManager<C>,
        events: EventBus,
    ) -> Self {
        Self {
            executor,
            checkpoints: Arc::new(checkpoints),
            sessions: DashMap::new(),
            states: Arc::new(DashMap::new()),
            pause_flags: Arc::new(DashMap::new()),
            events,
        }
    }

    pub fn executor(&self) -> &StepExecutor<L, A> {
        &self.executor
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// The registered definition for an id.
    pub fn definition(&self, id: Uuid) -> Option<Arc<WorkflowDefinition>> {
        self.sessions.get(&id).map(|s| Arc::clone(&s.definition))
    }

    // -----------------------------------------------------------------------
    // create
    // -----------------------------------------------------------------------

    /// Validate and register a definition, returning its id.
    ///
    /// Nothing is stored unless every check passes. Registering the same
    /// definition twice is a no-op; registering a different definition under
    /// an existing id fails.
    pub fn create_workflow(&self, mut definition: WorkflowDefinition) -> Result<Uuid, OrchestratorError> {
        if definition.id.is_nil() {
            definition.id = content_id(&definition)?;
        }
        validate_definition(&definition)?;
        self.executor.registry().validate_workflow(&definition)?;
        let groups = resolve_groups(&definition.steps)?;
        let hash = definition_hash(&definition)?;
        let id = definition.id;

        match self.sessions.entry(id) {
            Entry::Occupied(existing) => {
                if existing.get().hash == hash {
                    tracing::debug!(workflow_id = %id, "workflow already registered");
                    Ok(id)
                } else {
                    Err(WorkflowError::Immutable(id).into())
                }
            }
            Entry::Vacant(slot) => {
                self.states.insert(id, WorkflowState::new(&definition));
                tracing::info!(
                    workflow_id = %id,
                    name = %definition.name,
                    steps = definition.steps.len(),
                    groups = groups.len(),
                    "workflow created"
                );
                slot.insert(Arc::new(Session {
                    definition: Arc::new(definition),
                    hash,
                    lock: Arc::new(Mutex::new(())),
                }));
                Ok(id)
            }
        }
    }

    // -----------------------------------------------------------------------
    // execute / resume
    // -----------------------------------------------------------------------

    /// Start or continue a workflow.
    ///
    /// A finished workflow replays only its terminal event. A paused or
    /// interrupted one continues with the steps that have not settled. A
    /// workflow this process has not run yet first consults the checkpoint
    /// store, so a run settled by an earlier process is not repeated.
    pub fn execute_workflow(&self, id: Uuid) -> Result<EventStream, OrchestratorError> {
        let session = self.session(id)?;
        let guard = Arc::clone(&session.lock)
            .try_lock_owned()
            .map_err(|_| OrchestratorError::SessionBusy(id))?;
        let state = self.get_workflow_state(id)?;

        if state.status.is_terminal() {
            let event = terminal_event(&session.definition, &state);
            return Ok(Box::pin(stream::iter([Ok(event)])));
        }
        let start = if state.status == WorkflowStatus::Pending {
            Start::FromStore
        } else {
            Start::InMemory
        };
        Ok(self.drive(session, guard, state, None, start))
    }

    /// Continue from the latest valid checkpoint.
    ///
    /// A missing checkpoint starts fresh. A corrupt or stale one is logged
    /// and also starts fresh; provenance of earlier attempts is untouched.
    pub async fn resume_workflow(&self, id: Uuid) -> Result<EventStream, OrchestratorError> {
        let session = self.session(id)?;
        let guard = Arc::clone(&session.lock)
            .try_lock_owned()
            .map_err(|_| OrchestratorError::SessionBusy(id))?;

        let (state, resumed_from) = match self
            .checkpoints
            .restore(&session.definition, &session.hash)
            .await?
        {
            RestoreOutcome::Restored(cp) => {
                (state_from_checkpoint(&session.definition, &cp), Some(cp.sequence))
            }
            RestoreOutcome::Fresh | RestoreOutcome::ColdStart { .. } => {
                (WorkflowState::new(&session.definition), None)
            }
        };
        self.states.insert(id, state.clone());
        Ok(self.drive(session, guard, state, resumed_from, Start::InMemory))
    }

    // -----------------------------------------------------------------------
    // pause / state
    // -----------------------------------------------------------------------

    /// Request a pause at the next group boundary.
    pub fn pause_workflow(&self, id: Uuid) -> Result<(), OrchestratorError> {
        let status = self.get_workflow_state(id)?.status;
        match status {
            WorkflowStatus::Pending | WorkflowStatus::Running => {
                self.pause_flags
                    .entry(id)
                    .or_insert_with(CancellationToken::new)
                    .cancel();
                tracing::info!(workflow_id = %id, "pause requested");
                Ok(())
            }
            status => Err(OrchestratorError::NotRunning { id, status }),
        }
    }

    /// Current per-step statuses.
    pub fn get_workflow_state(&self, id: Uuid) -> Result<WorkflowState, OrchestratorError> {
        self.states
            .get(&id)
            .map(|s| s.clone())
            .ok_or(OrchestratorError::NotFound(id))
    }

    fn session(&self, id: Uuid) -> Result<Arc<Session>, OrchestratorError> {
        self.sessions
            .get(&id)
            .map(|s| Arc::clone(s.value()))
            .ok_or(OrchestratorError::NotFound(id))
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    fn drive(
        &self,
        session: Arc<Session>,
        guard: OwnedMutexGuard<()>,
        initial: WorkflowState,
        resumed_from: Option<u64>,
        start: Start,
    ) -> EventStream {
        let executor = self.executor.clone();
        let checkpoints = Arc::clone(&self.checkpoints);
        let states = Arc::clone(&self.states);
        let pause_flags = Arc::clone(&self.pause_flags);
        let events = self.events.clone();

        Box::pin(async_stream::stream! {
            let _session_guard = guard;
            let def = Arc::clone(&session.definition);
            let workflow_id = def.id;
            let token = pause_flags
                .entry(workflow_id)
                .or_insert_with(CancellationToken::new)
                .clone();

            let mut state = initial;
            let mut resumed_from = resumed_from;
            let mut ctx = WorkflowContext::new(workflow_id);

            if start == Start::FromStore {
                match checkpoints.restore(&def, &session.hash).await {
                    Ok(RestoreOutcome::Restored(cp)) => {
                        resumed_from = Some(cp.sequence);
                        state = state_from_checkpoint(&def, &cp);
                    }
                    Ok(RestoreOutcome::Fresh | RestoreOutcome::ColdStart { .. }) => {}
                    Err(e) => {
                        yield Err(e.into());
                        return;
                    }
                }

                // A required step that failed in an earlier run settles the
                // workflow; retrying it is what resume is for.
                if fatally_failed(&def, &state) {
                    state.status = WorkflowStatus::Failed;
                    state.updated_at = Utc::now();
                    states.insert(workflow_id, state.clone());
                    tracing::info!(workflow_id = %workflow_id, resumed_from = ?resumed_from, "workflow already failed");
                    yield Ok(publish(&events, terminal_event(&def, &state)));
                    return;
                }
            }

            // Reset unsettled steps and reload outputs of completed ones.
            for (step, entry) in def.steps.iter().zip(state.steps.iter_mut()) {
                let settled = match entry.status {
                    StepStatus::Completed => match &entry.output {
                        Some(output) => match executor.artifacts().get(&output.hash).await {
                            Ok(Some(data)) => {
                                ctx.set_step_output(&step.id, data);
                                true
                            }
                            Ok(None) => {
                                tracing::warn!(
                                    step_id = %step.id,
                                    artifact = %output.hash,
                                    "output artifact missing; step will re-run"
                                );
                                false
                            }
                            Err(e) => {
                                yield Err(e.into());
                                return;
                            }
                        },
                        None => false,
                    },
                    StepStatus::Failed => step.optional,
                    _ => false,
                };
                if !settled {
                    *entry = StepState::pending(step.id.clone());
                }
            }

            let done: HashSet<usize> = state
                .steps
                .iter()
                .enumerate()
                .filter(|(_, s)| s.status.is_terminal())
                .map(|(i, _)| i)
                .collect();
            let groups = match resolve_remaining(&def.steps, &done) {
                Ok(groups) => groups,
                Err(e) => {
                    yield Err(e.into());
                    return;
                }
            };

            if groups.is_empty() {
                state.status = WorkflowStatus::Completed;
                state.updated_at = Utc::now();
                states.insert(workflow_id, state.clone());
                pause_flags.remove(&workflow_id);
                tracing::info!(workflow_id = %workflow_id, resumed_from = ?resumed_from, "workflow already completed");
                yield Ok(publish(&events, terminal_event(&def, &state)));
                return;
            }

            state.status = WorkflowStatus::Running;
            state.updated_at = Utc::now();
            states.insert(workflow_id, state.clone());
            tracing::info!(
                workflow_id = %workflow_id,
                settled = done.len(),
                groups = groups.len(),
                resumed_from = ?resumed_from,
                "workflow started"
            );
            yield Ok(publish(&events, WorkflowEvent::WorkflowStarted { workflow_id, resumed_from }));

            for (group_no, group) in groups.iter().enumerate() {
                if token.is_cancelled() {
                    for entry in state.steps.iter_mut() {
                        if entry.status.can_transition_to(StepStatus::Paused) {
                            entry.status = StepStatus::Paused;
                        }
                    }
                    state.status = WorkflowStatus::Paused;
                    state.updated_at = Utc::now();
                    states.insert(workflow_id, state.clone());
                    pause_flags.remove(&workflow_id);
                    tracing::info!(workflow_id = %workflow_id, group = group_no, "workflow paused");
                    yield Ok(publish(&events, WorkflowEvent::WorkflowPaused { workflow_id }));
                    return;
                }

                let mut requests = Vec::with_capacity(group.len());
                let mut rejected = Vec::new();
                let now = Utc::now();
                for &index in group {
                    let step = &def.steps[index];
                    match ctx.resolve_inputs(step) {
                        Ok(input) => {
                            let input_refs = step
                                .referenced_steps()
                                .filter_map(|id| def.step_index(id))
                                .filter_map(|j| state.steps[j].output.clone())
                                .collect();
                            state.steps[index].status = StepStatus::Running;
                            state.steps[index].started_at = Some(now);
                            requests.push(StepRequest {
                                workflow_id,
                                index,
                                step: step.clone(),
                                input,
                                input_refs,
                            });
                        }
                        Err(e) => rejected.push(binding_failure(index, &step.id, e)),
                    }
                }
                states.insert(workflow_id, state.clone());

                let step_ids = group.iter().map(|&i| def.steps[i].id.clone()).collect();
                tracing::debug!(workflow_id = %workflow_id, group = group_no, steps = group.len(), "dispatching group");
                yield Ok(publish(&events, WorkflowEvent::GroupDispatched {
                    workflow_id,
                    group: group_no,
                    step_ids,
                }));

                let mut outcomes = match executor.execute_group(requests).await {
                    Ok(outcomes) => outcomes,
                    Err(e) => {
                        yield Err(e.into());
                        return;
                    }
                };
                outcomes.extend(rejected);
                outcomes.sort_by_key(|o| o.index);

                let mut fatal: Option<(String, StepFailure)> = None;
                for outcome in outcomes {
                    let step = &def.steps[outcome.index];
                    let event = {
                        let entry = &mut state.steps[outcome.index];
                        entry.attempts = outcome.attempts;
                        entry.started_at.get_or_insert(outcome.started_at);
                        entry.completed_at = Some(outcome.completed_at);
                        match outcome.result {
                            Ok((output, data)) => {
                                entry.status = StepStatus::Completed;
                                entry.output = Some(output.clone());
                                entry.error = None;
                                ctx.set_step_output(&step.id, data);
                                WorkflowEvent::StepCompleted {
                                    workflow_id,
                                    step_id: step.id.clone(),
                                    output,
                                    attempts: outcome.attempts,
                                    duration_ms: outcome.duration_ms,
                                }
                            }
                            Err(failure) => {
                                entry.status = StepStatus::Failed;
                                entry.error = Some(failure.clone());
                                if step.optional {
                                    tracing::warn!(step_id = %step.id, error = %failure.message, "optional step failed");
                                } else if fatal.is_none() {
                                    fatal = Some((step.id.clone(), failure.clone()));
                                }
                                WorkflowEvent::StepFailed {
                                    workflow_id,
                                    step_id: step.id.clone(),
                                    classification: failure.classification,
                                    error: failure.message,
                                    optional: step.optional,
                                    attempts: outcome.attempts,
                                }
                            }
                        }
                    };
                    yield Ok(publish(&events, event));
                }

                state.updated_at = Utc::now();
                let sequence = match checkpoints.write(&session.hash, &state).await {
                    Ok(sequence) => sequence,
                    Err(e) => {
                        states.insert(workflow_id, state.clone());
                        yield Err(e.into());
                        return;
                    }
                };
                state.last_checkpoint = Some(sequence);
                states.insert(workflow_id, state.clone());
                yield Ok(publish(&events, WorkflowEvent::CheckpointWritten { workflow_id, sequence }));

                if let Some((step_id, failure)) = fatal {
                    state.status = WorkflowStatus::Failed;
                    state.updated_at = Utc::now();
                    states.insert(workflow_id, state.clone());
                    pause_flags.remove(&workflow_id);
                    tracing::warn!(
                        workflow_id = %workflow_id,
                        step_id = %step_id,
                        classification = %failure.classification,
                        error = %failure.message,
                        "workflow failed"
                    );
                    yield Ok(publish(&events, WorkflowEvent::WorkflowFailed {
                        workflow_id,
                        step_id,
                        classification: failure.classification,
                        error: failure.message,
                    }));
                    return;
                }
            }

            state.status = WorkflowStatus::Completed;
            state.updated_at = Utc::now();
            states.insert(workflow_id, state.clone());
            pause_flags.remove(&workflow_id);
            let failed_optional = failed_steps(&state);
            tracing::info!(
                workflow_id = %workflow_id,
                failed_optional = failed_optional.len(),
                "workflow completed"
            );
            yield Ok(publish(&events, WorkflowEvent::WorkflowCompleted { workflow_id, failed_optional }));
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn publish(events: &EventBus, event: WorkflowEvent) -> WorkflowEvent {
    events.publish(event.clone());
    event
}

fn failed_steps(state: &WorkflowState) -> Vec<String> {
    state
        .steps
        .iter()
        .filter(|s| s.status == StepStatus::Failed)
        .map(|s| s.step_id.clone())
        .collect()
}

/// A step whose inputs cannot be bound fails without an attempt.
fn binding_failure(index: usize, step_id: &str, err: WorkflowError) -> StepOutcome {
    let now = Utc::now();
    StepOutcome {
        index,
        step_id: step_id.to_string(),
        result: Err(StepFailure {
            classification: ErrorClass::Fatal,
            message: err.to_string(),
            retries_exhausted: false,
        }),
        attempts: 0,
        started_at: now,
        completed_at: now,
        duration_ms: 0,
    }
}

fn fatally_failed(def: &WorkflowDefinition, state: &WorkflowState) -> bool {
    def.steps
        .iter()
        .zip(&state.steps)
        .any(|(step, s)| !step.optional && s.status == StepStatus::Failed)
}

/// The event that ended a finished workflow.
fn terminal_event(def: &WorkflowDefinition, state: &WorkflowState) -> WorkflowEvent {
    let workflow_id = state.workflow_id;
    if state.status == WorkflowStatus::Completed {
        return WorkflowEvent::WorkflowCompleted {
            workflow_id,
            failed_optional: failed_steps(state),
        };
    }
    let failed = def
        .steps
        .iter()
        .zip(&state.steps)
        .find(|(step, s)| !step.optional && s.status == StepStatus::Failed);
    match failed {
        Some((step, s)) => WorkflowEvent::WorkflowFailed {
            workflow_id,
            step_id: step.id.clone(),
            classification: s
                .error
                .as_ref()
                .map_or(ErrorClass::Fatal, |e| e.classification),
            error: s.error.as_ref().map(|e| e.message.clone()).unwrap_or_default(),
        },
        None => WorkflowEvent::WorkflowFailed {
            workflow_id,
            step_id: String::new(),
            classification: ErrorClass::Fatal,
            error: "workflow failed".to_string(),
        },
    }
}

/// Rebuild step states from a checkpoint. Settlement is decided later, when
/// outputs are reloaded.
fn state_from_checkpoint(def: &WorkflowDefinition, checkpoint: &Checkpoint) -> WorkflowState {
    let mut state = WorkflowState::new(def);
    for cp in &checkpoint.steps {
        if let Some(entry) = state.steps.get_mut(cp.index) {
            entry.status = cp.status;
            entry.output = cp.output.clone();
            entry.attempts = cp.attempts;
            entry.completed_at = Some(cp.timestamp);
            if cp.status == StepStatus::Failed {
                entry.error = Some(StepFailure {
                    classification: ErrorClass::Fatal,
                    message: "failed before checkpoint".to_string(),
                    retries_exhausted: false,
                });
            }
        }
    }
    state.last_checkpoint = Some(checkpoint.sequence);
    state
}

/// Output data of a settled step, for callers inspecting results.
pub async fn load_step_output<A: ArtifactStore>(
    artifacts: &A,
    state: &WorkflowState,
    step_id: &str,
) -> Result<Option<Value>, RepositoryError> {
    let Some(output) = state
        .steps
        .iter()
        .find(|s| s.step_id == step_id)
        .and_then(|s| s.output.as_ref())
    else {
        return Ok(None);
    };
    artifacts.get(&output.hash).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provenance::ProvenanceRecorder;
    use crate::repository::memory::{
        InMemoryArtifactStore, InMemoryCheckpointRepository, InMemoryProvenanceLedger,
    };
    use crate::tool::builtin::LiteralTool;
    use crate::tool::{Tool, ToolError, ToolRegistry};
    use crate::workflow::definition::parse_workflow_yaml;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use triform_types::config::EngineConfig;
    use triform_types::tool::{Confidence, ToolDescriptor, ToolOutput};

    type TestOrchestrator = Orchestrator<
        Arc<InMemoryCheckpointRepository>,
        Arc<InMemoryProvenanceLedger>,
        Arc<InMemoryArtifactStore>,
    >;

    /// Always fails with a fatal error.
    struct Broken;

    impl Tool for Broken {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                id: "broken".to_string(),
                version: semver::Version::new(1, 0, 0),
                description: String::new(),
            }
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        fn output_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _: Value, _: Value) -> Result<ToolOutput, ToolError> {
            Err(ToolError::fatal("broken tool"))
        }
    }

    /// Echoes its input and counts calls.
    struct Counted(Arc<AtomicU32>);

    impl Tool for Counted {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor {
                id: "counted".to_string(),
                version: semver::Version::new(1, 0, 0),
                description: String::new(),
            }
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        fn output_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, input: Value, _: Value) -> Result<ToolOutput, ToolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutput::success(input, Confidence::certain()))
        }
    }

    struct Stores {
        checkpoints: Arc<InMemoryCheckpointRepository>,
        ledger: Arc<InMemoryProvenanceLedger>,
        artifacts: Arc<InMemoryArtifactStore>,
        calls: Arc<AtomicU32>,
    }

    impl Stores {
        fn new() -> Self {
            Self {
                checkpoints: Arc::new(InMemoryCheckpointRepository::new()),
                ledger: Arc::new(InMemoryProvenanceLedger::new()),
                artifacts: Arc::new(InMemoryArtifactStore::new()),
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        async fn orchestrator(&self) -> TestOrchestrator {
            let config = EngineConfig::default();
            let registry = ToolRegistry::new()
                .with(LiteralTool)
                .with(Broken)
                .with(Counted(self.calls.clone()));
            let recorder = ProvenanceRecorder::open(self.ledger.clone()).await.unwrap();
            let executor = StepExecutor::new(
                Arc::new(registry),
                Arc::new(recorder),
                Arc::new(self.artifacts.clone()),
                &config,
            );
            Orchestrator::new(
                executor,
                CheckpointManager::new(self.checkpoints.clone(), config.retention()),
                EventBus::default(),
            )
        }
    }

    const DIAMOND: &str = r#"
name: diamond
steps:
  - id: a
    tool: data.literal
    inputs:
      value: { kind: literal, value: { n: 1, tags: [x, y] } }
  - id: b
    tool: counted
    depends_on: [a]
    inputs:
      n: { kind: reference, step: a, field: n }
  - id: c
    tool: counted
    depends_on: [a]
    inputs:
      tag: { kind: reference, step: a, field: tags.1 }
  - id: d
    tool: counted
    depends_on: [b, c]
    inputs:
      left: { kind: reference, step: b }
      right: { kind: reference, step: c, field: tag }
"#;

    async fn collect(stream: EventStream) -> Vec<WorkflowEvent> {
        stream.map(|e| e.unwrap()).collect().await
    }

    fn kinds(events: &[WorkflowEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                WorkflowEvent::WorkflowStarted { .. } => "started".to_string(),
                WorkflowEvent::GroupDispatched { step_ids, .. } => format!("group:{}", step_ids.join(",")),
                WorkflowEvent::StepCompleted { step_id, .. } => format!("ok:{step_id}"),
                WorkflowEvent::StepFailed { step_id, .. } => format!("fail:{step_id}"),
                WorkflowEvent::CheckpointWritten { sequence, .. } => format!("cp:{sequence}"),
                WorkflowEvent::WorkflowPaused { .. } => "paused".to_string(),
                WorkflowEvent::WorkflowCompleted { .. } => "completed".to_string(),
                WorkflowEvent::WorkflowFailed { step_id, .. } => format!("failed:{step_id}"),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_diamond_runs_group_by_group() {
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let id = orch.create_workflow(parse_workflow_yaml(DIAMOND).unwrap()).unwrap();

        let events = collect(orch.execute_workflow(id).unwrap()).await;
        assert_eq!(
            kinds(&events),
            vec![
                "started", "group:a", "ok:a", "cp:1", "group:b,c", "ok:b", "ok:c", "cp:2",
                "group:d", "ok:d", "cp:3", "completed",
            ]
        );

        let state = orch.get_workflow_state(id).unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.count(StepStatus::Completed), 4);
        assert_eq!(state.last_checkpoint, Some(3));

        let d = load_step_output(stores.artifacts.as_ref(), &state, "d").await.unwrap().unwrap();
        assert_eq!(d, json!({"left": {"n": 1}, "right": "y"}));

        // One provenance record per attempt, linked to upstream producers.
        let records = stores.ledger.list_for_workflow(&id).await.unwrap();
        assert_eq!(records.len(), 4);
        let d_record = records.iter().find(|r| r.step_id.as_deref() == Some("d")).unwrap();
        assert_eq!(d_record.depends_on.len(), 2);
    }

    #[tokio::test]
    async fn test_finished_workflow_replays_terminal_event() {
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let id = orch.create_workflow(parse_workflow_yaml(DIAMOND).unwrap()).unwrap();
        collect(orch.execute_workflow(id).unwrap()).await;

        let replay = collect(orch.execute_workflow(id).unwrap()).await;
        assert_eq!(kinds(&replay), vec!["completed"]);
        assert_eq!(stores.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_completed_run_is_not_repeated_by_a_new_process() {
        let stores = Stores::new();
        let def = parse_workflow_yaml(DIAMOND).unwrap();

        let first = stores.orchestrator().await;
        let id = first.create_workflow(def.clone()).unwrap();
        collect(first.execute_workflow(id).unwrap()).await;
        drop(first);
        assert_eq!(stores.calls.load(Ordering::SeqCst), 3);

        let second = stores.orchestrator().await;
        second.create_workflow(def).unwrap();
        let events = collect(second.execute_workflow(id).unwrap()).await;
        assert_eq!(kinds(&events), vec!["completed"]);
        assert_eq!(stores.calls.load(Ordering::SeqCst), 3);

        let state = second.get_workflow_state(id).unwrap();
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.last_checkpoint, Some(3));
        assert_eq!(stores.ledger.list_for_workflow(&id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_run_is_replayed_by_a_new_process() {
        let yaml = r#"
name: fails
steps:
  - id: a
    tool: counted
  - id: bad
    tool: broken
    depends_on: [a]
"#;
        let stores = Stores::new();
        let def = parse_workflow_yaml(yaml).unwrap();

        let first = stores.orchestrator().await;
        let id = first.create_workflow(def.clone()).unwrap();
        collect(first.execute_workflow(id).unwrap()).await;
        drop(first);

        let second = stores.orchestrator().await;
        second.create_workflow(def).unwrap();
        let events = collect(second.execute_workflow(id).unwrap()).await;
        assert_eq!(kinds(&events), vec!["failed:bad"]);
        assert_eq!(stores.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.get_workflow_state(id).unwrap().status, WorkflowStatus::Failed);
        assert_eq!(stores.ledger.list_for_workflow(&id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_execute_in_new_process_continues_from_checkpoint() {
        let stores = Stores::new();
        let def = parse_workflow_yaml(DIAMOND).unwrap();

        let first = stores.orchestrator().await;
        let id = first.create_workflow(def.clone()).unwrap();
        let mut stream = first.execute_workflow(id).unwrap();
        while let Some(event) = stream.next().await {
            if matches!(event.unwrap(), WorkflowEvent::CheckpointWritten { .. }) {
                break;
            }
        }
        drop(stream);
        drop(first);

        let second = stores.orchestrator().await;
        second.create_workflow(def).unwrap();
        let events = collect(second.execute_workflow(id).unwrap()).await;
        assert!(matches!(
            events[0],
            WorkflowEvent::WorkflowStarted { resumed_from: Some(1), .. }
        ));
        assert_eq!(
            kinds(&events)[1..],
            ["group:b,c", "ok:b", "ok:c", "cp:2", "group:d", "ok:d", "cp:3", "completed"]
        );
        assert_eq!(stores.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_and_immutable() {
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let def = parse_workflow_yaml(DIAMOND).unwrap();
        let id = orch.create_workflow(def.clone()).unwrap();
        assert_eq!(orch.create_workflow(def.clone()).unwrap(), id);

        let mut changed = def;
        changed.description = Some("edited".to_string());
        let err = orch.create_workflow(changed).unwrap_err();
        assert!(matches!(err, OrchestratorError::Workflow(WorkflowError::Immutable(x)) if x == id));
    }

    #[tokio::test]
    async fn test_create_rejects_cycle_and_unknown_tool_without_storing() {
        let stores = Stores::new();
        let orch = stores.orchestrator().await;

        let mut cyclic = parse_workflow_yaml(DIAMOND).unwrap();
        cyclic.steps[0].depends_on = vec!["d".to_string()];
        let cyclic_id = cyclic.id;
        let err = orch.create_workflow(cyclic).unwrap_err();
        assert!(matches!(err, OrchestratorError::Workflow(WorkflowError::CycleDetected { .. })));
        assert!(matches!(
            orch.get_workflow_state(cyclic_id),
            Err(OrchestratorError::NotFound(_))
        ));

        let mut unknown = parse_workflow_yaml(DIAMOND).unwrap();
        unknown.steps[3].tool = "nope".to_string();
        let err = orch.create_workflow(unknown).unwrap_err();
        assert!(matches!(err, OrchestratorError::Workflow(WorkflowError::UnknownTool { .. })));
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_after_group() {
        let yaml = r#"
name: fatal
steps:
  - id: a
    tool: data.literal
    inputs: { value: { kind: literal, value: 1 } }
  - id: bad
    tool: broken
    depends_on: [a]
  - id: sibling
    tool: counted
    depends_on: [a]
  - id: after
    tool: counted
    depends_on: [bad, sibling]
"#;
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let id = orch.create_workflow(parse_workflow_yaml(yaml).unwrap()).unwrap();
        let events = collect(orch.execute_workflow(id).unwrap()).await;

        assert_eq!(
            kinds(&events),
            vec![
                "started", "group:a", "ok:a", "cp:1", "group:bad,sibling", "fail:bad",
                "ok:sibling", "cp:2", "failed:bad",
            ]
        );
        match events.last().unwrap() {
            WorkflowEvent::WorkflowFailed { classification, .. } => {
                assert_eq!(*classification, ErrorClass::Fatal)
            }
            other => panic!("unexpected {other:?}"),
        }
        let state = orch.get_workflow_state(id).unwrap();
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert_eq!(state.steps[3].status, StepStatus::Pending);

        let failures = stores
            .ledger
            .list_for_workflow(&id)
            .await
            .unwrap()
            .into_iter()
            .filter(|r| !r.is_success())
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test]
    async fn test_optional_failure_does_not_fail_workflow() {
        let yaml = r#"
name: optional
steps:
  - id: extra
    tool: broken
    optional: true
  - id: main
    tool: counted
    depends_on: [extra]
    inputs: { from_extra: { kind: reference, step: extra, field: anything } }
"#;
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let id = orch.create_workflow(parse_workflow_yaml(yaml).unwrap()).unwrap();
        let events = collect(orch.execute_workflow(id).unwrap()).await;

        match events.last().unwrap() {
            WorkflowEvent::WorkflowCompleted { failed_optional, .. } => {
                assert_eq!(failed_optional, &vec!["extra".to_string()])
            }
            other => panic!("unexpected {other:?}"),
        }
        let state = orch.get_workflow_state(id).unwrap();
        let main = load_step_output(stores.artifacts.as_ref(), &state, "main").await.unwrap().unwrap();
        assert_eq!(main, json!({"from_extra": null}));
    }

    #[tokio::test]
    async fn test_pause_at_group_boundary_then_continue() {
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let id = orch.create_workflow(parse_workflow_yaml(DIAMOND).unwrap()).unwrap();

        let mut stream = orch.execute_workflow(id).unwrap();
        let mut seen = Vec::new();
        while let Some(event) = stream.next().await {
            let event = event.unwrap();
            let is_first_checkpoint = matches!(event, WorkflowEvent::CheckpointWritten { sequence: 1, .. });
            seen.push(event);
            if is_first_checkpoint {
                orch.pause_workflow(id).unwrap();
            }
        }
        drop(stream);
        assert_eq!(kinds(&seen), vec!["started", "group:a", "ok:a", "cp:1", "paused"]);

        let state = orch.get_workflow_state(id).unwrap();
        assert_eq!(state.status, WorkflowStatus::Paused);
        assert_eq!(state.steps[0].status, StepStatus::Completed);
        assert_eq!(state.count(StepStatus::Paused), 3);
        assert!(matches!(
            orch.pause_workflow(id),
            Err(OrchestratorError::NotRunning { .. })
        ));

        let rest = collect(orch.execute_workflow(id).unwrap()).await;
        assert_eq!(
            kinds(&rest),
            vec!["started", "group:b,c", "ok:b", "ok:c", "cp:2", "group:d", "ok:d", "cp:3", "completed"]
        );
        assert_eq!(stores.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_second_session_is_busy() {
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let id = orch.create_workflow(parse_workflow_yaml(DIAMOND).unwrap()).unwrap();

        let first = orch.execute_workflow(id).unwrap();
        assert!(matches!(
            orch.execute_workflow(id),
            Err(OrchestratorError::SessionBusy(_))
        ));
        assert!(matches!(
            orch.resume_workflow(id).await,
            Err(OrchestratorError::SessionBusy(_))
        ));
        drop(first);
        assert!(orch.execute_workflow(id).is_ok());
    }

    #[tokio::test]
    async fn test_resume_after_restart_skips_checkpointed_steps() {
        let stores = Stores::new();
        let def = parse_workflow_yaml(DIAMOND).unwrap();

        // First process: stop consuming right after the first checkpoint.
        let first = stores.orchestrator().await;
        let id = first.create_workflow(def.clone()).unwrap();
        let mut stream = first.execute_workflow(id).unwrap();
        while let Some(event) = stream.next().await {
            if matches!(event.unwrap(), WorkflowEvent::CheckpointWritten { .. }) {
                break;
            }
        }
        drop(stream);
        drop(first);

        // Second process: same stores, fresh in-memory state.
        let second = stores.orchestrator().await;
        second.create_workflow(def).unwrap();
        let events = collect(second.resume_workflow(id).await.unwrap()).await;
        assert!(matches!(
            events[0],
            WorkflowEvent::WorkflowStarted { resumed_from: Some(1), .. }
        ));
        assert_eq!(
            kinds(&events)[1..],
            ["group:b,c", "ok:b", "ok:c", "cp:2", "group:d", "ok:d", "cp:3", "completed"]
        );

        let state = second.get_workflow_state(id).unwrap();
        let d = load_step_output(stores.artifacts.as_ref(), &state, "d").await.unwrap().unwrap();
        assert_eq!(d, json!({"left": {"n": 1}, "right": "y"}));
    }

    #[tokio::test]
    async fn test_resume_with_corrupt_checkpoint_cold_starts() {
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let id = orch.create_workflow(parse_workflow_yaml(DIAMOND).unwrap()).unwrap();
        stores
            .checkpoints
            .save(&crate::repository::checkpoint::StoredCheckpoint {
                workflow_id: id,
                sequence: 4,
                created_at: Utc::now(),
                payload: "garbage".to_string(),
            })
            .await
            .unwrap();

        let events = collect(orch.resume_workflow(id).await.unwrap()).await;
        assert!(matches!(
            events[0],
            WorkflowEvent::WorkflowStarted { resumed_from: None, .. }
        ));
        assert!(matches!(events.last(), Some(WorkflowEvent::WorkflowCompleted { .. })));
        // New checkpoints continue after the corrupt one.
        assert!(events.iter().any(|e| matches!(e, WorkflowEvent::CheckpointWritten { sequence: 5, .. })));
    }

    #[tokio::test]
    async fn test_events_are_broadcast() {
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let mut rx = orch.events().subscribe();
        let id = orch.create_workflow(parse_workflow_yaml(DIAMOND).unwrap()).unwrap();
        let streamed = collect(orch.execute_workflow(id).unwrap()).await;

        let mut broadcast = Vec::new();
        while let Ok(event) = rx.try_recv() {
            broadcast.push(event);
        }
        assert_eq!(broadcast, streamed);
    }

    #[tokio::test]
    async fn test_unknown_workflow() {
        let stores = Stores::new();
        let orch = stores.orchestrator().await;
        let id = Uuid::now_v7();
        assert!(matches!(orch.execute_workflow(id), Err(OrchestratorError::NotFound(_))));
        assert!(matches!(orch.pause_workflow(id), Err(OrchestratorError::NotFound(_))));
    }
}
