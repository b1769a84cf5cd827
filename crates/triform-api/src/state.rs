//! Application state wiring the engine together.
//!
//! The core types are generic over their storage ports; AppState pins them to
//! the concrete infra adapters (SQLite ledger and checkpoints, filesystem
//! artifacts and representations).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use triform_core::conversion::bridge::ConversionBridge;
use triform_core::event::bus::EventBus;
use triform_core::mode::ModeSelector;
use triform_core::provenance::ProvenanceRecorder;
use triform_core::tool::ToolRegistry;
use triform_core::tool::builtin::builtin_registry;
use triform_core::workflow::checkpoint::CheckpointManager;
use triform_core::workflow::executor::StepExecutor;
use triform_core::workflow::Orchestrator;
use triform_infra::config::{artifacts_dir, data_dir, load_engine_config, representations_dir};
use triform_infra::sqlite::checkpoint::SqliteCheckpointRepository;
use triform_infra::sqlite::ledger::SqliteProvenanceLedger;
use triform_infra::sqlite::pool::{DatabasePool, database_url};
use triform_infra::storage::{FsArtifactStore, FsRepresentationStore};
use triform_types::config::EngineConfig;

/// Concrete type aliases for the engine generics pinned to infra implementations.
pub type ConcreteOrchestrator =
    Orchestrator<SqliteCheckpointRepository, SqliteProvenanceLedger, FsArtifactStore>;

pub type ConcreteRecorder = ProvenanceRecorder<SqliteProvenanceLedger>;

/// Shared application state used by every command.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub registry: Arc<ToolRegistry>,
    pub recorder: Arc<ConcreteRecorder>,
    pub artifacts: Arc<FsArtifactStore>,
    pub orchestrator: ConcreteOrchestrator,
    /// Read-side view of the checkpoint store, for `status`.
    pub checkpoints: CheckpointManager<SqliteCheckpointRepository>,
    pub representations: FsRepresentationStore,
    pub bridge: ConversionBridge,
    pub selector: ModeSelector,
}

impl AppState {
    /// Initialize the application state: load config, open the DB, wire the engine.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;

        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("Failed to open the Triform database")?;

        let recorder = ProvenanceRecorder::open(SqliteProvenanceLedger::new(db_pool.clone()))
            .await
            .context("Failed to load the provenance ledger")?;
        let recorder = Arc::new(recorder);

        let registry = Arc::new(builtin_registry(&config.conversion));
        let artifacts = Arc::new(FsArtifactStore::new(artifacts_dir(&data_dir)));

        let executor = StepExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&recorder),
            Arc::clone(&artifacts),
            &config,
        );
        let orchestrator = Orchestrator::new(
            executor,
            CheckpointManager::new(
                SqliteCheckpointRepository::new(db_pool.clone()),
                config.retention(),
            ),
            EventBus::new(256),
        );

        tracing::debug!(data_dir = %data_dir.display(), tools = registry.len(), "engine ready");

        Ok(Self {
            checkpoints: CheckpointManager::new(
                SqliteCheckpointRepository::new(db_pool),
                config.retention(),
            ),
            representations: FsRepresentationStore::new(representations_dir(&data_dir)),
            bridge: ConversionBridge::with_defaults(&config.conversion),
            selector: ModeSelector::default(),
            data_dir,
            config,
            registry,
            recorder,
            artifacts,
            orchestrator,
        })
    }
}
