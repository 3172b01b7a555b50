//! Application state wiring the stream controller to its adapters.
//!
//! The controller is generic over every port; AppState pins it to the
//! SQLite repositories, the configured session store and lock backend,
//! and the HTTP upstream gateway.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flowcast_core::lock::LockManager;
use flowcast_core::stream::{ChatStreamController, ControllerSettings, StreamRegistry};
use flowcast_infra::configured::{ConfiguredLockBackend, ConfiguredSessionStore};
use flowcast_infra::sqlite::bot::SqliteWorkflowBotRepository;
use flowcast_infra::sqlite::chat::SqliteChatRecordRepository;
use flowcast_infra::sqlite::file::SqliteFileBindingRepository;
use flowcast_infra::sqlite::pool::{DatabasePool, database_url, default_data_dir};
use flowcast_infra::upstream::HttpUpstreamGateway;
use flowcast_types::config::FlowcastConfig;

/// Controller generics pinned to the infra implementations.
pub type ConcreteController = ChatStreamController<
    SqliteChatRecordRepository,
    SqliteFileBindingRepository,
    SqliteWorkflowBotRepository,
    ConfiguredSessionStore,
    ConfiguredLockBackend,
    HttpUpstreamGateway,
>;

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<ConcreteController>,
    pub keep_alive: Duration,
    pub db_pool: DatabasePool,
}

impl AppState {
    /// Resolve the data directory, open the database and wire the controller.
    pub async fn init(config: FlowcastConfig) -> anyhow::Result<Self> {
        let data_dir: PathBuf = config.storage.data_dir.clone().unwrap_or_else(default_data_dir);
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_url = format!("{}?mode=rwc", database_url(&data_dir));
        let db_pool = DatabasePool::new(&db_url).await?;
        tracing::info!(data_dir = %data_dir.display(), "Database ready");

        Self::with_pool(config, db_pool)
    }

    /// Wire the controller over an already opened database.
    pub fn with_pool(config: FlowcastConfig, db_pool: DatabasePool) -> anyhow::Result<Self> {
        let upstream = HttpUpstreamGateway::new(&config.upstream)?;
        let locks = LockManager::new(ConfiguredLockBackend::new(config.lock.backend, &db_pool));
        let sessions = ConfiguredSessionStore::new(config.resume.store, &db_pool);

        tracing::info!(
            lock_backend = ?config.lock.backend,
            session_store = ?config.resume.store,
            output_mode = ?config.stream.output_mode,
            "Stream controller configured"
        );

        let controller = ChatStreamController::new(
            SqliteChatRecordRepository::new(db_pool.clone()),
            SqliteFileBindingRepository::new(db_pool.clone()),
            SqliteWorkflowBotRepository::new(db_pool.clone()),
            sessions,
            locks,
            upstream,
            StreamRegistry::new(),
            ControllerSettings::from_config(&config),
        );

        Ok(Self {
            controller: Arc::new(controller),
            keep_alive: Duration::from_secs(config.server.web_keep_alive_secs),
            db_pool,
        })
    }
}
