// ServerKernel - core infrastructure with all dependencies
//
// Holds the database pool and every kernel service; routes and the worker
// share one Arc<ServerKernel>. The provider is a trait object so tests can
// inject mocks.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;

use super::dispatcher::EventDispatcher;
use super::executor::LlmExecutor;
use super::leases::LeaseManager;
use super::llm::LlmProvider;
use super::settings::RuntimeSettings;
use super::stream_hub::StreamHub;

pub struct ServerKernel {
    pub db: SqlitePool,
    pub provider: Arc<dyn LlmProvider>,
    pub dispatcher: EventDispatcher,
    pub leases: LeaseManager,
    pub settings: Arc<RuntimeSettings>,
    pub executor: LlmExecutor,
    pub config: Config,
}

impl ServerKernel {
    pub fn new(db: SqlitePool, provider: Arc<dyn LlmProvider>, config: Config) -> Arc<Self> {
        let settings = RuntimeSettings::new(db.clone());
        Arc::new(Self {
            dispatcher: EventDispatcher::new(db.clone(), StreamHub::new()),
            leases: LeaseManager::new(db.clone()),
            executor: LlmExecutor::new(db.clone(), settings.clone()),
            settings,
            provider,
            db,
            config,
        })
    }
}
