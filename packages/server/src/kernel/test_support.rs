// Test support - kernel construction helpers and provider mocks shared by
// unit tests across the crate.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::config::{Config, LlmMode};

use super::llm::{
    ArticleRequest, ArticleResult, DevProvider, ImageArtifact, ImageRequest, IntentRequest,
    IntentResolution, LlmProvider, ReplyDraft, ReplyRequest, SpellRequest, SpellResult,
    SummarizeRequest, ThreadSummary,
};
use super::server_kernel::ServerKernel;

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        port: 0,
        llm_mode: LlmMode::Dev,
        anthropic_api_key: None,
        default_mail_model: "dev-model".to_string(),
        spell_correction: true,
    }
}

pub async fn test_pool() -> SqlitePool {
    // One never-recycled connection: pooled `sqlite::memory:` connections
    // would each open a separate empty database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Kernel over in-memory SQLite with the deterministic dev provider.
pub async fn test_kernel() -> Arc<ServerKernel> {
    test_kernel_with(Arc::new(DevProvider::new())).await
}

pub async fn test_kernel_with(provider: Arc<dyn LlmProvider>) -> Arc<ServerKernel> {
    ServerKernel::new(test_pool().await, provider, test_config())
}

/// Provider whose every capability fails. Exercises retry and failure paths.
pub struct FailingProvider;

#[async_trait]
impl LlmProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn correct_spelling(&self, _req: SpellRequest) -> Result<SpellResult> {
        anyhow::bail!("provider unavailable")
    }

    async fn resolve_intent(&self, _req: IntentRequest) -> Result<IntentResolution> {
        anyhow::bail!("provider unavailable")
    }

    async fn create_article(&self, _req: ArticleRequest) -> Result<ArticleResult> {
        anyhow::bail!("provider unavailable")
    }

    async fn create_image(&self, _req: ImageRequest) -> Result<ImageArtifact> {
        anyhow::bail!("provider unavailable")
    }

    async fn summarize(&self, _req: SummarizeRequest) -> Result<ThreadSummary> {
        anyhow::bail!("provider unavailable")
    }

    async fn generate_reply(&self, _req: ReplyRequest) -> Result<ReplyDraft> {
        anyhow::bail!("provider unavailable")
    }
}
