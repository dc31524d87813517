//! Shared test harness: in-memory kernel, HTTP driver, and provider mocks.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use sqlx::sqlite::SqlitePoolOptions;
use tower::ServiceExt;

use server_core::config::{Config, LlmMode};
use server_core::kernel::llm::{
    ArticleRequest, ArticleResult, DevProvider, ImageArtifact, ImageRequest, IntentRequest,
    IntentResolution, LlmProvider, ReplyDraft, ReplyRequest, SpellRequest, SpellResult,
    SummarizeRequest, ThreadSummary,
};
use server_core::kernel::ServerKernel;
use server_core::server::build_app;

pub struct TestHarness {
    pub kernel: Arc<ServerKernel>,
    pub app: Router,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::with_provider(Arc::new(DevProvider::new())).await
    }

    pub async fn with_provider(provider: Arc<dyn LlmProvider>) -> Self {
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

        let config = Config {
            database_url: "sqlite::memory:".to_string(),
            port: 0,
            llm_mode: LlmMode::Dev,
            anthropic_api_key: None,
            default_mail_model: "dev-model".to_string(),
            spell_correction: true,
        };
        let kernel = ServerKernel::new(pool, provider, config);
        let app = build_app(kernel.clone());
        Self { kernel, app }
    }

    pub async fn set_setting(&self, key: &str, value: &str) {
        sqlx::query(
            "INSERT INTO runtime_settings (key, value, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.kernel.db)
        .await
        .unwrap();
    }

    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn get_json(&self, path: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    /// GET returning the raw body, with optional extra headers. Used for
    /// SSE responses, which are not JSON.
    pub async fn get_text(&self, path: &str, headers: &[(&str, &str)]) -> (StatusCode, String) {
        let mut builder = Request::builder().method("GET").uri(path);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }
}

/// Provider whose every capability fails with the same error.
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

/// Provider that never answers; pairs with a short timeout setting.
pub struct HangingProvider;

#[async_trait]
impl LlmProvider for HangingProvider {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn correct_spelling(&self, _req: SpellRequest) -> Result<SpellResult> {
        hang().await
    }

    async fn resolve_intent(&self, _req: IntentRequest) -> Result<IntentResolution> {
        hang().await
    }

    async fn create_article(&self, _req: ArticleRequest) -> Result<ArticleResult> {
        hang().await
    }

    async fn create_image(&self, _req: ImageRequest) -> Result<ImageArtifact> {
        hang().await
    }

    async fn summarize(&self, _req: SummarizeRequest) -> Result<ThreadSummary> {
        hang().await
    }

    async fn generate_reply(&self, _req: ReplyRequest) -> Result<ReplyDraft> {
        hang().await
    }
}

async fn hang<T>() -> Result<T> {
    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
    anyhow::bail!("unreachable")
}
