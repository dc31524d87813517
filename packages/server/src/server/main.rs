// Main entry point for the generation engine server

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use server_core::config::LlmMode;
use server_core::domains::orders::OrderWorker;
use server_core::kernel::llm::{AnthropicProvider, DevProvider, LlmProvider};
use server_core::kernel::ServerKernel;
use server_core::server::build_app;
use server_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .context("invalid DATABASE_URL")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("Failed to open database")?;
    tracing::info!("Database connected");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let provider: Arc<dyn LlmProvider> = match config.llm_mode {
        LlmMode::Dev => {
            tracing::warn!("LLM_MODE=dev: using the deterministic dev provider");
            Arc::new(DevProvider::new())
        }
        LlmMode::Anthropic => {
            let api_key = config
                .anthropic_api_key
                .clone()
                .context("ANTHROPIC_API_KEY must be set")?;
            Arc::new(AnthropicProvider::new(&api_key, config.default_mail_model.clone()))
        }
    };

    let kernel = ServerKernel::new(pool, provider, config.clone());

    // Single worker per process.
    let shutdown = CancellationToken::new();
    let worker = OrderWorker::new(kernel.clone());
    let worker_handle = tokio::spawn(worker.run(shutdown.clone()));

    let app = build_app(kernel);
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    let serve_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            serve_shutdown.cancel();
        })
        .await
        .context("Server error")?;

    shutdown.cancel();
    let _ = worker_handle.await;

    Ok(())
}
