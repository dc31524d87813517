//! Retry/timeout executor for provider calls.
//!
//! Every Provider Gateway invocation goes through [`LlmExecutor::execute`]:
//! a bounded attempt loop where each attempt races the call against a
//! wall-clock timer. Failures are durably recorded in `llm_failures` before
//! the next attempt. Validation failures raised by pipelines never enter the
//! loop; only errors produced by the wrapped operation are retried.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use super::settings::RuntimeSettings;

/// Identifies one provider call for failure rows and logs.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Provider identifier, e.g. "anthropic".
    pub provider: String,
    /// Engine component making the call, e.g. "search_pipeline".
    pub component: String,
    /// The operation, e.g. "resolve_intent".
    pub trigger: String,
    /// Persisted with the failure row when an attempt times out, for
    /// post-mortem reconstruction of what was in flight.
    pub request_snapshot: Option<serde_json::Value>,
}

/// A successful call plus how much it cost.
#[derive(Debug)]
pub struct Executed<T> {
    pub value: T,
    pub attempts: u32,
    pub llm_duration_ms: i64,
}

/// All attempts exhausted. Carries the final attempt's accounting; the
/// display includes the underlying error so order `error_message` stays
/// informative ("... timed out ...").
#[derive(Error, Debug)]
#[error("{source} (llmAttempts={attempts}, llmDurationMs={llm_duration_ms})")]
pub struct LlmCallError {
    #[source]
    pub source: anyhow::Error,
    pub attempts: u32,
    pub llm_duration_ms: i64,
}

#[derive(Clone)]
pub struct LlmExecutor {
    pool: SqlitePool,
    settings: Arc<RuntimeSettings>,
}

impl LlmExecutor {
    pub fn new(pool: SqlitePool, settings: Arc<RuntimeSettings>) -> Self {
        Self { pool, settings }
    }

    /// Run `op` with the configured attempt budget and per-attempt timeout.
    ///
    /// `op` must produce a fresh future per call; the previous attempt's
    /// future is dropped (cancelled) once its timer fires.
    pub async fn execute<T, F, Fut>(&self, ctx: CallContext, op: F) -> Result<Executed<T>, LlmCallError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.settings.retry_max_attempts().await;
        let timeout_ms = self.settings.retry_timeout_ms().await;

        let mut last_error: Option<anyhow::Error> = None;
        let mut last_elapsed_ms: i64 = 0;

        for attempt in 1..=max_attempts {
            let correlation_id = Uuid::new_v4();
            let started = Instant::now();

            let outcome = tokio::time::timeout(Duration::from_millis(timeout_ms), op()).await;
            let elapsed_ms = started.elapsed().as_millis() as i64;

            let (error, timed_out) = match outcome {
                Ok(Ok(value)) => {
                    return Ok(Executed {
                        value,
                        attempts: attempt,
                        llm_duration_ms: elapsed_ms,
                    });
                }
                Ok(Err(e)) => (e, false),
                Err(_) => (
                    anyhow::anyhow!("LLM call timed out after {timeout_ms} ms"),
                    true,
                ),
            };

            tracing::error!(
                provider = %ctx.provider,
                component = %ctx.component,
                trigger = %ctx.trigger,
                correlation_id = %correlation_id,
                attempt,
                max_attempts,
                duration_ms = elapsed_ms,
                timed_out,
                error = %error,
                "LLM call attempt failed"
            );
            self.record_failure(&ctx, attempt, elapsed_ms, &error, timed_out)
                .await;

            last_error = Some(error);
            last_elapsed_ms = elapsed_ms;
        }

        Err(LlmCallError {
            // max_attempts >= 1, so the loop ran and last_error is set.
            source: last_error.unwrap_or_else(|| anyhow::anyhow!("no attempts executed")),
            attempts: max_attempts,
            llm_duration_ms: last_elapsed_ms,
        })
    }

    /// Persist one `llm_failures` row. Bookkeeping failures are logged and
    /// swallowed so they cannot mask the provider error.
    async fn record_failure(
        &self,
        ctx: &CallContext,
        attempt: u32,
        duration_ms: i64,
        error: &anyhow::Error,
        timed_out: bool,
    ) {
        let error_name = if timed_out { "TimeoutError" } else { "ProviderError" };
        let snapshot = if timed_out {
            ctx.request_snapshot
                .as_ref()
                .map(|v| v.to_string())
        } else {
            None
        };

        let result = sqlx::query(
            r#"
            INSERT INTO llm_failures
                (provider, component, trigger_op, attempt, duration_ms,
                 error_name, error_message, request_snapshot, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ctx.provider)
        .bind(&ctx.component)
        .bind(&ctx.trigger)
        .bind(attempt as i64)
        .bind(duration_ms)
        .bind(error_name)
        .bind(error.to_string())
        .bind(snapshot)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "failed to record llm failure row");
        }
    }
}
