//! Article generation run accounting, the source for operator latency
//! estimates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::common::{now_iso, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Preview,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRun {
    pub id: i64,
    pub order_id: Option<i64>,
    pub article_id: Option<i64>,
    pub kind: RunKind,
    pub status: RunStatus,
    pub attempts: i64,
    pub duration_ms: Option<i64>,
    pub llm_duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Aggregated per-kind latency row for the stats endpoint.
#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatsRow {
    pub kind: RunKind,
    pub completed: i64,
    pub failed: i64,
    pub avg_duration_ms: Option<f64>,
    pub avg_llm_duration_ms: Option<f64>,
    pub last_duration_ms: Option<i64>,
}

impl GenerationRun {
    /// Open a run row. Returns its id for the later terminal write.
    pub async fn start(
        pool: &SqlitePool,
        order_id: i64,
        kind: RunKind,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO article_generation_runs (order_id, kind, status, attempts, created_at)
             VALUES (?, ?, 'running', 0, ?)",
        )
        .bind(order_id)
        .bind(kind)
        .bind(now_iso())
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn complete(
        pool: &SqlitePool,
        id: i64,
        article_id: i64,
        attempts: i64,
        duration_ms: i64,
        llm_duration_ms: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE article_generation_runs
             SET status = 'completed', article_id = ?, attempts = ?,
                 duration_ms = ?, llm_duration_ms = ?, finished_at = ?
             WHERE id = ?",
        )
        .bind(article_id)
        .bind(attempts)
        .bind(duration_ms)
        .bind(llm_duration_ms)
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(())
    }

    pub async fn fail(
        pool: &SqlitePool,
        id: i64,
        attempts: i64,
        duration_ms: i64,
        error_message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE article_generation_runs
             SET status = 'failed', attempts = ?, duration_ms = ?,
                 error_message = ?, finished_at = ?
             WHERE id = ?",
        )
        .bind(attempts)
        .bind(duration_ms)
        .bind(error_message)
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(())
    }

    /// Per-kind aggregates over finished runs.
    pub async fn stats(pool: &SqlitePool) -> Result<Vec<RunStatsRow>, StoreError> {
        sqlx::query_as::<_, RunStatsRow>(
            r#"
            SELECT kind,
                   SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END) AS completed,
                   SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed,
                   AVG(CASE WHEN status = 'completed' THEN duration_ms END) AS avg_duration_ms,
                   AVG(CASE WHEN status = 'completed' THEN llm_duration_ms END) AS avg_llm_duration_ms,
                   (SELECT duration_ms FROM article_generation_runs r2
                     WHERE r2.kind = r.kind AND r2.status = 'completed'
                     ORDER BY r2.id DESC LIMIT 1) AS last_duration_ms
            FROM article_generation_runs r
            WHERE status IN ('completed', 'failed')
            GROUP BY kind
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(StoreError::classify)
    }
}
