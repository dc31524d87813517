//! Operator-facing breadcrumbs per order. Append-only, no uniqueness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::common::{now_iso, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogStage {
    Order,
    Spell,
    Intent,
    Article,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLog {
    pub id: i64,
    pub order_id: i64,
    pub stage: LogStage,
    pub level: LogLevel,
    pub message: String,
    pub meta: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OrderLog {
    pub async fn append(
        pool: &SqlitePool,
        order_id: i64,
        stage: LogStage,
        level: LogLevel,
        message: &str,
        meta: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO order_logs (order_id, stage, level, message, meta, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(order_id)
        .bind(stage)
        .bind(level)
        .bind(message)
        .bind(meta.map(|v| v.to_string()))
        .bind(now_iso())
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(())
    }

    pub async fn for_order(pool: &SqlitePool, order_id: i64) -> Result<Vec<OrderLog>, StoreError> {
        sqlx::query_as::<_, OrderLog>(
            "SELECT * FROM order_logs WHERE order_id = ? ORDER BY id ASC",
        )
        .bind(order_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::classify)
    }
}
