//! Order model.
//!
//! Status transitions form a DAG: `queued → running → {completed, failed}`,
//! plus `queued → cancelled`. Every gating update is a conditional UPDATE
//! asserting the current status; zero rows changed means another writer won
//! the race and the caller backs off.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::common::{now_iso, time::to_iso, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    QueryFull,
    IntentRegen,
    ArticleRegenKeepTitle,
    MailReply,
}

impl OrderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::QueryFull => "query_full",
            OrderKind::IntentRegen => "intent_regen",
            OrderKind::ArticleRegenKeepTitle => "article_regen_keep_title",
            OrderKind::MailReply => "mail_reply",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "query_full" => Some(OrderKind::QueryFull),
            "intent_regen" => Some(OrderKind::IntentRegen),
            "article_regen_keep_title" => Some(OrderKind::ArticleRegenKeepTitle),
            "mail_reply" => Some(OrderKind::MailReply),
            _ => None,
        }
    }

    /// Search orders scoped to a single intent of a query.
    pub fn is_per_intent(&self) -> bool {
        matches!(self, OrderKind::IntentRegen | OrderKind::ArticleRegenKeepTitle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestedBy {
    User,
    System,
}

#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub query_id: Option<i64>,
    pub kind: OrderKind,
    pub intent_id: Option<i64>,
    pub article_id: Option<i64>,
    pub status: OrderStatus,
    pub requested_by: RequestedBy,
    pub request_payload: Option<String>,
    pub result_summary: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for a new order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub query_id: Option<i64>,
    pub kind: OrderKind,
    pub intent_id: Option<i64>,
    pub article_id: Option<i64>,
    pub requested_by: RequestedBy,
    pub request_payload: Option<serde_json::Value>,
}

impl Order {
    pub async fn create(pool: &SqlitePool, new: NewOrder) -> Result<Order, StoreError> {
        let now = now_iso();
        let result = sqlx::query(
            r#"
            INSERT INTO generation_orders
                (query_id, kind, intent_id, article_id, status, requested_by,
                 request_payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'queued', ?, ?, ?, ?)
            "#,
        )
        .bind(new.query_id)
        .bind(new.kind)
        .bind(new.intent_id)
        .bind(new.article_id)
        .bind(new.requested_by)
        .bind(new.request_payload.map(|v| v.to_string()))
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;

        Self::find_by_id(pool, result.last_insert_rowid()).await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Order, StoreError> {
        sqlx::query_as::<_, Order>("SELECT * FROM generation_orders WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::classify)?
            .ok_or(StoreError::NotFound)
    }

    pub async fn list(pool: &SqlitePool, limit: i64) -> Result<Vec<Order>, StoreError> {
        sqlx::query_as::<_, Order>("SELECT * FROM generation_orders ORDER BY id DESC LIMIT ?")
            .bind(limit)
            .fetch_all(pool)
            .await
            .map_err(StoreError::classify)
    }

    /// Orders for a query that still occupy their scope.
    pub async fn find_active_for_query(
        pool: &SqlitePool,
        query_id: i64,
    ) -> Result<Vec<Order>, StoreError> {
        sqlx::query_as::<_, Order>(
            "SELECT * FROM generation_orders
             WHERE query_id = ? AND status IN ('queued', 'running')
             ORDER BY id ASC",
        )
        .bind(query_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::classify)
    }

    /// Claim the oldest queued order: set it `running` and stamp
    /// `started_at`, all inside one transaction. Returns `None` when the
    /// queue is empty or another claimer won the conditional UPDATE.
    pub async fn claim_next(pool: &SqlitePool) -> Result<Option<Order>, StoreError> {
        let mut tx = pool.begin().await.map_err(StoreError::classify)?;

        let candidate: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM generation_orders WHERE status = 'queued' ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::classify)?;

        let Some(id) = candidate else {
            return Ok(None);
        };

        let now = now_iso();
        let updated = sqlx::query(
            "UPDATE generation_orders
             SET status = 'running', started_at = ?, updated_at = ?
             WHERE id = ? AND status = 'queued'",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::classify)?;

        if updated.rows_affected() == 0 {
            // Lost the race.
            return Ok(None);
        }

        let order = sqlx::query_as::<_, Order>("SELECT * FROM generation_orders WHERE id = ?")
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(StoreError::classify)?;

        tx.commit().await.map_err(StoreError::classify)?;
        Ok(Some(order))
    }

    /// Crash recovery: flip stale `running` rows back to `queued`. A process
    /// that died mid-run leaves `started_at` behind; once it ages past
    /// `max_run_seconds` the next live worker reclaims the order.
    pub async fn requeue_expired(
        pool: &SqlitePool,
        max_run_seconds: i64,
    ) -> Result<u64, StoreError> {
        let cutoff = to_iso(Utc::now() - Duration::seconds(max_run_seconds));
        let result = sqlx::query(
            "UPDATE generation_orders
             SET status = 'queued',
                 started_at = NULL,
                 error_message = 'requeued: run exceeded the maximum duration',
                 updated_at = ?
             WHERE status = 'running' AND started_at <= ?",
        )
        .bind(now_iso())
        .bind(cutoff)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.rows_affected())
    }

    /// `running → completed`. Returns false if the order was not running.
    pub async fn complete(
        pool: &SqlitePool,
        id: i64,
        result_summary: Option<&str>,
    ) -> Result<bool, StoreError> {
        let now = now_iso();
        let result = sqlx::query(
            "UPDATE generation_orders
             SET status = 'completed', result_summary = ?, finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(result_summary)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.rows_affected() > 0)
    }

    /// `running → failed`. Returns false if the order was not running.
    pub async fn fail(pool: &SqlitePool, id: i64, message: &str) -> Result<bool, StoreError> {
        let now = now_iso();
        let result = sqlx::query(
            "UPDATE generation_orders
             SET status = 'failed', error_message = ?, finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(message)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.rows_affected() > 0)
    }

    /// `queued → cancelled`. Running orders are never interrupted.
    pub async fn cancel(pool: &SqlitePool, id: i64) -> Result<bool, StoreError> {
        let now = now_iso();
        let result = sqlx::query(
            "UPDATE generation_orders
             SET status = 'cancelled', finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'queued'",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.rows_affected() > 0)
    }

    /// Parse the request payload JSON, if any.
    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<Option<T>> {
        match &self.request_payload {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }
}
