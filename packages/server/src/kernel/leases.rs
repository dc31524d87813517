//! Advisory leases enforcing at-most-one-order-in-flight per resource scope.
//!
//! A lease row is valid only while `lease_expires_at > now`; expired rows are
//! garbage and are swept inside the acquisition transaction. Renewal is not
//! automatic; pipelines take leases with a TTL that comfortably exceeds a
//! stage, and a process that dies with leases held simply loses them at
//! expiry.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use crate::common::{time::to_iso, StoreError};

/// A `(scope_type, scope_key)` pair under mutual exclusion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseScope {
    Query { query_id: i64 },
    Intent { query_id: i64, intent_id: i64 },
    Article { article_id: i64 },
}

impl LeaseScope {
    pub fn scope_type(&self) -> &'static str {
        match self {
            LeaseScope::Query { .. } => "query",
            LeaseScope::Intent { .. } => "intent",
            LeaseScope::Article { .. } => "article",
        }
    }

    pub fn scope_key(&self) -> String {
        match self {
            LeaseScope::Query { query_id } => query_id.to_string(),
            LeaseScope::Intent {
                query_id,
                intent_id,
            } => format!("{query_id}:{intent_id}"),
            LeaseScope::Article { article_id } => article_id.to_string(),
        }
    }
}

impl std::fmt::Display for LeaseScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.scope_type(), self.scope_key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    Acquired,
    /// Another order holds a live lease on this scope.
    HeldBy { owner_order_id: i64 },
}

#[derive(Clone)]
pub struct LeaseManager {
    pool: SqlitePool,
}

impl LeaseManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Sweep expired rows, then acquire or refresh the lease.
    ///
    /// Re-acquisition by the current owner extends the lease; a live lease
    /// held by anyone else is reported with its owner so callers can say
    /// "locked by order N".
    pub async fn try_acquire(
        &self,
        order_id: i64,
        scope: &LeaseScope,
        lease_seconds: i64,
    ) -> Result<LeaseOutcome, StoreError> {
        let now = Utc::now();
        let expires = to_iso(now + Duration::seconds(lease_seconds));

        let mut tx = self.pool.begin().await.map_err(StoreError::classify)?;

        sqlx::query("DELETE FROM resource_leases WHERE lease_expires_at <= ?")
            .bind(to_iso(now))
            .execute(&mut *tx)
            .await
            .map_err(StoreError::classify)?;

        let owner: Option<i64> = sqlx::query_scalar(
            "SELECT owner_order_id FROM resource_leases WHERE scope_type = ? AND scope_key = ?",
        )
        .bind(scope.scope_type())
        .bind(scope.scope_key())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StoreError::classify)?;

        if let Some(owner_order_id) = owner {
            if owner_order_id != order_id {
                // Keep the sweep.
                tx.commit().await.map_err(StoreError::classify)?;
                return Ok(LeaseOutcome::HeldBy { owner_order_id });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO resource_leases (scope_type, scope_key, owner_order_id, lease_expires_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (scope_type, scope_key) DO UPDATE SET
                owner_order_id = excluded.owner_order_id,
                lease_expires_at = excluded.lease_expires_at
            "#,
        )
        .bind(scope.scope_type())
        .bind(scope.scope_key())
        .bind(order_id)
        .bind(&expires)
        .execute(&mut *tx)
        .await
        .map_err(StoreError::classify)?;

        tx.commit().await.map_err(StoreError::classify)?;

        tracing::debug!(order_id, scope = %scope, expires = %expires, "lease acquired");
        Ok(LeaseOutcome::Acquired)
    }

    /// Bump expiry for every lease the order holds.
    pub async fn renew_for_order(
        &self,
        order_id: i64,
        lease_seconds: i64,
    ) -> Result<u64, StoreError> {
        let expires = to_iso(Utc::now() + Duration::seconds(lease_seconds));
        let result = sqlx::query(
            "UPDATE resource_leases SET lease_expires_at = ? WHERE owner_order_id = ?",
        )
        .bind(expires)
        .bind(order_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.rows_affected())
    }

    /// Drop every lease the order holds. Runs in the worker's finally path.
    pub async fn release_for_order(&self, order_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM resource_leases WHERE owner_order_id = ?")
            .bind(order_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::classify)?;
        Ok(result.rows_affected())
    }
}
