//! Runtime settings cache.
//!
//! Tunables live in the `runtime_settings` table so operators can adjust them
//! without a restart. Reads go through a short-TTL snapshot; a failed refresh
//! keeps serving the previous snapshot, and unparsable values fall back to
//! their defaults. Settings problems never abort the engine.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sqlx::SqlitePool;
use tokio::sync::RwLock;

pub const KEY_RETRY_MAX_ATTEMPTS: &str = "llm.retry.max_attempts";
pub const KEY_RETRY_TIMEOUT_MS: &str = "llm.retry.timeout_ms";
pub const KEY_MAIL_MAX_MESSAGES: &str = "mail.context.max_messages";
pub const KEY_MAIL_SUMMARY_TRIGGER: &str = "mail.context.summary_trigger_token_count";
pub const KEY_MAIL_ATTACHMENTS_MAX: &str = "mail.attachments.max_count";
pub const KEY_MAIL_ATTACHMENT_TEXT_CHARS: &str = "mail.attachments.max_text_chars";

const SNAPSHOT_TTL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Snapshot {
    loaded_at: Option<Instant>,
    values: HashMap<String, String>,
}

pub struct RuntimeSettings {
    pool: SqlitePool,
    ttl: Duration,
    snapshot: RwLock<Snapshot>,
}

impl RuntimeSettings {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            ttl: SNAPSHOT_TTL,
            snapshot: RwLock::new(Snapshot::default()),
        })
    }

    #[cfg(test)]
    pub fn with_ttl(pool: SqlitePool, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            pool,
            ttl,
            snapshot: RwLock::new(Snapshot::default()),
        })
    }

    /// Attempts per provider call. Default 2, never below 1.
    pub async fn retry_max_attempts(&self) -> u32 {
        self.get_parsed(KEY_RETRY_MAX_ATTEMPTS, 2u32).await.max(1)
    }

    /// Per-attempt wall-clock timeout in milliseconds. Default 20 000.
    pub async fn retry_timeout_ms(&self) -> u64 {
        self.get_parsed(KEY_RETRY_TIMEOUT_MS, 20_000u64).await
    }

    /// Sliding window size for mail reply generation. Default 20.
    pub async fn mail_max_messages(&self) -> usize {
        self.get_parsed(KEY_MAIL_MAX_MESSAGES, 20usize).await
    }

    /// Estimated-token threshold above which a thread summary is produced.
    /// Default 5 000; tokens are estimated as ceil(chars / 4).
    pub async fn mail_summary_trigger_tokens(&self) -> u64 {
        self.get_parsed(KEY_MAIL_SUMMARY_TRIGGER, 5_000u64).await
    }

    /// Attachment count cap passed to the provider. Default 3.
    pub async fn mail_attachments_max_count(&self) -> u32 {
        self.get_parsed(KEY_MAIL_ATTACHMENTS_MAX, 3u32).await
    }

    /// Text attachment length cap in characters.
    pub async fn mail_attachment_max_text_chars(&self) -> u32 {
        self.get_parsed(KEY_MAIL_ATTACHMENT_TEXT_CHARS, 8_000u32).await
    }

    async fn get_parsed<T: FromStr + Copy>(&self, key: &str, default: T) -> T {
        match self.get_raw(key).await {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, "unparsable runtime setting, using default");
                default
            }),
            None => default,
        }
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        {
            let snapshot = self.snapshot.read().await;
            if snapshot
                .loaded_at
                .is_some_and(|at| at.elapsed() < self.ttl)
            {
                return snapshot.values.get(key).cloned();
            }
        }

        let mut snapshot = self.snapshot.write().await;
        // Another task may have refreshed while we waited for the write lock.
        if !snapshot
            .loaded_at
            .is_some_and(|at| at.elapsed() < self.ttl)
        {
            match sqlx::query_as::<_, (String, String)>("SELECT key, value FROM runtime_settings")
                .fetch_all(&self.pool)
                .await
            {
                Ok(rows) => {
                    snapshot.values = rows.into_iter().collect();
                    snapshot.loaded_at = Some(Instant::now());
                }
                Err(e) => {
                    // Serve the stale snapshot; retry on the next access.
                    tracing::warn!(error = %e, "failed to refresh runtime settings");
                    snapshot.loaded_at = Some(Instant::now());
                }
            }
        }
        snapshot.values.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        crate::kernel::test_support::test_pool().await
    }

    async fn set(pool: &SqlitePool, key: &str, value: &str) {
        sqlx::query(
            "INSERT INTO runtime_settings (key, value, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn defaults_apply_when_table_is_empty() {
        let settings = RuntimeSettings::new(test_pool().await);
        assert_eq!(settings.retry_max_attempts().await, 2);
        assert_eq!(settings.retry_timeout_ms().await, 20_000);
        assert_eq!(settings.mail_max_messages().await, 20);
        assert_eq!(settings.mail_summary_trigger_tokens().await, 5_000);
        assert_eq!(settings.mail_attachments_max_count().await, 3);
    }

    #[tokio::test]
    async fn values_are_read_from_the_table() {
        let pool = test_pool().await;
        set(&pool, KEY_RETRY_MAX_ATTEMPTS, "4").await;
        set(&pool, KEY_RETRY_TIMEOUT_MS, "1500").await;
        let settings = RuntimeSettings::new(pool);
        assert_eq!(settings.retry_max_attempts().await, 4);
        assert_eq!(settings.retry_timeout_ms().await, 1_500);
    }

    #[tokio::test]
    async fn garbage_values_fall_back_to_defaults() {
        let pool = test_pool().await;
        set(&pool, KEY_RETRY_MAX_ATTEMPTS, "lots").await;
        let settings = RuntimeSettings::new(pool);
        assert_eq!(settings.retry_max_attempts().await, 2);
    }

    #[tokio::test]
    async fn max_attempts_never_drops_below_one() {
        let pool = test_pool().await;
        set(&pool, KEY_RETRY_MAX_ATTEMPTS, "0").await;
        let settings = RuntimeSettings::new(pool);
        assert_eq!(settings.retry_max_attempts().await, 1);
    }

    #[tokio::test]
    async fn snapshot_is_cached_until_the_ttl_expires() {
        let pool = test_pool().await;
        set(&pool, KEY_RETRY_MAX_ATTEMPTS, "4").await;
        let settings = RuntimeSettings::with_ttl(pool.clone(), Duration::from_secs(300));
        assert_eq!(settings.retry_max_attempts().await, 4);

        // A write inside the TTL window is not observed.
        set(&pool, KEY_RETRY_MAX_ATTEMPTS, "9").await;
        assert_eq!(settings.retry_max_attempts().await, 4);
    }
}
