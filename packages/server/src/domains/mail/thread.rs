//! Mail thread model and title derivation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use crate::common::{now_iso, StoreError};

#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailThread {
    pub id: i64,
    pub uid: String,
    pub title: String,
    pub user_set_title: bool,
    pub context_summary: Option<String>,
    pub summary_token_count: Option<i64>,
    pub last_summarized_reply_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailThread {
    /// Create a thread. A caller-supplied title pins `user_set_title`.
    pub async fn create(pool: &SqlitePool, title: Option<&str>) -> Result<MailThread, StoreError> {
        let uid = Uuid::new_v4().to_string();
        let now = now_iso();
        sqlx::query(
            "INSERT INTO mail_threads (uid, title, user_set_title, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&uid)
        .bind(title.unwrap_or(""))
        .bind(title.is_some())
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;

        Self::find_by_uid(pool, &uid).await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<MailThread, StoreError> {
        sqlx::query_as::<_, MailThread>("SELECT * FROM mail_threads WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::classify)?
            .ok_or(StoreError::NotFound)
    }

    pub async fn find_by_uid(pool: &SqlitePool, uid: &str) -> Result<MailThread, StoreError> {
        sqlx::query_as::<_, MailThread>("SELECT * FROM mail_threads WHERE uid = ?")
            .bind(uid)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::classify)?
            .ok_or(StoreError::NotFound)
    }

    pub async fn list(pool: &SqlitePool) -> Result<Vec<MailThread>, StoreError> {
        sqlx::query_as::<_, MailThread>("SELECT * FROM mail_threads ORDER BY updated_at DESC")
            .fetch_all(pool)
            .await
            .map_err(StoreError::classify)
    }

    /// Set a derived title; never overrides one the user chose.
    pub async fn set_derived_title(
        pool: &SqlitePool,
        id: i64,
        title: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE mail_threads SET title = ?, updated_at = ?
             WHERE id = ? AND user_set_title = 0 AND title = ''",
        )
        .bind(title)
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(result.rows_affected() > 0)
    }

    /// Store the rolling context summary produced for long threads.
    pub async fn set_context_summary(
        pool: &SqlitePool,
        id: i64,
        summary: &str,
        token_count: i64,
        last_reply_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE mail_threads
             SET context_summary = ?, summary_token_count = ?, last_summarized_reply_id = ?,
                 updated_at = ?
             WHERE id = ?",
        )
        .bind(summary)
        .bind(token_count)
        .bind(last_reply_id)
        .bind(now_iso())
        .bind(id)
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(())
    }

    pub async fn touch(pool: &SqlitePool, id: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE mail_threads SET updated_at = ? WHERE id = ?")
            .bind(now_iso())
            .bind(id)
            .execute(pool)
            .await
            .map_err(StoreError::classify)?;
        Ok(())
    }

    pub async fn unread_count(pool: &SqlitePool, id: i64) -> Result<i64, StoreError> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM mail_replies WHERE thread_id = ? AND unread = 1",
        )
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(StoreError::classify)
    }

    /// Clear unread flags for the whole thread.
    pub async fn mark_read(pool: &SqlitePool, id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE mail_replies SET unread = 0 WHERE thread_id = ? AND unread = 1")
            .bind(id)
            .execute(pool)
            .await
            .map_err(StoreError::classify)?;
        Ok(result.rows_affected())
    }
}

/// Derive a thread title from user content: first non-empty line, markdown
/// markers stripped, whitespace collapsed, at most 64 chars with an ellipsis
/// when truncated.
pub fn derive_thread_title(content: &str) -> String {
    for line in content.lines() {
        let stripped = line
            .trim()
            .trim_start_matches(['#', '>', '-', '*', ' '])
            .replace(['`', '_'], "");
        let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            continue;
        }
        let chars: Vec<char> = collapsed.chars().collect();
        if chars.len() <= 64 {
            return collapsed;
        }
        let mut truncated: String = chars[..63].iter().collect();
        truncated.push('…');
        return truncated;
    }
    String::new()
}
