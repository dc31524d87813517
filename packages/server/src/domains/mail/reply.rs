//! Mail reply model. A thread owns its replies in insertion order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::common::{now_iso, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReplyRole {
    User,
    Assistant,
    System,
}

impl ReplyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyRole::User => "user",
            ReplyRole::Assistant => "assistant",
            ReplyRole::System => "system",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReplyStatus {
    Pending,
    Streaming,
    Completed,
    Error,
}

#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailReply {
    pub id: i64,
    pub thread_id: i64,
    pub role: ReplyRole,
    pub content: String,
    pub status: ReplyStatus,
    pub unread: bool,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MailReply {
    pub async fn append(
        pool: &SqlitePool,
        thread_id: i64,
        role: ReplyRole,
        content: &str,
        status: ReplyStatus,
        unread: bool,
        model: Option<&str>,
    ) -> Result<MailReply, StoreError> {
        let result = sqlx::query(
            "INSERT INTO mail_replies (thread_id, role, content, status, unread, model, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(thread_id)
        .bind(role)
        .bind(content)
        .bind(status)
        .bind(unread)
        .bind(model)
        .bind(now_iso())
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;

        Self::find_by_id(pool, result.last_insert_rowid()).await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<MailReply, StoreError> {
        sqlx::query_as::<_, MailReply>("SELECT * FROM mail_replies WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::classify)?
            .ok_or(StoreError::NotFound)
    }

    /// Full reply history of a thread, oldest first.
    pub async fn history(pool: &SqlitePool, thread_id: i64) -> Result<Vec<MailReply>, StoreError> {
        sqlx::query_as::<_, MailReply>(
            "SELECT * FROM mail_replies WHERE thread_id = ? ORDER BY id ASC",
        )
        .bind(thread_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::classify)
    }
}
