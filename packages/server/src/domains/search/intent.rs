//! Intent model. Unique per `(intent_text, filetype)`, linked many-to-many
//! to queries through `query_intents`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::common::{now_iso, StoreError};

#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub id: i64,
    pub intent_text: String,
    pub filetype: String,
    pub title: String,
    pub summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Intent {
    pub async fn upsert(
        pool: &SqlitePool,
        intent_text: &str,
        filetype: &str,
        title: &str,
        summary: Option<&str>,
    ) -> Result<Intent, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO intents (intent_text, filetype, title, summary, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (intent_text, filetype) DO UPDATE SET
                title = excluded.title,
                summary = excluded.summary
            "#,
        )
        .bind(intent_text)
        .bind(filetype)
        .bind(title)
        .bind(summary)
        .bind(now_iso())
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;

        sqlx::query_as::<_, Intent>(
            "SELECT * FROM intents WHERE intent_text = ? AND filetype = ?",
        )
        .bind(intent_text)
        .bind(filetype)
        .fetch_one(pool)
        .await
        .map_err(StoreError::classify)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Intent, StoreError> {
        sqlx::query_as::<_, Intent>("SELECT * FROM intents WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::classify)?
            .ok_or(StoreError::NotFound)
    }

    /// Intents linked to a query, ascending by id.
    pub async fn for_query(pool: &SqlitePool, query_id: i64) -> Result<Vec<Intent>, StoreError> {
        sqlx::query_as::<_, Intent>(
            "SELECT i.* FROM intents i
             JOIN query_intents qi ON qi.intent_id = i.id
             WHERE qi.query_id = ?
             ORDER BY i.id ASC",
        )
        .bind(query_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::classify)
    }

    pub async fn link_to_query(
        pool: &SqlitePool,
        query_id: i64,
        intent_id: i64,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO query_intents (query_id, intent_id) VALUES (?, ?)")
            .bind(query_id)
            .bind(intent_id)
            .execute(pool)
            .await
            .map_err(StoreError::classify)?;
        Ok(())
    }

    /// Drop every intent link of a query. Runs before a full re-resolution.
    pub async fn clear_query_links(pool: &SqlitePool, query_id: i64) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM query_intents WHERE query_id = ?")
            .bind(query_id)
            .execute(pool)
            .await
            .map_err(StoreError::classify)?;
        Ok(result.rows_affected())
    }
}
