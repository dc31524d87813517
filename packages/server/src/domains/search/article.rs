//! Article model with slug deduplication and keep-title semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

use crate::common::{now_iso, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    PreviewReady,
    ContentGenerating,
    ContentReady,
    ContentFailed,
}

#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i64,
    pub query_id: Option<i64>,
    pub intent_id: Option<i64>,
    pub slug: String,
    pub title: String,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub status: ArticleStatus,
    pub filetype: String,
    pub generated_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a pipeline writes after a successful generation.
#[derive(Debug, Clone)]
pub struct ArticleUpsert {
    pub query_id: i64,
    pub intent_id: i64,
    pub slug: String,
    pub title: String,
    pub summary: Option<String>,
    pub content: String,
    pub filetype: String,
    pub generated_by: String,
    /// Preserve the existing title instead of the freshly generated one.
    pub keep_title: bool,
    /// Update the intent's existing article in place rather than adding a
    /// sibling. True for every order kind except `query_full`.
    pub replace_existing_for_intent: bool,
}

impl Article {
    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Article, StoreError> {
        sqlx::query_as::<_, Article>("SELECT * FROM articles WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::classify)?
            .ok_or(StoreError::NotFound)
    }

    pub async fn find_for_intent(
        pool: &SqlitePool,
        intent_id: i64,
    ) -> Result<Option<Article>, StoreError> {
        sqlx::query_as::<_, Article>(
            "SELECT * FROM articles WHERE intent_id = ? ORDER BY id ASC LIMIT 1",
        )
        .bind(intent_id)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::classify)
    }

    pub async fn upsert(pool: &SqlitePool, spec: ArticleUpsert) -> Result<Article, StoreError> {
        let existing = if spec.replace_existing_for_intent {
            Self::find_for_intent(pool, spec.intent_id).await?
        } else {
            None
        };

        let now = now_iso();
        match existing {
            Some(current) => {
                // In-place replacement keeps the row identity and its slug.
                let title = if spec.keep_title {
                    current.title.clone()
                } else {
                    spec.title
                };
                sqlx::query(
                    r#"
                    UPDATE articles
                    SET title = ?, summary = ?, content = ?, status = 'content_ready',
                        filetype = ?, generated_by = ?, query_id = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                )
                .bind(&title)
                .bind(&spec.summary)
                .bind(&spec.content)
                .bind(&spec.filetype)
                .bind(&spec.generated_by)
                .bind(spec.query_id)
                .bind(&now)
                .bind(current.id)
                .execute(pool)
                .await
                .map_err(StoreError::classify)?;

                Self::find_by_id(pool, current.id).await
            }
            None => {
                let slug =
                    ensure_unique_slug(pool, &normalize_slug(&spec.slug, &spec.filetype)).await?;
                let result = sqlx::query(
                    r#"
                    INSERT INTO articles
                        (query_id, intent_id, slug, title, summary, content, status,
                         filetype, generated_by, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, 'content_ready', ?, ?, ?, ?)
                    "#,
                )
                .bind(spec.query_id)
                .bind(spec.intent_id)
                .bind(&slug)
                .bind(&spec.title)
                .bind(&spec.summary)
                .bind(&spec.content)
                .bind(&spec.filetype)
                .bind(&spec.generated_by)
                .bind(&now)
                .bind(&now)
                .execute(pool)
                .await
                .map_err(StoreError::classify)?;

                Self::find_by_id(pool, result.last_insert_rowid()).await
            }
        }
    }
}

/// Make sure the slug ends in the filetype extension.
fn normalize_slug(slug: &str, filetype: &str) -> String {
    let suffix = format!(".{filetype}");
    if slug.ends_with(&suffix) {
        slug.to_string()
    } else {
        format!("{slug}{suffix}")
    }
}

/// Resolve slug collisions by suffixing `-2`, `-3`, … before the extension:
/// `foo.md`, `foo-2.md`, `foo-3.md`.
async fn ensure_unique_slug(pool: &SqlitePool, desired: &str) -> Result<String, StoreError> {
    let (base, ext) = match desired.rsplit_once('.') {
        Some((base, ext)) => (base.to_string(), Some(ext.to_string())),
        None => (desired.to_string(), None),
    };

    let mut candidate = desired.to_string();
    let mut n = 1;
    loop {
        let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM articles WHERE slug = ?")
            .bind(&candidate)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::classify)?;
        if taken.is_none() {
            return Ok(candidate);
        }
        n += 1;
        candidate = match &ext {
            Some(ext) => format!("{base}-{n}.{ext}"),
            None => format!("{base}-{n}"),
        };
    }
}
