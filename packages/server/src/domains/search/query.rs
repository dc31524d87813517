//! Query model and the filetype operator tokenizer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::common::{now_iso, StoreError};

pub const DEFAULT_FILETYPE: &str = "md";

#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub id: i64,
    pub value: String,
    /// The raw input before spell correction.
    pub original_value: String,
    pub language: String,
    pub created_at: DateTime<Utc>,
}

/// Result of collapsing `filetype:xxx` operators out of a query value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub clean: String,
    pub filetype: String,
}

/// Extract `filetype:<token>` operators from a query value.
///
/// The last valid operator wins; valid tokens match
/// `[a-z0-9][a-z0-9_-]{0,15}`. Invalid operators and every other token stay
/// in the clean query. Defaults to `md`.
pub fn parse_filetype_operators(raw: &str) -> ParsedQuery {
    let mut filetype: Option<String> = None;
    let mut kept: Vec<&str> = Vec::new();

    for token in raw.split_whitespace() {
        match token.strip_prefix("filetype:") {
            Some(candidate) if is_valid_filetype(candidate) => {
                filetype = Some(candidate.to_string());
            }
            _ => kept.push(token),
        }
    }

    ParsedQuery {
        clean: kept.join(" "),
        filetype: filetype.unwrap_or_else(|| DEFAULT_FILETYPE.to_string()),
    }
}

fn is_valid_filetype(token: &str) -> bool {
    let mut chars = token.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    token.len() <= 16
        && (first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

impl Query {
    /// Insert or refresh the `(value, language)` row. `original_value`
    /// tracks the latest raw submission that resolved to this query.
    pub async fn upsert(
        pool: &SqlitePool,
        value: &str,
        original_value: &str,
        language: &str,
    ) -> Result<Query, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO queries (value, original_value, language, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (value, language) DO UPDATE SET original_value = excluded.original_value
            "#,
        )
        .bind(value)
        .bind(original_value)
        .bind(language)
        .bind(now_iso())
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;

        sqlx::query_as::<_, Query>("SELECT * FROM queries WHERE value = ? AND language = ?")
            .bind(value)
            .bind(language)
            .fetch_one(pool)
            .await
            .map_err(StoreError::classify)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<Query, StoreError> {
        sqlx::query_as::<_, Query>("SELECT * FROM queries WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::classify)?
            .ok_or(StoreError::NotFound)
    }

    /// Record one submission against this query.
    pub async fn record_history(
        pool: &SqlitePool,
        query_id: i64,
        raw_input: &str,
        correction_applied: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO query_history (query_id, raw_input, correction_applied, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(query_id)
        .bind(raw_input)
        .bind(correction_applied)
        .bind(now_iso())
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_without_operators_default_to_md() {
        let parsed = parse_filetype_operators("sqlite fts5 bm25");
        assert_eq!(parsed.clean, "sqlite fts5 bm25");
        assert_eq!(parsed.filetype, "md");
    }

    #[test]
    fn the_last_valid_operator_wins() {
        let parsed = parse_filetype_operators("rust filetype:md async filetype:rs");
        assert_eq!(parsed.clean, "rust async");
        assert_eq!(parsed.filetype, "rs");
    }

    #[test]
    fn invalid_operators_stay_in_the_clean_query() {
        // Uppercase, too long, empty: none are valid filetypes.
        let parsed = parse_filetype_operators("a filetype:MD filetype: b filetype:aaaaaaaaaaaaaaaaa");
        assert_eq!(parsed.clean, "a filetype:MD filetype: b filetype:aaaaaaaaaaaaaaaaa");
        assert_eq!(parsed.filetype, "md");
    }

    #[test]
    fn operators_allow_digits_dash_and_underscore() {
        assert_eq!(parse_filetype_operators("x filetype:c99").filetype, "c99");
        assert_eq!(
            parse_filetype_operators("x filetype:tar-gz").filetype,
            "tar-gz"
        );
        assert_eq!(
            parse_filetype_operators("x filetype:my_doc").filetype,
            "my_doc"
        );
    }

    async fn pool() -> SqlitePool {
        crate::kernel::test_support::test_pool().await
    }

    #[tokio::test]
    async fn upsert_is_stable_per_value_and_language() {
        let pool = pool().await;
        let first = Query::upsert(&pool, "rust async", "rust asinc", "en")
            .await
            .unwrap();
        let second = Query::upsert(&pool, "rust async", "rust async", "en")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.original_value, "rust async");

        // Same value in another language is a different row.
        let de = Query::upsert(&pool, "rust async", "rust async", "de")
            .await
            .unwrap();
        assert_ne!(de.id, first.id);
    }

    #[tokio::test]
    async fn history_rows_accumulate() {
        let pool = pool().await;
        let query = Query::upsert(&pool, "q", "q", "en").await.unwrap();
        Query::record_history(&pool, query.id, "q", false).await.unwrap();
        Query::record_history(&pool, query.id, "qq", true).await.unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM query_history WHERE query_id = ?")
                .bind(query.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 2);
    }
}
