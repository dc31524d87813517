//! Mail attachment model. Text attachments store UTF-8 in `text_content`;
//! image attachments store bytes in `binary`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};

use crate::common::{now_iso, StoreError};

#[derive(FromRow, Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MailAttachment {
    pub id: i64,
    pub reply_id: i64,
    pub kind: String,
    pub mime_type: String,
    pub file_name: Option<String>,
    #[serde(skip_serializing)]
    pub text_content: Option<String>,
    #[serde(skip_serializing)]
    pub binary: Option<Vec<u8>>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl MailAttachment {
    pub async fn insert_text(
        pool: &SqlitePool,
        reply_id: i64,
        file_name: &str,
        content: &str,
    ) -> Result<MailAttachment, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO mail_attachments
                (reply_id, kind, mime_type, file_name, text_content, created_at)
            VALUES (?, 'text', 'text/plain; charset=utf-8', ?, ?, ?)
            "#,
        )
        .bind(reply_id)
        .bind(file_name)
        .bind(content)
        .bind(now_iso())
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;

        Self::find_by_id(pool, result.last_insert_rowid()).await
    }

    pub async fn insert_image(
        pool: &SqlitePool,
        reply_id: i64,
        mime_type: &str,
        bytes: &[u8],
        description: &str,
    ) -> Result<MailAttachment, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO mail_attachments
                (reply_id, kind, mime_type, binary, description, created_at)
            VALUES (?, 'image', ?, ?, ?, ?)
            "#,
        )
        .bind(reply_id)
        .bind(mime_type)
        .bind(bytes)
        .bind(description)
        .bind(now_iso())
        .execute(pool)
        .await
        .map_err(StoreError::classify)?;

        Self::find_by_id(pool, result.last_insert_rowid()).await
    }

    pub async fn find_by_id(pool: &SqlitePool, id: i64) -> Result<MailAttachment, StoreError> {
        sqlx::query_as::<_, MailAttachment>("SELECT * FROM mail_attachments WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(StoreError::classify)?
            .ok_or(StoreError::NotFound)
    }

    pub async fn for_reply(
        pool: &SqlitePool,
        reply_id: i64,
    ) -> Result<Vec<MailAttachment>, StoreError> {
        sqlx::query_as::<_, MailAttachment>(
            "SELECT * FROM mail_attachments WHERE reply_id = ? ORDER BY id ASC",
        )
        .bind(reply_id)
        .fetch_all(pool)
        .await
        .map_err(StoreError::classify)
    }

    /// The payload a download endpoint streams: stored bytes for images,
    /// UTF-8 text otherwise.
    pub fn bytes(&self) -> Vec<u8> {
        match (&self.binary, &self.text_content) {
            (Some(binary), _) => binary.clone(),
            (None, Some(text)) => text.clone().into_bytes(),
            (None, None) => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn text_and_image_attachments_roundtrip() {
        let pool = crate::kernel::test_support::test_pool().await;

        let text = MailAttachment::insert_text(&pool, 1, "notes.txt", "hello")
            .await
            .unwrap();
        assert_eq!(text.kind, "text");
        assert_eq!(text.mime_type, "text/plain; charset=utf-8");
        assert_eq!(text.bytes(), b"hello");

        let image = MailAttachment::insert_image(&pool, 1, "image/png", &[1, 2, 3], "a cat")
            .await
            .unwrap();
        assert_eq!(image.kind, "image");
        assert_eq!(image.bytes(), vec![1, 2, 3]);
        assert_eq!(image.description.as_deref(), Some("a cat"));

        let all = MailAttachment::for_reply(&pool, 1).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
