use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};

use super::DocumentStore;
use crate::models::{Document, DocumentStatus};
use crate::types::{AppError, AppResult};

/// Postgres-backed document records (`documents` table, see `migrations/`).
#[derive(Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn document_from_row(row: &PgRow) -> AppResult<Document> {
    let source_type: String = row.try_get("source_type")?;
    let status: String = row.try_get("status")?;
    let chunk_count: i32 = row.try_get("chunk_count")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    let uploaded_at: DateTime<Utc> = row.try_get("uploaded_at")?;

    Ok(Document {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        title: row.try_get("title")?,
        source_type: source_type.parse()?,
        chunk_count: chunk_count.max(0) as usize,
        uploaded_at,
        metadata: match metadata {
            serde_json::Value::Object(map) => map,
            _ => Default::default(),
        },
        status: DocumentStatus::parse(&status)
            .ok_or_else(|| AppError::Internal(format!("unknown document status: {}", status)))?,
    })
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert(&self, document: &Document) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, title, source_type, chunk_count, uploaded_at, metadata, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&document.id)
        .bind(&document.user_id)
        .bind(&document.title)
        .bind(document.source_type.to_string())
        .bind(i32::try_from(document.chunk_count).unwrap_or(i32::MAX))
        .bind(document.uploaded_at)
        .bind(serde_json::Value::Object(document.metadata.clone()))
        .bind(document.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status(&self, document_id: &str, status: DocumentStatus) -> AppResult<()> {
        sqlx::query("UPDATE documents SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, user_id: &str, document_id: &str) -> AppResult<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = $1 AND user_id = $2")
            .bind(document_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(document_from_row).transpose()
    }

    async fn list(&self, user_id: &str) -> AppResult<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE user_id = $1 ORDER BY uploaded_at DESC")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(document_from_row).collect()
    }

    async fn delete(&self, user_id: &str, document_id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1 AND user_id = $2")
            .bind(document_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
