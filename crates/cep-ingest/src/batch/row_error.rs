//! Row error log
//!
//! One row per rejected record. The original payload is kept as JSON so an
//! operator can fix and retry individual rows without the source file.

use cep_common::taxonomy::ErrorCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// One rejected record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RowError {
    pub id: Uuid,
    pub batch_upload_id: Uuid,
    pub row_number: i64,
    pub error_code: String,
    pub error_message: String,
    pub row_data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl RowError {
    pub async fn record(
        pool: &PgPool,
        batch_upload_id: Uuid,
        row_number: i64,
        code: ErrorCode,
        message: &str,
        row_data: Option<serde_json::Value>,
    ) -> Result<Self, sqlx::Error> {
        let row: RowError = sqlx::query_as(
            "INSERT INTO row_errors \
                 (batch_upload_id, row_number, error_code, error_message, row_data) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, batch_upload_id, row_number, error_code, error_message, \
                       row_data, created_at",
        )
        .bind(batch_upload_id)
        .bind(row_number)
        .bind(code.as_str())
        .bind(message)
        .bind(row_data)
        .fetch_one(pool)
        .await?;

        Ok(row)
    }

    /// All errors for a batch, in row order
    pub async fn for_batch(
        pool: &PgPool,
        batch_upload_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, batch_upload_id, row_number, error_code, error_message, \
                    row_data, created_at \
             FROM row_errors \
             WHERE batch_upload_id = $1 \
             ORDER BY row_number",
        )
        .bind(batch_upload_id)
        .fetch_all(pool)
        .await
    }

    /// Taxonomy code, parsed back from its stored string form
    pub fn code(&self) -> Option<ErrorCode> {
        self.error_code.parse().ok()
    }
}
