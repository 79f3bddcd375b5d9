//! Chunk audit log
//!
//! One row per chunk: started at chunk start, stamped once at chunk end.
//! A row left at `started` marks a crashed chunk for the retry policy, and
//! the set of `completed` rows is the resume ledger — a rerun skips those
//! chunks and re-applies their counts instead of reprocessing them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

/// Chunk processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Started,
    Completed,
    Failed,
}

impl ChunkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStatus::Started => "started",
            ChunkStatus::Completed => "completed",
            ChunkStatus::Failed => "failed",
        }
    }
}

impl From<String> for ChunkStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "started" => ChunkStatus::Started,
            "completed" => ChunkStatus::Completed,
            "failed" => ChunkStatus::Failed,
            _ => ChunkStatus::Started,
        }
    }
}

/// One chunk's audit row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkAuditLog {
    pub id: Uuid,
    pub batch_upload_id: Uuid,
    pub chunk_number: i32,
    pub status: ChunkStatus,
    pub succeeded_count: i32,
    pub failed_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = "id, batch_upload_id, chunk_number, status, \
     succeeded_count, failed_count, created_at, updated_at";

impl ChunkAuditLog {
    /// Mark a chunk as started.
    ///
    /// Upserts on `(batch, chunk_number)`: a retry of a crashed chunk
    /// re-arms the existing row instead of violating the unique constraint.
    pub async fn start(
        pool: &PgPool,
        batch_upload_id: Uuid,
        chunk_number: i32,
    ) -> Result<Self, sqlx::Error> {
        let sql = format!(
            "INSERT INTO chunk_audit_logs (batch_upload_id, chunk_number) \
             VALUES ($1, $2) \
             ON CONFLICT (batch_upload_id, chunk_number) \
             DO UPDATE SET status = 'started', updated_at = now() \
             RETURNING {SELECT_COLUMNS}"
        );

        let row: ChunkAuditRow = sqlx::query_as(&sql)
            .bind(batch_upload_id)
            .bind(chunk_number)
            .fetch_one(pool)
            .await?;

        Ok(row.into())
    }

    /// Stamp a chunk's terminal outcome
    pub async fn complete(
        pool: &PgPool,
        batch_upload_id: Uuid,
        chunk_number: i32,
        succeeded_count: i32,
        failed_count: i32,
    ) -> Result<(), sqlx::Error> {
        Self::finish(
            pool,
            batch_upload_id,
            chunk_number,
            ChunkStatus::Completed,
            succeeded_count,
            failed_count,
        )
        .await
    }

    pub async fn fail(
        pool: &PgPool,
        batch_upload_id: Uuid,
        chunk_number: i32,
        succeeded_count: i32,
        failed_count: i32,
    ) -> Result<(), sqlx::Error> {
        Self::finish(
            pool,
            batch_upload_id,
            chunk_number,
            ChunkStatus::Failed,
            succeeded_count,
            failed_count,
        )
        .await
    }

    async fn finish(
        pool: &PgPool,
        batch_upload_id: Uuid,
        chunk_number: i32,
        status: ChunkStatus,
        succeeded_count: i32,
        failed_count: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE chunk_audit_logs \
             SET status = $3, succeeded_count = $4, failed_count = $5, updated_at = now() \
             WHERE batch_upload_id = $1 AND chunk_number = $2",
        )
        .bind(batch_upload_id)
        .bind(chunk_number)
        .bind(status.as_str())
        .bind(succeeded_count)
        .bind(failed_count)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// All audit rows for a batch, in chunk order
    pub async fn for_batch(
        pool: &PgPool,
        batch_upload_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM chunk_audit_logs \
             WHERE batch_upload_id = $1 ORDER BY chunk_number"
        );

        let rows: Vec<ChunkAuditRow> = sqlx::query_as(&sql)
            .bind(batch_upload_id)
            .fetch_all(pool)
            .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Resume ledger: chunk_number -> (succeeded, failed) for every chunk
    /// already completed
    pub async fn completed_for_batch(
        pool: &PgPool,
        batch_upload_id: Uuid,
    ) -> Result<HashMap<i32, (i32, i32)>, sqlx::Error> {
        let rows: Vec<(i32, i32, i32)> = sqlx::query_as(
            "SELECT chunk_number, succeeded_count, failed_count \
             FROM chunk_audit_logs \
             WHERE batch_upload_id = $1 AND status = 'completed'",
        )
        .bind(batch_upload_id)
        .fetch_all(pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(chunk, succeeded, failed)| (chunk, (succeeded, failed)))
            .collect())
    }
}

// Helper struct for sqlx query_as
#[derive(Debug, sqlx::FromRow)]
struct ChunkAuditRow {
    id: Uuid,
    batch_upload_id: Uuid,
    chunk_number: i32,
    status: String,
    succeeded_count: i32,
    failed_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ChunkAuditRow> for ChunkAuditLog {
    fn from(row: ChunkAuditRow) -> Self {
        Self {
            id: row.id,
            batch_upload_id: row.batch_upload_id,
            chunk_number: row.chunk_number,
            status: row.status.into(),
            succeeded_count: row.succeeded_count,
            failed_count: row.failed_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::upload::{BatchUpload, NewBatchUpload, SourceType};

    async fn make_batch(pool: &PgPool) -> BatchUpload {
        BatchUpload::create(
            pool,
            NewBatchUpload {
                filename: "rows.csv".to_string(),
                uploader_id: None,
                source_type: SourceType::Api,
                storage_key: "batch-uploads/test/rows.csv".to_string(),
            },
        )
        .await
        .unwrap()
    }

    #[sqlx::test]
    async fn test_start_then_complete(pool: PgPool) -> sqlx::Result<()> {
        let batch = make_batch(&pool).await;

        let audit = ChunkAuditLog::start(&pool, batch.id, 1).await.unwrap();
        assert_eq!(audit.status, ChunkStatus::Started);
        assert_eq!(audit.succeeded_count, 0);

        ChunkAuditLog::complete(&pool, batch.id, 1, 98, 2).await.unwrap();

        let rows = ChunkAuditLog::for_batch(&pool, batch.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ChunkStatus::Completed);
        assert_eq!(rows[0].succeeded_count, 98);
        assert_eq!(rows[0].failed_count, 2);
        Ok(())
    }

    #[sqlx::test]
    async fn test_restart_rearms_existing_row(pool: PgPool) -> sqlx::Result<()> {
        let batch = make_batch(&pool).await;

        ChunkAuditLog::start(&pool, batch.id, 1).await.unwrap();
        ChunkAuditLog::fail(&pool, batch.id, 1, 10, 5).await.unwrap();

        // Retry of the same chunk re-arms rather than duplicating
        let again = ChunkAuditLog::start(&pool, batch.id, 1).await.unwrap();
        assert_eq!(again.status, ChunkStatus::Started);

        let rows = ChunkAuditLog::for_batch(&pool, batch.id).await.unwrap();
        assert_eq!(rows.len(), 1);
        Ok(())
    }

    #[sqlx::test]
    async fn test_completed_ledger(pool: PgPool) -> sqlx::Result<()> {
        let batch = make_batch(&pool).await;

        ChunkAuditLog::start(&pool, batch.id, 1).await.unwrap();
        ChunkAuditLog::complete(&pool, batch.id, 1, 100, 0).await.unwrap();
        ChunkAuditLog::start(&pool, batch.id, 2).await.unwrap();
        ChunkAuditLog::complete(&pool, batch.id, 2, 95, 5).await.unwrap();
        // Chunk 3 crashed mid-flight: stays started, not in the ledger
        ChunkAuditLog::start(&pool, batch.id, 3).await.unwrap();

        let ledger = ChunkAuditLog::completed_for_batch(&pool, batch.id).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger[&1], (100, 0));
        assert_eq!(ledger[&2], (95, 5));
        assert!(!ledger.contains_key(&3));
        Ok(())
    }

    #[sqlx::test]
    async fn test_cascade_delete_with_batch(pool: PgPool) -> sqlx::Result<()> {
        let batch = make_batch(&pool).await;
        ChunkAuditLog::start(&pool, batch.id, 1).await.unwrap();

        sqlx::query("DELETE FROM batch_uploads WHERE id = $1")
            .bind(batch.id)
            .execute(&pool)
            .await?;

        let rows = ChunkAuditLog::for_batch(&pool, batch.id).await.unwrap();
        assert!(rows.is_empty());
        Ok(())
    }
}
