//! BatchUpload aggregate
//!
//! Lifecycle: `pending → processing → {completed, failed}`. `pending` is the
//! only creatable state; nothing leaves a terminal state. Transitions are
//! guarded in SQL (`WHERE status IN (...)`) so a stale caller gets
//! [`LifecycleError::InvalidTransition`] instead of silently corrupting the
//! aggregate.
//!
//! Only the processing worker mutates a batch after creation. Rows are
//! retained indefinitely for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::certification::Certification;

/// Channel a batch arrived through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Ui,
    Api,
    StorageEvent,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Ui => "ui",
            SourceType::Api => "api",
            SourceType::StorageEvent => "storage_event",
        }
    }
}

impl From<String> for SourceType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ui" => SourceType::Ui,
            "api" => SourceType::Api,
            "storage_event" => SourceType::StorageEvent,
            _ => SourceType::Api,
        }
    }
}

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl From<String> for BatchStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "pending" => BatchStatus::Pending,
            "processing" => BatchStatus::Processing,
            "completed" => BatchStatus::Completed,
            "failed" => BatchStatus::Failed,
            _ => BatchStatus::Pending,
        }
    }
}

/// Errors from aggregate operations
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("batch upload not found: {0}")]
    NotFound(Uuid),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Parameters for creating a batch
#[derive(Debug, Clone)]
pub struct NewBatchUpload {
    pub filename: String,
    pub uploader_id: Option<Uuid>,
    pub source_type: SourceType,
    pub storage_key: String,
}

/// The batch upload aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpload {
    pub id: Uuid,
    pub filename: String,
    pub uploader_id: Option<Uuid>,
    pub source_type: SourceType,
    pub status: BatchStatus,
    pub storage_key: String,
    /// Total data rows; unknown (NULL) until the single-pass scan finishes
    pub num_rows: Option<i64>,
    pub num_rows_processed: i64,
    pub num_rows_succeeded: i64,
    pub num_rows_errored: i64,
    pub results: Option<serde_json::Value>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = "id, filename, uploader_id, source_type, status, storage_key, \
     num_rows, num_rows_processed, num_rows_succeeded, num_rows_errored, \
     results, processed_at, created_at, updated_at";

impl BatchUpload {
    /// Insert a new batch in `pending`
    pub async fn create(pool: &PgPool, new: NewBatchUpload) -> Result<Self, LifecycleError> {
        let sql = format!(
            "INSERT INTO batch_uploads (filename, uploader_id, source_type, storage_key) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {SELECT_COLUMNS}"
        );

        let row: BatchUploadRow = sqlx::query_as(&sql)
            .bind(&new.filename)
            .bind(new.uploader_id)
            .bind(new.source_type.as_str())
            .bind(&new.storage_key)
            .fetch_one(pool)
            .await?;

        Ok(row.into())
    }

    pub async fn find(pool: &PgPool, id: Uuid) -> Result<Self, LifecycleError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM batch_uploads WHERE id = $1");

        let row: Option<BatchUploadRow> =
            sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?;

        row.map(Into::into).ok_or(LifecycleError::NotFound(id))
    }

    /// True only in `pending`; callers must check before re-submitting a
    /// batch to avoid double-processing.
    pub fn processable(&self) -> bool {
        self.status == BatchStatus::Pending
    }

    /// Enter `processing` and reset the processed-row counter.
    ///
    /// Callable from `pending` (first run) and from `processing` (job retry
    /// after a crash); the reset guards against resuming stale progress.
    pub async fn start_processing(pool: &PgPool, id: Uuid) -> Result<Self, LifecycleError> {
        let sql = format!(
            "UPDATE batch_uploads \
             SET status = 'processing', num_rows_processed = 0, updated_at = now() \
             WHERE id = $1 AND status IN ('pending', 'processing') \
             RETURNING {SELECT_COLUMNS}"
        );

        let row: Option<BatchUploadRow> =
            sqlx::query_as(&sql).bind(id).fetch_optional(pool).await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(Self::transition_error(pool, id, BatchStatus::Processing).await?),
        }
    }

    /// Advance the processed-row counter by a positive delta.
    /// Only valid while `processing`.
    pub async fn update_progress(
        pool: &PgPool,
        id: Uuid,
        delta: i64,
    ) -> Result<(), LifecycleError> {
        if delta <= 0 {
            return Ok(());
        }

        let result = sqlx::query(
            "UPDATE batch_uploads \
             SET num_rows_processed = num_rows_processed + $2, updated_at = now() \
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(delta)
        .execute(pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::transition_error(pool, id, BatchStatus::Processing).await?);
        }

        Ok(())
    }

    /// Terminal success: stamp counts, totals, summary, and completion time.
    ///
    /// Partial success is still `completed` — the shortfall shows up in
    /// `results`, not the status.
    pub async fn complete_processing(
        pool: &PgPool,
        id: Uuid,
        succeeded: i64,
        errored: i64,
        results: serde_json::Value,
    ) -> Result<Self, LifecycleError> {
        let sql = format!(
            "UPDATE batch_uploads \
             SET status = 'completed', \
                 num_rows = num_rows_processed, \
                 num_rows_succeeded = $2, \
                 num_rows_errored = $3, \
                 results = $4, \
                 processed_at = now(), \
                 updated_at = now() \
             WHERE id = $1 AND status = 'processing' \
             RETURNING {SELECT_COLUMNS}"
        );

        let row: Option<BatchUploadRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(succeeded)
            .bind(errored)
            .bind(results)
            .fetch_optional(pool)
            .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(Self::transition_error(pool, id, BatchStatus::Completed).await?),
        }
    }

    /// Terminal failure: stamp the reason and completion time
    pub async fn fail_processing(
        pool: &PgPool,
        id: Uuid,
        reason: &str,
    ) -> Result<Self, LifecycleError> {
        let results = serde_json::json!({ "error": reason });

        let sql = format!(
            "UPDATE batch_uploads \
             SET status = 'failed', \
                 num_rows = num_rows_processed, \
                 results = $2, \
                 processed_at = now(), \
                 updated_at = now() \
             WHERE id = $1 AND status = 'processing' \
             RETURNING {SELECT_COLUMNS}"
        );

        let row: Option<BatchUploadRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(results)
            .fetch_optional(pool)
            .await?;

        match row {
            Some(row) => Ok(row.into()),
            None => Err(Self::transition_error(pool, id, BatchStatus::Failed).await?),
        }
    }

    /// Certifications this batch produced, via their origin rows
    pub async fn certifications(&self, pool: &PgPool) -> Result<Vec<Certification>, LifecycleError> {
        let rows = sqlx::query_as::<_, Certification>(
            "SELECT c.id, c.member_id, c.first_name, c.last_name, c.email, \
                    c.date_of_birth, c.case_number, c.certification_date, \
                    c.certification_type, c.lookback_period, c.months_to_certify, \
                    c.due_period_days, c.work_hours, c.created_at, c.updated_at \
             FROM certifications c \
             JOIN certification_origins o ON o.certification_id = c.id \
             WHERE o.source_type = 'batch_upload' AND o.source_id = $1 \
             ORDER BY c.created_at",
        )
        .bind(self.id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn certifications_count(&self, pool: &PgPool) -> Result<i64, LifecycleError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM certification_origins \
             WHERE source_type = 'batch_upload' AND source_id = $1",
        )
        .bind(self.id)
        .fetch_one(pool)
        .await?;

        Ok(count)
    }

    /// Build the InvalidTransition (or NotFound) error for a guarded update
    /// that matched no row.
    async fn transition_error(
        pool: &PgPool,
        id: Uuid,
        attempted: BatchStatus,
    ) -> Result<LifecycleError, sqlx::Error> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM batch_uploads WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;

        Ok(match status {
            Some(from) => LifecycleError::InvalidTransition {
                from,
                to: attempted.as_str().to_string(),
            },
            None => LifecycleError::NotFound(id),
        })
    }
}

// Helper struct for sqlx query_as
#[derive(Debug, sqlx::FromRow)]
struct BatchUploadRow {
    id: Uuid,
    filename: String,
    uploader_id: Option<Uuid>,
    source_type: String,
    status: String,
    storage_key: String,
    num_rows: Option<i64>,
    num_rows_processed: i64,
    num_rows_succeeded: i64,
    num_rows_errored: i64,
    results: Option<serde_json::Value>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BatchUploadRow> for BatchUpload {
    fn from(row: BatchUploadRow) -> Self {
        Self {
            id: row.id,
            filename: row.filename,
            uploader_id: row.uploader_id,
            source_type: row.source_type.into(),
            status: row.status.into(),
            storage_key: row.storage_key,
            num_rows: row.num_rows,
            num_rows_processed: row.num_rows_processed,
            num_rows_succeeded: row.num_rows_succeeded,
            num_rows_errored: row.num_rows_errored,
            results: row.results,
            processed_at: row.processed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
