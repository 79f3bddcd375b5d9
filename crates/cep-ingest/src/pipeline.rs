//! Batch processing pipeline
//!
//! The per-job entry point: streams the batch's source object chunk by
//! chunk, records one audit row per chunk and one error row per rejected
//! record, and drives the aggregate to its terminal state.
//!
//! Failure handling follows the taxonomy:
//! - row-level failures (validation, duplicate, unrecognized) are recorded
//!   as RowErrors and the chunk continues
//! - database failures abort the chunk; its audit row stays `started` so
//!   the job runner retries the chunk as a unit
//! - storage failures abort the job for the runner to retry whole
//! - unknown failures outside the row boundary mark the batch failed
//!
//! Contract: at most one worker runs a given batch at a time. The queue
//! configuration enforces this; the pipeline does not take its own lock.

use std::sync::Arc;

use cep_common::taxonomy::RetryStrategy;
use serde_json::json;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::batch::{BatchUpload, ChunkAuditLog, LifecycleError, RowError};
use crate::certification::CompoundKey;
use crate::error::ProcessingError;
use crate::events::EventPublisher;
use crate::processor::{ProcessingContext, RecordProcessor};
use crate::reader::{ChunkReader, ParsedRow, RecordChunk};
use crate::storage::{ObjectStore, StorageError};

/// Failure that ends a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Processing(#[from] ProcessingError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Per-chunk counts
#[derive(Debug, Clone, Copy, Default)]
struct ChunkOutcome {
    succeeded: i64,
    failed: i64,
}

/// Worker-side pipeline over one batch at a time
pub struct BatchPipeline {
    pool: PgPool,
    store: Arc<dyn ObjectStore>,
    processor: RecordProcessor,
    chunk_size: usize,
}

impl BatchPipeline {
    pub fn new(
        pool: PgPool,
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
        chunk_size: usize,
    ) -> Self {
        let processor = RecordProcessor::new(pool.clone(), events);
        Self {
            pool,
            store,
            processor,
            chunk_size,
        }
    }

    /// Run the batch to a terminal state, or return the retryable error.
    ///
    /// Idempotent under at-least-once delivery: a batch already terminal is
    /// returned untouched, and chunks completed by an earlier attempt are
    /// skipped via the audit ledger with their counts re-applied.
    #[instrument(skip(self))]
    pub async fn run(&self, batch_upload_id: Uuid) -> Result<BatchUpload, PipelineError> {
        let batch = BatchUpload::find(&self.pool, batch_upload_id).await?;
        if batch.status.is_terminal() {
            info!(status = batch.status.as_str(), "Batch already terminal, nothing to do");
            return Ok(batch);
        }

        let batch = BatchUpload::start_processing(&self.pool, batch_upload_id).await?;
        info!(filename = %batch.filename, storage_key = %batch.storage_key, "Batch processing started");

        let ledger = ChunkAuditLog::completed_for_batch(&self.pool, batch.id).await?;

        let lines = self.store.stream_lines(&batch.storage_key).await?;
        let mut reader = ChunkReader::new(lines, self.chunk_size);

        let mut succeeded = 0i64;
        let mut errored = 0i64;
        let mut chunks = 0i64;

        while let Some(chunk) = reader.next_chunk().await? {
            chunks += 1;

            if let Some((done_ok, done_err)) = ledger.get(&chunk.chunk_number) {
                succeeded += i64::from(*done_ok);
                errored += i64::from(*done_err);
                BatchUpload::update_progress(
                    &self.pool,
                    batch.id,
                    i64::from(*done_ok) + i64::from(*done_err),
                )
                .await?;
                info!(
                    chunk_number = chunk.chunk_number,
                    "Chunk already completed in an earlier attempt, skipping"
                );
                continue;
            }

            ChunkAuditLog::start(&self.pool, batch.id, chunk.chunk_number).await?;

            match self.process_chunk(&batch, &chunk).await {
                Ok(outcome) => {
                    ChunkAuditLog::complete(
                        &self.pool,
                        batch.id,
                        chunk.chunk_number,
                        outcome.succeeded as i32,
                        outcome.failed as i32,
                    )
                    .await?;
                    BatchUpload::update_progress(
                        &self.pool,
                        batch.id,
                        outcome.succeeded + outcome.failed,
                    )
                    .await?;
                    succeeded += outcome.succeeded;
                    errored += outcome.failed;
                },
                Err(e) => return self.handle_chunk_failure(&batch, &chunk, e).await,
            }
        }

        let results = json!({
            "succeeded": succeeded,
            "errored": errored,
            "chunks": chunks,
        });
        let batch =
            BatchUpload::complete_processing(&self.pool, batch.id, succeeded, errored, results)
                .await?;

        info!(
            succeeded,
            errored,
            chunks,
            "Batch processing completed"
        );

        Ok(batch)
    }

    /// Abandon a batch: the only way out of `processing` without finishing.
    ///
    /// For the job runner (or an operator) once the retry budget for a
    /// crashed chunk or job is exhausted.
    pub async fn abandon(
        &self,
        batch_upload_id: Uuid,
        reason: &str,
    ) -> Result<BatchUpload, PipelineError> {
        warn!(batch_upload_id = %batch_upload_id, reason, "Abandoning batch");
        let batch = BatchUpload::fail_processing(&self.pool, batch_upload_id, reason).await?;
        Ok(batch)
    }

    /// Process one chunk: batched duplicate pre-check, then row by row.
    ///
    /// Only failures whose strategy is chunk- or job-scoped propagate;
    /// everything row-scoped is recorded and skipped.
    async fn process_chunk(
        &self,
        batch: &BatchUpload,
        chunk: &RecordChunk,
    ) -> Result<ChunkOutcome, ProcessingError> {
        let existing = self.processor.find_existing_duplicates(&chunk.records).await?;
        let ctx = ProcessingContext::batch(batch.id);

        let mut outcome = ChunkOutcome::default();

        for row in &chunk.records {
            if let Some(key) = CompoundKey::of_row(row) {
                if existing.contains(&key) {
                    let err = ProcessingError::duplicate(&key);
                    self.record_row_error(batch.id, row, &err).await?;
                    outcome.failed += 1;
                    continue;
                }
            }

            match self.processor.process(row, &ctx).await {
                Ok(_) => outcome.succeeded += 1,
                Err(e) => match e.retry_strategy() {
                    RetryStrategy::SkipRow => {
                        self.record_row_error(batch.id, row, &e).await?;
                        outcome.failed += 1;
                    },
                    RetryStrategy::AbortBatch => {
                        // Unrecognized failure at the row boundary: record it
                        // and keep the chunk alive
                        warn!(
                            row_number = row.row_number,
                            error = %e,
                            "Unclassified row failure downgraded to row error"
                        );
                        self.record_row_error(batch.id, row, &e).await?;
                        outcome.failed += 1;
                    },
                    RetryStrategy::RetryChunk | RetryStrategy::RetryJob => return Err(e),
                },
            }
        }

        Ok(outcome)
    }

    /// Apply the failure's retry strategy at the chunk boundary
    async fn handle_chunk_failure(
        &self,
        batch: &BatchUpload,
        chunk: &RecordChunk,
        e: ProcessingError,
    ) -> Result<BatchUpload, PipelineError> {
        match e.retry_strategy() {
            RetryStrategy::RetryChunk | RetryStrategy::RetryJob => {
                // Audit row stays `started` — the signal for the external
                // retry policy to re-run this chunk
                warn!(
                    chunk_number = chunk.chunk_number,
                    code = e.code().as_str(),
                    error = %e,
                    "Chunk failed, leaving audit row started for retry"
                );
                Err(e.into())
            },
            _ => {
                ChunkAuditLog::fail(&self.pool, batch.id, chunk.chunk_number, 0, 0).await?;
                let reason = format!("{}: {}", e.code().as_str(), e);
                BatchUpload::fail_processing(&self.pool, batch.id, &reason).await?;
                warn!(chunk_number = chunk.chunk_number, error = %e, "Batch aborted");
                Err(e.into())
            },
        }
    }

    async fn record_row_error(
        &self,
        batch_upload_id: Uuid,
        row: &ParsedRow,
        e: &ProcessingError,
    ) -> Result<(), ProcessingError> {
        RowError::record(
            &self.pool,
            batch_upload_id,
            row.row_number,
            e.code(),
            &e.to_string(),
            Some(json!(row.fields)),
        )
        .await?;
        Ok(())
    }
}
