//! Job definitions and dispatch
//!
//! Batch processing runs on apalis workers backed by PostgreSQL storage.
//! Delivery is at-least-once; [`BatchPipeline::run`] is idempotent against
//! re-delivery. The queue must be configured so at most one worker handles
//! a given batch at a time — chunk sequencing depends on it.

use std::sync::Arc;

use anyhow::Result;
use apalis::prelude::*;
use apalis_postgres::PostgresStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::events::EventPublisher;
use crate::pipeline::BatchPipeline;
use crate::storage::ObjectStore;

/// Batch processing job payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessBatchUploadJob {
    pub batch_upload_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

impl ProcessBatchUploadJob {
    pub fn new(batch_upload_id: Uuid) -> Self {
        Self {
            batch_upload_id,
            enqueued_at: Utc::now(),
        }
    }
}

/// Enqueue seam the orchestrator hands batches to
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// At-least-once enqueue of batch processing
    async fn enqueue(&self, batch_upload_id: Uuid) -> Result<()>;
}

/// apalis-postgres backed dispatcher
#[derive(Clone)]
pub struct ApalisDispatcher {
    storage: PostgresStorage<ProcessBatchUploadJob>,
}

impl ApalisDispatcher {
    pub fn new(pool: &PgPool) -> Self {
        Self {
            storage: PostgresStorage::new(pool),
        }
    }
}

#[async_trait]
impl JobDispatcher for ApalisDispatcher {
    async fn enqueue(&self, batch_upload_id: Uuid) -> Result<()> {
        let mut storage = self.storage.clone();
        storage
            .push(ProcessBatchUploadJob::new(batch_upload_id))
            .await
            .map_err(|e| anyhow::anyhow!("failed to push job: {}", e))?;

        info!(batch_upload_id = %batch_upload_id, "Batch processing job enqueued");
        Ok(())
    }
}

/// Worker bootstrap: consumes the queue and drives the pipeline
pub struct JobRunner {
    config: IngestConfig,
    pool: PgPool,
    store: Arc<dyn ObjectStore>,
    events: Arc<dyn EventPublisher>,
}

impl JobRunner {
    pub fn new(
        config: IngestConfig,
        pool: PgPool,
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            pool,
            store,
            events,
        }
    }

    /// Start the worker in a background task
    pub fn start(self) -> JoinHandle<()> {
        let storage: PostgresStorage<ProcessBatchUploadJob> = PostgresStorage::new(&self.pool);
        let pipeline = Arc::new(BatchPipeline::new(
            self.pool.clone(),
            self.store.clone(),
            self.events.clone(),
            self.config.chunk_size,
        ));

        info!(
            chunk_size = self.config.chunk_size,
            max_job_attempts = self.config.max_job_attempts,
            max_chunk_attempts = self.config.max_chunk_attempts,
            "Starting batch processing worker"
        );

        tokio::spawn(async move {
            info!("Batch worker started");
            if let Err(e) = Monitor::new()
                .register(move |_index| {
                    WorkerBuilder::new("cep-batch-worker")
                        .backend(storage.clone())
                        .data(pipeline.clone())
                        .build_fn(process_batch_upload_job)
                })
                .run()
                .await
            {
                error!("Batch worker error: {:?}", e);
            }
            info!("Batch worker stopped");
        })
    }
}

/// Job handler: run the pipeline for one batch.
///
/// Errors propagate to apalis, which retries within the configured budget;
/// the pipeline's audit ledger makes the retry resume instead of redo.
async fn process_batch_upload_job(
    job: ProcessBatchUploadJob,
    pipeline: Data<Arc<BatchPipeline>>,
) -> Result<()> {
    info!(
        batch_upload_id = %job.batch_upload_id,
        enqueued_at = %job.enqueued_at,
        "Processing batch upload job"
    );

    let batch = pipeline.run(job.batch_upload_id).await?;

    info!(
        batch_upload_id = %batch.id,
        status = batch.status.as_str(),
        succeeded = batch.num_rows_succeeded,
        errored = batch.num_rows_errored,
        "Batch upload job finished"
    );

    Ok(())
}
