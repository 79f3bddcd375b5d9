//! Upload orchestrator
//!
//! The thin entry point every ingestion channel goes through: verify the
//! source object actually exists, create the pending aggregate, hand off to
//! the async runner. It never reads or validates file contents — that is
//! the worker's job.

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::batch::{BatchUpload, LifecycleError, NewBatchUpload, SourceType};
use crate::jobs::JobDispatcher;
use crate::storage::{ObjectStore, StorageError};

/// Errors from initiating a batch upload
#[derive(Debug, Error)]
pub enum InitiateError {
    /// The referenced object is not in storage; no aggregate is created,
    /// preventing orphaned records
    #[error("file not found in storage: {0}")]
    FileNotFound(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] LifecycleError),

    #[error("failed to enqueue processing job: {0}")]
    Enqueue(String),
}

pub struct UploadOrchestrator {
    pool: PgPool,
    store: Arc<dyn ObjectStore>,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl UploadOrchestrator {
    pub fn new(
        pool: PgPool,
        store: Arc<dyn ObjectStore>,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        Self {
            pool,
            store,
            dispatcher,
        }
    }

    /// Register an uploaded file for processing.
    ///
    /// Precondition: the object behind `storage_key` must exist; absence
    /// fails fast with [`InitiateError::FileNotFound`] and leaves no trace.
    /// On success the batch is `pending` and a processing job is enqueued
    /// (at-least-once).
    #[instrument(skip(self), fields(source_type = source_type.as_str()))]
    pub async fn initiate(
        &self,
        source_type: SourceType,
        filename: &str,
        storage_key: &str,
        uploader_id: Option<Uuid>,
    ) -> Result<BatchUpload, InitiateError> {
        if !self.store.object_exists(storage_key).await? {
            return Err(InitiateError::FileNotFound(storage_key.to_string()));
        }

        let batch = BatchUpload::create(
            &self.pool,
            NewBatchUpload {
                filename: filename.to_string(),
                uploader_id,
                source_type,
                storage_key: storage_key.to_string(),
            },
        )
        .await?;

        self.dispatcher
            .enqueue(batch.id)
            .await
            .map_err(|e| InitiateError::Enqueue(e.to_string()))?;

        info!(batch_id = %batch.id, filename, "Batch upload accepted and enqueued");

        Ok(batch)
    }
}
