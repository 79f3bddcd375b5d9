//! CEP Ingestion Core
//!
//! Bulk record-ingestion pipeline for eligibility/certification files.
//!
//! # Overview
//!
//! A delimited file lands in object storage, the orchestrator registers a
//! `BatchUpload` and enqueues a processing job, and a worker streams the file
//! in bounded chunks:
//!
//! - **Reader**: turns the object's byte stream into chunks of parsed records
//!   with exact byte-range tracking, so one failed chunk can be re-read later
//!   without rescanning the file
//! - **Validator**: pure, exhaustive row validation against the error-code
//!   taxonomy
//! - **Processor**: the single validate → dedup → persist → origin path used
//!   by every ingestion channel, with a bulk variant and a chunk-wide
//!   duplicate pre-check
//! - **Batch aggregate**: lifecycle state, progress counters, and the
//!   per-chunk audit / per-row error ledgers that make a crashed run
//!   resumable and diagnosable
//!
//! Row-level failures are recorded and skipped; chunk-level failures abort
//! only their chunk and are retried by the job runner; partial success is a
//! first-class completed state.
//!
//! # Framework Stack
//!
//! - **SQLx**: PostgreSQL persistence and migrations
//! - **aws-sdk-s3**: S3-compatible object storage behind the narrow
//!   [`storage::ObjectStore`] seam
//! - **apalis**: PostgreSQL-backed job queue for async dispatch
//! - **tracing**: structured logging throughout
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cep_ingest::config::AppConfig;
//! use cep_ingest::jobs::ApalisDispatcher;
//! use cep_ingest::orchestrator::UploadOrchestrator;
//! use cep_ingest::storage::Storage;
//! use cep_ingest::batch::SourceType;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! let pool = config.database.connect().await?;
//! let store = Arc::new(Storage::new(config.storage.clone()).await?);
//! let dispatcher = Arc::new(ApalisDispatcher::new(&pool));
//!
//! let orchestrator = UploadOrchestrator::new(pool, store, dispatcher);
//! let batch = orchestrator
//!     .initiate(SourceType::Api, "rows.csv", "uploads/rows.csv", None)
//!     .await?;
//! println!("batch {} accepted", batch.id);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod certification;
pub mod config;
pub mod error;
pub mod events;
pub mod jobs;
pub mod orchestrator;
pub mod pipeline;
pub mod processor;
pub mod reader;
pub mod storage;
pub mod validator;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use error::ProcessingError;
pub use processor::{ProcessingContext, RecordProcessor};
