//! Batch upload aggregate and its ledgers
//!
//! - **upload**: the durable `BatchUpload` aggregate owning lifecycle state,
//!   progress counters, and the terminal results summary
//! - **chunk_audit**: one row per chunk, created at start and stamped at
//!   completion — the resume ledger and the crash signal
//! - **row_error**: one row per rejected record, original payload included
//!   for operator retry

pub mod chunk_audit;
pub mod row_error;
pub mod upload;

pub use chunk_audit::{ChunkAuditLog, ChunkStatus};
pub use row_error::RowError;
pub use upload::{BatchStatus, BatchUpload, LifecycleError, NewBatchUpload, SourceType};
