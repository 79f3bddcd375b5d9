//! CEP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, error handling, and logging for the CEP workspace.
//!
//! # Overview
//!
//! This crate provides functionality used across all CEP workspace members:
//!
//! - **Error Handling**: The crate-wide error type and result alias
//! - **Taxonomy**: The closed catalog of ingestion error codes and their
//!   retry strategies
//! - **Logging**: Centralized tracing initialization
//!
//! # Example
//!
//! ```no_run
//! use cep_common::taxonomy::{ErrorCode, RetryStrategy};
//!
//! let code = ErrorCode::Dup001;
//! assert_eq!(code.as_str(), "DUP_001");
//! assert_eq!(code.retry_strategy(), RetryStrategy::SkipRow);
//! ```

pub mod error;
pub mod logging;
pub mod taxonomy;

// Re-export commonly used types
pub use error::{CepError, Result};
pub use taxonomy::{ErrorCategory, ErrorCode, RetryStrategy};
