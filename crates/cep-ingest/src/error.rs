//! Processing error type
//!
//! Every failure crossing a component boundary carries exactly one taxonomy
//! code. Human-readable messages ride along for operators; the code is what
//! drives retry policy.

use cep_common::taxonomy::{ErrorCategory, ErrorCode, MessageParams, RetryStrategy};
use thiserror::Error;

use crate::certification::CompoundKey;
use crate::storage::StorageError;

/// Failure from the unified record processor or the surrounding pipeline
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Row failed validation; `code` is one of VAL_001..VAL_005
    #[error("{message}")]
    Validation { code: ErrorCode, message: String },

    /// A record with the same compound key already exists (DUP_001)
    #[error("{message}")]
    Duplicate { message: String },

    /// Persistence failure (DB_001)
    #[error("database failure: {source}")]
    Database {
        #[source]
        source: sqlx::Error,
    },

    /// Source object read failure (STG_001)
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    /// Anything that escaped classification (UNK_001)
    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl ProcessingError {
    pub fn validation(code: ErrorCode, message: impl Into<String>) -> Self {
        ProcessingError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn duplicate(key: &CompoundKey) -> Self {
        ProcessingError::Duplicate {
            message: ErrorCode::Dup001.render(MessageParams {
                value: &key.describe(),
                ..Default::default()
            }),
        }
    }

    /// The taxonomy code this failure carries
    pub fn code(&self) -> ErrorCode {
        match self {
            ProcessingError::Validation { code, .. } => *code,
            ProcessingError::Duplicate { .. } => ErrorCode::Dup001,
            ProcessingError::Database { .. } => ErrorCode::Db001,
            ProcessingError::Storage(_) => ErrorCode::Stg001,
            ProcessingError::Unknown(_) => ErrorCode::Unk001,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.code().category()
    }

    pub fn retry_strategy(&self) -> RetryStrategy {
        self.code().retry_strategy()
    }
}

impl From<sqlx::Error> for ProcessingError {
    fn from(source: sqlx::Error) -> Self {
        ProcessingError::Database { source }
    }
}
