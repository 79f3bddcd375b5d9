//! Ingestion error taxonomy
//!
//! The closed catalog of error codes shared by every ingestion channel.
//! Each code belongs to one category, and each category carries the retry
//! strategy the caller is expected to apply. This module only classifies;
//! applying the strategy (skipping a row, re-running a chunk, re-enqueueing
//! a job) is the caller's responsibility.
//!
//! Codes are stable strings: they are persisted in `row_errors` and drive
//! both operator display and retry policy.

use serde::{Deserialize, Serialize};

/// Stable error code catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Required field missing or blank
    #[serde(rename = "VAL_001")]
    Val001,
    /// Date field malformed or not a real calendar date
    #[serde(rename = "VAL_002")]
    Val002,
    /// Email field does not match the address grammar
    #[serde(rename = "VAL_003")]
    Val003,
    /// Enumerated field outside its allow-list
    #[serde(rename = "VAL_004")]
    Val004,
    /// Optional integer field not a non-negative integer
    #[serde(rename = "VAL_005")]
    Val005,
    /// Record with the same compound key already persisted
    #[serde(rename = "DUP_001")]
    Dup001,
    /// Persistence failure
    #[serde(rename = "DB_001")]
    Db001,
    /// Source object read failure
    #[serde(rename = "STG_001")]
    Stg001,
    /// Anything that escaped classification
    #[serde(rename = "UNK_001")]
    Unk001,
}

/// Retry category an error code belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Validation,
    Duplicate,
    Database,
    Storage,
    Unknown,
}

/// What the caller should do with a failure of a given category.
///
/// Attempt budgets for the retrying strategies live in `IngestConfig`, not
/// here: the catalog names the strategy, configuration bounds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Record a RowError and move on to the next row
    SkipRow,
    /// Re-run the containing chunk as a unit, bounded attempts
    RetryChunk,
    /// Re-enqueue the containing job, bounded attempts
    RetryJob,
    /// Mark the batch failed and surface for manual intervention
    AbortBatch,
}

/// Every code in the catalog, in display order
pub const ALL_CODES: &[ErrorCode] = &[
    ErrorCode::Val001,
    ErrorCode::Val002,
    ErrorCode::Val003,
    ErrorCode::Val004,
    ErrorCode::Val005,
    ErrorCode::Dup001,
    ErrorCode::Db001,
    ErrorCode::Stg001,
    ErrorCode::Unk001,
];

/// Substitution parameters for a code's message template
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageParams<'a> {
    /// Field the failure is about, when row-scoped
    pub field: &'a str,
    /// Offending value (or a description of the failing operation)
    pub value: &'a str,
    /// Example of the expected format, when one exists
    pub expected: &'a str,
}

impl ErrorCode {
    /// Stable string form, as persisted and displayed
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Val001 => "VAL_001",
            ErrorCode::Val002 => "VAL_002",
            ErrorCode::Val003 => "VAL_003",
            ErrorCode::Val004 => "VAL_004",
            ErrorCode::Val005 => "VAL_005",
            ErrorCode::Dup001 => "DUP_001",
            ErrorCode::Db001 => "DB_001",
            ErrorCode::Stg001 => "STG_001",
            ErrorCode::Unk001 => "UNK_001",
        }
    }

    /// Category the code belongs to
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorCode::Val001
            | ErrorCode::Val002
            | ErrorCode::Val003
            | ErrorCode::Val004
            | ErrorCode::Val005 => ErrorCategory::Validation,
            ErrorCode::Dup001 => ErrorCategory::Duplicate,
            ErrorCode::Db001 => ErrorCategory::Database,
            ErrorCode::Stg001 => ErrorCategory::Storage,
            ErrorCode::Unk001 => ErrorCategory::Unknown,
        }
    }

    /// Retry strategy the code's category mandates
    pub fn retry_strategy(&self) -> RetryStrategy {
        self.category().retry_strategy()
    }

    /// Message template keyed by this code.
    ///
    /// Placeholders: `{field}`, `{value}`, `{expected}`.
    pub fn template(&self) -> &'static str {
        match self {
            ErrorCode::Val001 => "{field} is required and was missing or blank",
            ErrorCode::Val002 => "{field} '{value}' is unparseable; expected {expected}",
            ErrorCode::Val003 => "{field} '{value}' is not a valid email address; expected {expected}",
            ErrorCode::Val004 => "{field} '{value}' is not an accepted value; expected {expected}",
            ErrorCode::Val005 => "{field} '{value}' must be a non-negative whole number; expected {expected}",
            ErrorCode::Dup001 => "a certification already exists for {value}",
            ErrorCode::Db001 => "database failure while persisting record: {value}",
            ErrorCode::Stg001 => "storage failure while reading source object: {value}",
            ErrorCode::Unk001 => "unexpected failure: {value}",
        }
    }

    /// Render this code's template with the given parameters
    pub fn render(&self, params: MessageParams<'_>) -> String {
        self.template()
            .replace("{field}", params.field)
            .replace("{value}", params.value)
            .replace("{expected}", params.expected)
    }
}

impl ErrorCategory {
    pub fn retry_strategy(&self) -> RetryStrategy {
        match self {
            ErrorCategory::Validation | ErrorCategory::Duplicate => RetryStrategy::SkipRow,
            ErrorCategory::Database => RetryStrategy::RetryChunk,
            ErrorCategory::Storage => RetryStrategy::RetryJob,
            ErrorCategory::Unknown => RetryStrategy::AbortBatch,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorCode {
    type Err = crate::CepError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ALL_CODES
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| crate::CepError::Parse(format!("unknown error code: {}", s)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_codes_are_unique_and_complete() {
        let strings: HashSet<&str> = ALL_CODES.iter().map(|c| c.as_str()).collect();
        assert_eq!(strings.len(), 9);
        assert!(strings.contains("VAL_001"));
        assert!(strings.contains("UNK_001"));
    }

    #[test]
    fn test_category_drives_retry_strategy() {
        assert_eq!(ErrorCode::Val003.retry_strategy(), RetryStrategy::SkipRow);
        assert_eq!(ErrorCode::Dup001.retry_strategy(), RetryStrategy::SkipRow);
        assert_eq!(ErrorCode::Db001.retry_strategy(), RetryStrategy::RetryChunk);
        assert_eq!(ErrorCode::Stg001.retry_strategy(), RetryStrategy::RetryJob);
        assert_eq!(ErrorCode::Unk001.retry_strategy(), RetryStrategy::AbortBatch);
    }

    #[test]
    fn test_render_substitutes_all_placeholders() {
        let msg = ErrorCode::Val002.render(MessageParams {
            field: "certification_date",
            value: "2025-02-30",
            expected: "a real date in YYYY-MM-DD format such as 2025-01-31",
        });
        assert!(msg.contains("certification_date"));
        assert!(msg.contains("2025-02-30"));
        assert!(msg.contains("unparseable"));
        assert!(msg.contains("YYYY-MM-DD"));
    }

    #[test]
    fn test_from_str_round_trip() {
        for code in ALL_CODES {
            let parsed: ErrorCode = code.as_str().parse().unwrap();
            assert_eq!(parsed, *code);
        }
        assert!("VAL_999".parse::<ErrorCode>().is_err());
    }

    #[test]
    fn test_serde_uses_stable_strings() {
        let json = serde_json::to_string(&ErrorCode::Dup001).unwrap();
        assert_eq!(json, "\"DUP_001\"");
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ErrorCode::Dup001);
    }
}
