//! Certification target records
//!
//! One `Certification` per valid row, unique on the compound key
//! (member id, case number, certification date). Every certification owns
//! exactly one `CertificationOrigin` recording which channel produced it.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reader::ParsedRow;

/// Accepted values for the certification type column
pub const CERTIFICATION_TYPES: &[&str] = &["new_application", "recertification"];

/// Certification type (case-sensitive enum column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificationType {
    NewApplication,
    Recertification,
}

impl CertificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CertificationType::NewApplication => "new_application",
            CertificationType::Recertification => "recertification",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new_application" => Some(CertificationType::NewApplication),
            "recertification" => Some(CertificationType::Recertification),
            _ => None,
        }
    }
}

/// Channel that produced a certification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginSource {
    BatchUpload,
    Manual,
    Api,
}

impl OriginSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            OriginSource::BatchUpload => "batch_upload",
            OriginSource::Manual => "manual",
            OriginSource::Api => "api",
        }
    }
}

/// The duplicate-detection key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompoundKey {
    pub member_id: String,
    pub case_number: String,
    pub certification_date: NaiveDate,
}

impl CompoundKey {
    /// Extract the key from a parsed row. Returns `None` when any component
    /// is missing, blank, or not a parseable date.
    pub fn of_row(row: &ParsedRow) -> Option<Self> {
        let member_id = row.value("member_id")?;
        let case_number = row.value("case_number")?;
        let date_str = row.value("certification_date")?;
        let certification_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d").ok()?;

        Some(Self {
            member_id: member_id.to_string(),
            case_number: case_number.to_string(),
            certification_date,
        })
    }

    /// Human-readable key description for error messages
    pub fn describe(&self) -> String {
        format!(
            "member {} / case {} / certified {}",
            self.member_id, self.case_number, self.certification_date
        )
    }
}

/// Persisted certification record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Certification {
    pub id: Uuid,
    pub member_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub date_of_birth: Option<NaiveDate>,
    pub case_number: String,
    pub certification_date: NaiveDate,
    pub certification_type: String,
    pub lookback_period: Option<i32>,
    pub months_to_certify: Option<i32>,
    pub due_period_days: Option<i32>,
    pub work_hours: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Certification {
    pub fn compound_key(&self) -> CompoundKey {
        CompoundKey {
            member_id: self.member_id.clone(),
            case_number: self.case_number.clone(),
            certification_date: self.certification_date,
        }
    }
}

/// Payload for inserting a certification, built from a flat row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCertification {
    pub member_id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub date_of_birth: Option<NaiveDate>,
    pub case_number: String,
    pub certification_date: NaiveDate,
    pub certification_type: CertificationType,
    pub lookback_period: Option<i32>,
    pub months_to_certify: Option<i32>,
    pub due_period_days: Option<i32>,
    pub work_hours: Option<i32>,
}

/// Provenance record, 1:1 with a certification
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CertificationOrigin {
    pub id: Uuid,
    pub certification_id: Uuid,
    pub source_type: String,
    pub source_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
