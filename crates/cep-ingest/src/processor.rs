//! Unified record processor
//!
//! The single validate → dedup-check → persist → origin-tag path shared by
//! every ingestion channel (batch upload, manual entry, API). The same
//! validation and payload-building code backs the single-row and bulk
//! variants; neither duplicates the other.

use std::collections::HashSet;
use std::sync::Arc;

use cep_common::taxonomy::{ErrorCode, MessageParams};
use chrono::NaiveDate;
use serde_json::json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::certification::{
    Certification, CertificationType, CompoundKey, NewCertification, OriginSource,
};
use crate::error::ProcessingError;
use crate::events::{EventPublisher, CERTIFICATION_CREATED};
use crate::reader::ParsedRow;
use crate::validator::validate;

/// Fields re-checked right before persistence, independent of the validator
const MINIMAL_REQUIRED_FIELDS: &[&str] = &["member_id", "case_number", "certification_date"];

/// Which channel is processing, and for batch uploads, which batch
#[derive(Debug, Clone)]
pub struct ProcessingContext {
    pub source: OriginSource,
    pub batch_upload_id: Option<Uuid>,
}

impl ProcessingContext {
    pub fn batch(batch_upload_id: Uuid) -> Self {
        Self {
            source: OriginSource::BatchUpload,
            batch_upload_id: Some(batch_upload_id),
        }
    }

    pub fn manual() -> Self {
        Self {
            source: OriginSource::Manual,
            batch_upload_id: None,
        }
    }

    pub fn api() -> Self {
        Self {
            source: OriginSource::Api,
            batch_upload_id: None,
        }
    }
}

/// Processor over a database pool and the event publication seam
pub struct RecordProcessor {
    pool: PgPool,
    events: Arc<dyn EventPublisher>,
}

impl RecordProcessor {
    pub fn new(pool: PgPool, events: Arc<dyn EventPublisher>) -> Self {
        Self { pool, events }
    }

    /// Process one row: validate, reject duplicates, persist with origin.
    ///
    /// Short-circuits on the first failure; every error carries its taxonomy
    /// code. The creation event fires only after commit.
    #[instrument(skip(self, row), fields(row_number = row.row_number))]
    pub async fn process(
        &self,
        row: &ParsedRow,
        ctx: &ProcessingContext,
    ) -> Result<Certification, ProcessingError> {
        let result = validate(row);
        if let Some(failure) = result.first() {
            return Err(ProcessingError::validation(
                failure.code,
                failure.message.clone(),
            ));
        }

        // Validator changes must never let an unkeyed record through
        for field in MINIMAL_REQUIRED_FIELDS {
            if row.value(field).is_none() {
                return Err(ProcessingError::validation(
                    ErrorCode::Val001,
                    ErrorCode::Val001.render(MessageParams {
                        field,
                        ..Default::default()
                    }),
                ));
            }
        }

        let key = CompoundKey::of_row(row).ok_or_else(|| {
            ProcessingError::Unknown("compound key unavailable after validation".to_string())
        })?;

        if self.find_by_key(&key).await?.is_some() {
            return Err(ProcessingError::duplicate(&key));
        }

        let payload = build_certification(row)?;

        let mut tx = self.pool.begin().await?;
        let certification = insert_certification(&mut tx, &payload)
            .await
            .map_err(|e| map_persist_error(e, &key))?;
        insert_origin(&mut tx, certification.id, ctx).await?;
        tx.commit().await?;

        debug!(certification_id = %certification.id, "Certification persisted");

        self.publish_created(&[certification.id], ctx).await;

        Ok(certification)
    }

    /// Persist many rows in one transaction.
    ///
    /// Builds every payload first, inserts records and origins atomically,
    /// then fires one creation event per inserted id — only after commit, so
    /// a downstream notification fault can never roll back committed data.
    /// Any constraint failure commits zero rows from the call.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn bulk_persist(
        &self,
        rows: &[ParsedRow],
        ctx: &ProcessingContext,
    ) -> Result<Vec<Uuid>, ProcessingError> {
        let mut payloads = Vec::with_capacity(rows.len());
        for row in rows {
            let result = validate(row);
            if let Some(failure) = result.first() {
                return Err(ProcessingError::validation(
                    failure.code,
                    failure.message.clone(),
                ));
            }
            payloads.push((build_certification(row)?, CompoundKey::of_row(row)));
        }

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(payloads.len());
        for (payload, key) in &payloads {
            let certification = insert_certification(&mut tx, payload)
                .await
                .map_err(|e| match key {
                    Some(key) => map_persist_error(e, key),
                    None => e.into(),
                })?;
            insert_origin(&mut tx, certification.id, ctx).await?;
            ids.push(certification.id);
        }
        tx.commit().await?;

        self.publish_created(&ids, ctx).await;

        Ok(ids)
    }

    /// Pre-screen a whole chunk for duplicates with a single query.
    ///
    /// Returns the compound keys that already exist; rows without a
    /// complete key are left for per-row validation to reject.
    pub async fn find_existing_duplicates(
        &self,
        rows: &[ParsedRow],
    ) -> Result<HashSet<CompoundKey>, ProcessingError> {
        let keys: Vec<CompoundKey> = rows.iter().filter_map(CompoundKey::of_row).collect();
        if keys.is_empty() {
            return Ok(HashSet::new());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT member_id, case_number, certification_date FROM certifications \
             WHERE (member_id, case_number, certification_date) IN ",
        );
        builder.push_tuples(keys.iter(), |mut b, key| {
            b.push_bind(&key.member_id)
                .push_bind(&key.case_number)
                .push_bind(key.certification_date);
        });

        let found: Vec<(String, String, NaiveDate)> =
            builder.build_query_as().fetch_all(&self.pool).await?;

        Ok(found
            .into_iter()
            .map(|(member_id, case_number, certification_date)| CompoundKey {
                member_id,
                case_number,
                certification_date,
            })
            .collect())
    }

    async fn find_by_key(&self, key: &CompoundKey) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM certifications \
             WHERE member_id = $1 AND case_number = $2 AND certification_date = $3",
        )
        .bind(&key.member_id)
        .bind(&key.case_number)
        .bind(key.certification_date)
        .fetch_optional(&self.pool)
        .await
    }

    /// Fire creation events post-commit, logging (never raising) failures
    async fn publish_created(&self, ids: &[Uuid], ctx: &ProcessingContext) {
        for id in ids {
            let payload = json!({
                "certification_id": id,
                "source_type": ctx.source.as_str(),
                "source_id": ctx.batch_upload_id,
            });
            if let Err(e) = self.events.publish(CERTIFICATION_CREATED, payload).await {
                warn!(
                    certification_id = %id,
                    error = %e,
                    "Failed to publish creation event; record remains committed"
                );
            }
        }
    }
}

/// Build the insert payload from a validated flat row
fn build_certification(row: &ParsedRow) -> Result<NewCertification, ProcessingError> {
    let member_id = require(row, "member_id")?;
    let case_number = require(row, "case_number")?;
    let email = require(row, "email")?;

    let certification_date = parse_date("certification_date", require(row, "certification_date")?)?;
    let date_of_birth = match row.value("date_of_birth") {
        Some(value) => Some(parse_date("date_of_birth", value)?),
        None => None,
    };

    let type_value = require(row, "certification_type")?;
    let certification_type = CertificationType::parse(type_value).ok_or_else(|| {
        ProcessingError::validation(
            ErrorCode::Val004,
            ErrorCode::Val004.render(MessageParams {
                field: "certification_type",
                value: type_value,
                expected: "one of: new_application, recertification",
            }),
        )
    })?;

    Ok(NewCertification {
        member_id: member_id.to_string(),
        first_name: row.value("first_name").map(str::to_string),
        last_name: row.value("last_name").map(str::to_string),
        email: email.to_string(),
        date_of_birth,
        case_number: case_number.to_string(),
        certification_date,
        certification_type,
        lookback_period: parse_optional_int(row, "lookback_period")?,
        months_to_certify: parse_optional_int(row, "months_to_certify")?,
        due_period_days: parse_optional_int(row, "due_period_days")?,
        work_hours: parse_optional_int(row, "work_hours")?,
    })
}

fn require<'a>(row: &'a ParsedRow, field: &str) -> Result<&'a str, ProcessingError> {
    row.value(field).ok_or_else(|| {
        ProcessingError::validation(
            ErrorCode::Val001,
            ErrorCode::Val001.render(MessageParams {
                field,
                ..Default::default()
            }),
        )
    })
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ProcessingError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        ProcessingError::validation(
            ErrorCode::Val002,
            ErrorCode::Val002.render(MessageParams {
                field,
                value,
                expected: "a real date in YYYY-MM-DD format such as 2025-01-31",
            }),
        )
    })
}

fn parse_optional_int(row: &ParsedRow, field: &str) -> Result<Option<i32>, ProcessingError> {
    match row.value(field) {
        None => Ok(None),
        Some(value) => value.parse::<i32>().map(Some).map_err(|_| {
            ProcessingError::validation(
                ErrorCode::Val005,
                ErrorCode::Val005.render(MessageParams {
                    field,
                    value,
                    expected: "a whole number such as 12",
                }),
            )
        }),
    }
}

async fn insert_certification(
    tx: &mut Transaction<'_, Postgres>,
    payload: &NewCertification,
) -> Result<Certification, sqlx::Error> {
    sqlx::query_as(
        "INSERT INTO certifications \
             (member_id, first_name, last_name, email, date_of_birth, case_number, \
              certification_date, certification_type, lookback_period, months_to_certify, \
              due_period_days, work_hours) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         RETURNING id, member_id, first_name, last_name, email, date_of_birth, \
                   case_number, certification_date, certification_type, lookback_period, \
                   months_to_certify, due_period_days, work_hours, created_at, updated_at",
    )
    .bind(&payload.member_id)
    .bind(&payload.first_name)
    .bind(&payload.last_name)
    .bind(&payload.email)
    .bind(payload.date_of_birth)
    .bind(&payload.case_number)
    .bind(payload.certification_date)
    .bind(payload.certification_type.as_str())
    .bind(payload.lookback_period)
    .bind(payload.months_to_certify)
    .bind(payload.due_period_days)
    .bind(payload.work_hours)
    .fetch_one(&mut **tx)
    .await
}

async fn insert_origin(
    tx: &mut Transaction<'_, Postgres>,
    certification_id: Uuid,
    ctx: &ProcessingContext,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO certification_origins (certification_id, source_type, source_id) \
         VALUES ($1, $2, $3)",
    )
    .bind(certification_id)
    .bind(ctx.source.as_str())
    .bind(ctx.batch_upload_id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Unique-key violations on the compound key are duplicates, not database
/// faults; everything else stays DB_001.
fn map_persist_error(e: sqlx::Error, key: &CompoundKey) -> ProcessingError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.is_unique_violation() {
            return ProcessingError::duplicate(key);
        }
    }
    e.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{csv_row, CapturingEventPublisher};
    use cep_common::taxonomy::ErrorCode;

    fn processor(pool: &PgPool) -> (RecordProcessor, Arc<CapturingEventPublisher>) {
        let events = Arc::new(CapturingEventPublisher::default());
        (
            RecordProcessor::new(pool.clone(), events.clone()),
            events,
        )
    }

    fn valid_row(n: i64) -> ParsedRow {
        csv_row(
            n,
            &[
                ("member_id", &format!("M-{}", n)),
                ("case_number", &format!("C-{}", n)),
                ("email", "member@example.org"),
                ("certification_date", "2025-06-15"),
                ("certification_type", "new_application"),
                ("work_hours", "80"),
            ],
        )
    }

    #[sqlx::test]
    async fn test_process_persists_record_and_origin(pool: PgPool) -> sqlx::Result<()> {
        let (processor, events) = processor(&pool);
        let batch_id = Uuid::new_v4();
        let ctx = ProcessingContext::batch(batch_id);

        let cert = processor.process(&valid_row(1), &ctx).await.unwrap();
        assert_eq!(cert.member_id, "M-1");
        assert_eq!(cert.certification_type, "new_application");
        assert_eq!(cert.work_hours, Some(80));

        let (source_type, source_id): (String, Option<Uuid>) = sqlx::query_as(
            "SELECT source_type, source_id FROM certification_origins \
             WHERE certification_id = $1",
        )
        .bind(cert.id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(source_type, "batch_upload");
        assert_eq!(source_id, Some(batch_id));

        let published = events.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, CERTIFICATION_CREATED);
        Ok(())
    }

    #[sqlx::test]
    async fn test_process_rejects_invalid_row(pool: PgPool) -> sqlx::Result<()> {
        let (processor, events) = processor(&pool);
        let mut row = valid_row(1);
        row.fields.remove("case_number");

        let err = processor
            .process(&row, &ProcessingContext::manual())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Val001);
        assert!(err.to_string().contains("case_number"));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM certifications")
            .fetch_one(&pool)
            .await?;
        assert_eq!(count, 0);
        assert!(events.published().await.is_empty());
        Ok(())
    }

    #[sqlx::test]
    async fn test_duplicate_suppression(pool: PgPool) -> sqlx::Result<()> {
        let (processor, _) = processor(&pool);
        let ctx = ProcessingContext::api();

        processor.process(&valid_row(1), &ctx).await.unwrap();
        let err = processor.process(&valid_row(1), &ctx).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Dup001);

        let certs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM certifications")
            .fetch_one(&pool)
            .await?;
        let origins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM certification_origins")
            .fetch_one(&pool)
            .await?;
        assert_eq!(certs, 1);
        assert_eq!(origins, 1);
        Ok(())
    }

    #[sqlx::test]
    async fn test_bulk_persist_commits_all(pool: PgPool) -> sqlx::Result<()> {
        let (processor, events) = processor(&pool);
        let batch_id = Uuid::new_v4();
        let ctx = ProcessingContext::batch(batch_id);

        let rows = vec![valid_row(1), valid_row(2), valid_row(3)];
        let ids = processor.bulk_persist(&rows, &ctx).await.unwrap();
        assert_eq!(ids.len(), 3);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM certifications")
            .fetch_one(&pool)
            .await?;
        assert_eq!(count, 3);

        // One event per inserted id, after commit
        assert_eq!(events.published().await.len(), 3);
        Ok(())
    }

    #[sqlx::test]
    async fn test_bulk_persist_is_atomic(pool: PgPool) -> sqlx::Result<()> {
        let (processor, events) = processor(&pool);
        let ctx = ProcessingContext::batch(Uuid::new_v4());

        // Row 3 duplicates row 1's compound key inside the same call
        let rows = vec![valid_row(1), valid_row(2), valid_row(1)];
        let err = processor.bulk_persist(&rows, &ctx).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Dup001);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM certifications")
            .fetch_one(&pool)
            .await?;
        assert_eq!(count, 0, "constraint failure must commit zero rows");
        assert!(events.published().await.is_empty());
        Ok(())
    }

    #[sqlx::test]
    async fn test_find_existing_duplicates_batches_one_query(pool: PgPool) -> sqlx::Result<()> {
        let (processor, _) = processor(&pool);
        let ctx = ProcessingContext::api();

        processor.process(&valid_row(1), &ctx).await.unwrap();
        processor.process(&valid_row(2), &ctx).await.unwrap();

        let rows = vec![valid_row(1), valid_row(2), valid_row(3), valid_row(4)];
        let existing = processor.find_existing_duplicates(&rows).await.unwrap();

        assert_eq!(existing.len(), 2);
        assert!(existing.contains(&CompoundKey::of_row(&rows[0]).unwrap()));
        assert!(existing.contains(&CompoundKey::of_row(&rows[1]).unwrap()));
        assert!(!existing.contains(&CompoundKey::of_row(&rows[2]).unwrap()));
        Ok(())
    }

    #[sqlx::test]
    async fn test_manual_origin_has_no_source_id(pool: PgPool) -> sqlx::Result<()> {
        let (processor, _) = processor(&pool);

        let cert = processor
            .process(&valid_row(1), &ProcessingContext::manual())
            .await
            .unwrap();

        let (source_type, source_id): (String, Option<Uuid>) = sqlx::query_as(
            "SELECT source_type, source_id FROM certification_origins \
             WHERE certification_id = $1",
        )
        .bind(cert.id)
        .fetch_one(&pool)
        .await?;
        assert_eq!(source_type, "manual");
        assert_eq!(source_id, None);
        Ok(())
    }

    #[test]
    fn test_build_certification_maps_optional_fields() {
        let row = csv_row(
            1,
            &[
                ("member_id", "M-1"),
                ("case_number", "C-1"),
                ("email", "m@example.org"),
                ("certification_date", "2025-01-31"),
                ("certification_type", "recertification"),
                ("first_name", "Ada"),
                ("last_name", "Lovelace"),
                ("date_of_birth", "1990-12-10"),
                ("lookback_period", "6"),
                ("months_to_certify", "12"),
            ],
        );

        let payload = build_certification(&row).unwrap();
        assert_eq!(payload.first_name.as_deref(), Some("Ada"));
        assert_eq!(payload.certification_type, CertificationType::Recertification);
        assert_eq!(payload.lookback_period, Some(6));
        assert_eq!(payload.months_to_certify, Some(12));
        assert_eq!(payload.due_period_days, None);
        assert_eq!(payload.work_hours, None);
    }
}
