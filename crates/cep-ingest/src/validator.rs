//! Record validator
//!
//! `validate` is pure and total: it never raises for data-quality problems
//! and always returns either success or the full list of violations. Checks
//! run in a fixed order and are independent — a row with a bad date and a
//! bad email reports both.

use std::sync::LazyLock;

use cep_common::taxonomy::{ErrorCode, MessageParams};
use chrono::NaiveDate;
use regex::Regex;

use crate::certification::CERTIFICATION_TYPES;
use crate::reader::ParsedRow;

/// Fields that must be present and non-blank on every row
pub const REQUIRED_FIELDS: &[&str] = &[
    "member_id",
    "case_number",
    "email",
    "certification_date",
    "certification_type",
];

/// Date-format fields: (name, required)
pub const DATE_FIELDS: &[(&str, bool)] = &[("certification_date", true), ("date_of_birth", false)];

/// Optional fields that must hold a non-negative integer when present
pub const INTEGER_FIELDS: &[&str] = &[
    "lookback_period",
    "months_to_certify",
    "due_period_days",
    "work_hours",
];

static DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("static date pattern"));

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]*@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)+$")
        .expect("static email pattern")
});

static NON_NEGATIVE_INT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+$").expect("static integer pattern"));

/// One validation violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub code: ErrorCode,
    pub message: String,
}

/// Outcome of validating one row: success, or every violation that fired
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationResult {
    failures: Vec<ValidationFailure>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<ValidationFailure> {
        self.failures
    }

    pub fn first(&self) -> Option<&ValidationFailure> {
        self.failures.first()
    }

    fn push(&mut self, code: ErrorCode, params: MessageParams<'_>) {
        self.failures.push(ValidationFailure {
            code,
            message: code.render(params),
        });
    }
}

/// Validate one row against the fixed battery.
///
/// Pure and side-effect free; callers decide what a failure means.
pub fn validate(row: &ParsedRow) -> ValidationResult {
    let mut result = ValidationResult::default();

    // 1. Required-field presence: missing column or blank value
    for field in REQUIRED_FIELDS {
        if row.value(field).is_none() {
            result.push(
                ErrorCode::Val001,
                MessageParams {
                    field,
                    ..Default::default()
                },
            );
        }
    }

    // 2. Date fields must match the pattern and be real calendar dates
    for (field, _required) in DATE_FIELDS {
        if let Some(value) = row.value(field) {
            if !is_real_date(value) {
                result.push(
                    ErrorCode::Val002,
                    MessageParams {
                        field,
                        value,
                        expected: "a real date in YYYY-MM-DD format such as 2025-01-31",
                    },
                );
            }
        }
    }

    // 3. Email grammar
    if let Some(value) = row.value("email") {
        if !EMAIL_PATTERN.is_match(value) {
            result.push(
                ErrorCode::Val003,
                MessageParams {
                    field: "email",
                    value,
                    expected: "an address such as member@example.org",
                },
            );
        }
    }

    // 4. Enumerated field, case-sensitive
    if let Some(value) = row.value("certification_type") {
        if !CERTIFICATION_TYPES.contains(&value) {
            result.push(
                ErrorCode::Val004,
                MessageParams {
                    field: "certification_type",
                    value,
                    expected: "one of: new_application, recertification",
                },
            );
        }
    }

    // 5. Optional non-negative integer fields
    for field in INTEGER_FIELDS {
        if let Some(value) = row.value(field) {
            if !NON_NEGATIVE_INT_PATTERN.is_match(value) {
                result.push(
                    ErrorCode::Val005,
                    MessageParams {
                        field,
                        value,
                        expected: "a whole number such as 12",
                    },
                );
            }
        }
    }

    result
}

/// Pattern match plus a real calendar-date parse (rejects 2025-02-30 and
/// non-leap-year Feb 29).
fn is_real_date(value: &str) -> bool {
    DATE_PATTERN.is_match(value) && NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(fields: &[(&str, &str)]) -> ParsedRow {
        ParsedRow {
            row_number: 1,
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    fn valid_row() -> ParsedRow {
        row(&[
            ("member_id", "M-100"),
            ("case_number", "C-200"),
            ("email", "member@example.org"),
            ("certification_date", "2025-06-15"),
            ("certification_type", "new_application"),
        ])
    }

    #[test]
    fn test_valid_row_passes() {
        let result = validate(&valid_row());
        assert!(result.is_valid());
        assert!(result.failures().is_empty());
    }

    #[test]
    fn test_missing_required_field() {
        let mut r = valid_row();
        r.fields.remove("case_number");

        let result = validate(&r);
        assert!(!result.is_valid());
        assert_eq!(result.failures().len(), 1);
        let failure = result.first().unwrap();
        assert_eq!(failure.code, ErrorCode::Val001);
        assert!(failure.message.contains("case_number"));
    }

    #[test]
    fn test_blank_value_counts_as_missing() {
        let mut r = valid_row();
        r.fields.insert("member_id".to_string(), "   ".to_string());

        let result = validate(&r);
        assert_eq!(result.failures().len(), 1);
        assert_eq!(result.first().unwrap().code, ErrorCode::Val001);
        assert!(result.first().unwrap().message.contains("member_id"));
    }

    #[test]
    fn test_impossible_calendar_date() {
        let mut r = valid_row();
        r.fields
            .insert("certification_date".to_string(), "2025-02-30".to_string());

        let result = validate(&r);
        assert!(!result.is_valid());
        let failure = result.first().unwrap();
        assert_eq!(failure.code, ErrorCode::Val002);
        assert!(failure.message.contains("unparseable"));
        assert!(failure.message.contains("2025-02-30"));
    }

    #[test]
    fn test_non_leap_year_feb_29() {
        let mut r = valid_row();
        r.fields
            .insert("certification_date".to_string(), "2025-02-29".to_string());
        assert_eq!(validate(&r).first().unwrap().code, ErrorCode::Val002);

        // 2024 was a leap year
        r.fields
            .insert("certification_date".to_string(), "2024-02-29".to_string());
        assert!(validate(&r).is_valid());
    }

    #[test]
    fn test_date_pattern_must_be_exact() {
        let mut r = valid_row();
        r.fields
            .insert("certification_date".to_string(), "15/06/2025".to_string());
        assert_eq!(validate(&r).first().unwrap().code, ErrorCode::Val002);

        r.fields
            .insert("certification_date".to_string(), "2025-6-15".to_string());
        assert_eq!(validate(&r).first().unwrap().code, ErrorCode::Val002);
    }

    #[test]
    fn test_optional_date_of_birth_checked_when_present() {
        let mut r = valid_row();
        r.fields
            .insert("date_of_birth".to_string(), "1990-13-01".to_string());

        let result = validate(&r);
        let failure = result.first().unwrap();
        assert_eq!(failure.code, ErrorCode::Val002);
        assert!(failure.message.contains("date_of_birth"));

        // Blank optional date is fine
        r.fields.insert("date_of_birth".to_string(), "".to_string());
        assert!(validate(&r).is_valid());
    }

    #[test]
    fn test_email_grammar() {
        let valid = [
            "a@b.co",
            "first.last@example.org",
            "user+tag@sub.domain.example.com",
        ];
        for email in valid {
            let mut r = valid_row();
            r.fields.insert("email".to_string(), email.to_string());
            assert!(validate(&r).is_valid(), "{} should be valid", email);
        }

        let invalid = ["plainaddress", "missing@tld", "@example.org", "a b@c.org"];
        for email in invalid {
            let mut r = valid_row();
            r.fields.insert("email".to_string(), email.to_string());
            let result = validate(&r);
            assert_eq!(
                result.first().unwrap().code,
                ErrorCode::Val003,
                "{} should be invalid",
                email
            );
        }
    }

    #[test]
    fn test_certification_type_allow_list_is_case_sensitive() {
        let mut r = valid_row();
        r.fields
            .insert("certification_type".to_string(), "New_Application".to_string());

        let result = validate(&r);
        let failure = result.first().unwrap();
        assert_eq!(failure.code, ErrorCode::Val004);
        assert!(failure.message.contains("New_Application"));
        assert!(failure.message.contains("recertification"));
    }

    #[test]
    fn test_integer_fields() {
        let mut r = valid_row();
        r.fields.insert("work_hours".to_string(), "80".to_string());
        assert!(validate(&r).is_valid());

        r.fields.insert("work_hours".to_string(), "-3".to_string());
        assert_eq!(validate(&r).first().unwrap().code, ErrorCode::Val005);

        r.fields.insert("work_hours".to_string(), "8.5".to_string());
        assert_eq!(validate(&r).first().unwrap().code, ErrorCode::Val005);

        // Blank optional integer is fine
        r.fields.insert("work_hours".to_string(), " ".to_string());
        assert!(validate(&r).is_valid());
    }

    #[test]
    fn test_independent_checks_all_fire() {
        let r = row(&[
            ("member_id", "M-1"),
            // case_number missing entirely
            ("email", "not-an-email"),
            ("certification_date", "2025-02-30"),
            ("certification_type", "renewal"),
            ("months_to_certify", "twelve"),
        ]);

        let result = validate(&r);
        let codes: Vec<ErrorCode> = result.failures().iter().map(|f| f.code).collect();
        assert_eq!(
            codes,
            vec![
                ErrorCode::Val001, // case_number
                ErrorCode::Val002, // certification_date
                ErrorCode::Val003, // email
                ErrorCode::Val004, // certification_type
                ErrorCode::Val005, // months_to_certify
            ]
        );
    }

    #[test]
    fn test_validator_is_idempotent() {
        let r = valid_row();
        assert_eq!(validate(&r), validate(&r));

        let mut bad = valid_row();
        bad.fields.remove("email");
        assert_eq!(validate(&bad), validate(&bad));
    }
}
