use serde::Serialize;
use serde_json::Value;

use super::domain::{SchoolEnrichmentRecord, SchoolField};

/// Minimum field set a school record must carry before an evaluation step consumes it.
pub const DEFAULT_REQUIRED_FIELDS: [SchoolField; 7] = [
    SchoolField::SchoolName,
    SchoolField::StateCode,
    SchoolField::OpportunityScore,
    SchoolField::ApCourseCount,
    SchoolField::HonorsCourseCount,
    SchoolField::FreeLunchPercentage,
    SchoolField::GraduationRate,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldCheck {
    pub field: SchoolField,
    pub present: bool,
    pub value: Value,
}

/// Verdict of one validation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub missing: Vec<SchoolField>,
    pub checks: Vec<FieldCheck>,
}

pub fn validate(record: &SchoolEnrichmentRecord, required: &[SchoolField]) -> ValidationReport {
    let checks: Vec<FieldCheck> = required
        .iter()
        .map(|&field| FieldCheck {
            field,
            present: field.is_present(record),
            value: field.value(record),
        })
        .collect();

    let missing: Vec<SchoolField> = checks
        .iter()
        .filter(|check| !check.present)
        .map(|check| check.field)
        .collect();

    ValidationReport {
        passed: missing.is_empty(),
        missing,
        checks,
    }
}
