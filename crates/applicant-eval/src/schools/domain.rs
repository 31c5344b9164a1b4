use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Persistence identifier of a school enrichment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchoolId(pub i64);

impl fmt::Display for SchoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "school-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

/// Researched context about an applicant's school.
///
/// Numeric fields use zero and text fields use empty to mean "not yet researched"; a
/// skeleton row is all-empty with `analysis_status = Pending`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolEnrichmentRecord {
    pub id: Option<SchoolId>,
    pub school_name: String,
    pub state_code: Option<String>,
    pub school_district: Option<String>,
    pub nces_id: Option<String>,
    pub total_students: u32,
    pub graduation_rate: f32,
    pub ap_course_count: u32,
    pub honors_course_count: u32,
    pub ib_program_available: bool,
    pub stem_program_available: bool,
    pub free_lunch_percentage: f32,
    pub opportunity_score: f32,
    pub confidence_score: f32,
    pub analysis_status: AnalysisStatus,
    pub human_review_status: ReviewStatus,
    pub updated_at: Option<DateTime<Utc>>,
}

impl SchoolEnrichmentRecord {
    pub fn skeleton(
        school_name: impl Into<String>,
        state_code: Option<&str>,
        school_district: Option<&str>,
    ) -> Self {
        Self {
            id: None,
            school_name: school_name.into(),
            state_code: state_code.map(str::to_string),
            school_district: school_district.map(str::to_string),
            nces_id: None,
            total_students: 0,
            graduation_rate: 0.0,
            ap_course_count: 0,
            honors_course_count: 0,
            ib_program_available: false,
            stem_program_available: false,
            free_lunch_percentage: 0.0,
            opportunity_score: 0.0,
            confidence_score: 0.0,
            analysis_status: AnalysisStatus::Pending,
            human_review_status: ReviewStatus::Pending,
            updated_at: None,
        }
    }

    /// True when student count, graduation rate, and opportunity score are all unset.
    pub fn lacks_core_data(&self) -> bool {
        self.total_students == 0 && self.graduation_rate <= 0.0 && self.opportunity_score <= 0.0
    }

    /// Pending or failed rows need enrichment, and so do rows marked complete that never
    /// received their core numbers.
    pub fn needs_enrichment(&self) -> bool {
        match self.analysis_status {
            AnalysisStatus::Pending | AnalysisStatus::Failed => true,
            AnalysisStatus::Complete => self.lacks_core_data(),
        }
    }
}

/// Fields the validation step can require and the remediation step can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchoolField {
    SchoolName,
    StateCode,
    SchoolDistrict,
    TotalStudents,
    GraduationRate,
    ApCourseCount,
    HonorsCourseCount,
    IbProgramAvailable,
    StemProgramAvailable,
    FreeLunchPercentage,
    OpportunityScore,
    ConfidenceScore,
}

impl SchoolField {
    pub const fn key(self) -> &'static str {
        match self {
            Self::SchoolName => "school_name",
            Self::StateCode => "state_code",
            Self::SchoolDistrict => "school_district",
            Self::TotalStudents => "total_students",
            Self::GraduationRate => "graduation_rate",
            Self::ApCourseCount => "ap_course_count",
            Self::HonorsCourseCount => "honors_course_count",
            Self::IbProgramAvailable => "ib_program_available",
            Self::StemProgramAvailable => "stem_program_available",
            Self::FreeLunchPercentage => "free_lunch_percentage",
            Self::OpportunityScore => "opportunity_score",
            Self::ConfidenceScore => "confidence_score",
        }
    }

    pub fn value(self, record: &SchoolEnrichmentRecord) -> Value {
        match self {
            Self::SchoolName => json!(record.school_name),
            Self::StateCode => json!(record.state_code),
            Self::SchoolDistrict => json!(record.school_district),
            Self::TotalStudents => json!(record.total_students),
            Self::GraduationRate => json!(record.graduation_rate),
            Self::ApCourseCount => json!(record.ap_course_count),
            Self::HonorsCourseCount => json!(record.honors_course_count),
            Self::IbProgramAvailable => json!(record.ib_program_available),
            Self::StemProgramAvailable => json!(record.stem_program_available),
            Self::FreeLunchPercentage => json!(record.free_lunch_percentage),
            Self::OpportunityScore => json!(record.opportunity_score),
            Self::ConfidenceScore => json!(record.confidence_score),
        }
    }

    /// Present means non-blank text or a non-zero number. Flags always count as present.
    pub fn is_present(self, record: &SchoolEnrichmentRecord) -> bool {
        match self {
            Self::SchoolName => !record.school_name.trim().is_empty(),
            Self::StateCode => non_blank(&record.state_code),
            Self::SchoolDistrict => non_blank(&record.school_district),
            Self::TotalStudents => record.total_students > 0,
            Self::GraduationRate => record.graduation_rate > 0.0,
            Self::ApCourseCount => record.ap_course_count > 0,
            Self::HonorsCourseCount => record.honors_course_count > 0,
            Self::IbProgramAvailable | Self::StemProgramAvailable => true,
            Self::FreeLunchPercentage => record.free_lunch_percentage > 0.0,
            Self::OpportunityScore => record.opportunity_score > 0.0,
            Self::ConfidenceScore => record.confidence_score > 0.0,
        }
    }
}

impl fmt::Display for SchoolField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

fn non_blank(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

/// Typed partial update applied to an existing enrichment row. `None` leaves a column alone;
/// blank text and zero numbers are treated as "no value" and never overwrite stored data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentUpdate {
    #[serde(default)]
    pub state_code: Option<String>,
    #[serde(default)]
    pub school_district: Option<String>,
    #[serde(default)]
    pub nces_id: Option<String>,
    #[serde(default)]
    pub total_students: Option<u32>,
    #[serde(default)]
    pub graduation_rate: Option<f32>,
    #[serde(default)]
    pub ap_course_count: Option<u32>,
    #[serde(default)]
    pub honors_course_count: Option<u32>,
    #[serde(default)]
    pub ib_program_available: Option<bool>,
    #[serde(default)]
    pub stem_program_available: Option<bool>,
    #[serde(default)]
    pub free_lunch_percentage: Option<f32>,
    #[serde(default)]
    pub opportunity_score: Option<f32>,
    #[serde(default)]
    pub confidence_score: Option<f32>,
    #[serde(default)]
    pub analysis_status: Option<AnalysisStatus>,
}

impl EnrichmentUpdate {
    pub fn status(status: AnalysisStatus) -> Self {
        Self {
            analysis_status: Some(status),
            ..Self::default()
        }
    }

    /// Drop blank and zero values so the update carries only usable data.
    pub fn sanitized(mut self) -> Self {
        self.state_code = self.state_code.filter(|v| !v.trim().is_empty());
        self.school_district = self.school_district.filter(|v| !v.trim().is_empty());
        self.nces_id = self.nces_id.filter(|v| !v.trim().is_empty());
        self.total_students = self.total_students.filter(|v| *v > 0);
        self.graduation_rate = self.graduation_rate.filter(|v| v.is_finite() && *v > 0.0);
        self.ap_course_count = self.ap_course_count.filter(|v| *v > 0);
        self.honors_course_count = self.honors_course_count.filter(|v| *v > 0);
        self.free_lunch_percentage = self
            .free_lunch_percentage
            .filter(|v| v.is_finite() && *v > 0.0);
        self.opportunity_score = self.opportunity_score.filter(|v| v.is_finite() && *v > 0.0);
        self.confidence_score = self.confidence_score.filter(|v| v.is_finite() && *v > 0.0);
        self
    }

    /// Data fields carried by the update, excluding the status marker.
    pub fn populated_fields(&self) -> Vec<SchoolField> {
        let mut fields = Vec::new();
        let mut mark = |present: bool, field| {
            if present {
                fields.push(field);
            }
        };
        mark(self.state_code.is_some(), SchoolField::StateCode);
        mark(self.school_district.is_some(), SchoolField::SchoolDistrict);
        mark(self.total_students.is_some(), SchoolField::TotalStudents);
        mark(self.graduation_rate.is_some(), SchoolField::GraduationRate);
        mark(self.ap_course_count.is_some(), SchoolField::ApCourseCount);
        mark(self.honors_course_count.is_some(), SchoolField::HonorsCourseCount);
        mark(
            self.ib_program_available.is_some(),
            SchoolField::IbProgramAvailable,
        );
        mark(
            self.stem_program_available.is_some(),
            SchoolField::StemProgramAvailable,
        );
        mark(
            self.free_lunch_percentage.is_some(),
            SchoolField::FreeLunchPercentage,
        );
        mark(self.opportunity_score.is_some(), SchoolField::OpportunityScore);
        mark(self.confidence_score.is_some(), SchoolField::ConfidenceScore);
        fields
    }

    pub fn has_data(&self) -> bool {
        !self.populated_fields().is_empty() || self.nces_id.is_some()
    }

    /// Keep only `fields`. Used to answer a remediation request with exactly what it asked for.
    pub fn restricted_to(mut self, fields: &[SchoolField]) -> Self {
        let keep = |field: SchoolField| fields.contains(&field);
        if !keep(SchoolField::StateCode) {
            self.state_code = None;
        }
        if !keep(SchoolField::SchoolDistrict) {
            self.school_district = None;
        }
        if !keep(SchoolField::TotalStudents) {
            self.total_students = None;
        }
        if !keep(SchoolField::GraduationRate) {
            self.graduation_rate = None;
        }
        if !keep(SchoolField::ApCourseCount) {
            self.ap_course_count = None;
        }
        if !keep(SchoolField::HonorsCourseCount) {
            self.honors_course_count = None;
        }
        if !keep(SchoolField::IbProgramAvailable) {
            self.ib_program_available = None;
        }
        if !keep(SchoolField::StemProgramAvailable) {
            self.stem_program_available = None;
        }
        if !keep(SchoolField::FreeLunchPercentage) {
            self.free_lunch_percentage = None;
        }
        if !keep(SchoolField::OpportunityScore) {
            self.opportunity_score = None;
        }
        if !keep(SchoolField::ConfidenceScore) {
            self.confidence_score = None;
        }
        self.nces_id = None;
        self
    }

    pub fn apply_to(&self, record: &mut SchoolEnrichmentRecord) {
        let update = self.clone().sanitized();

        if let Some(value) = update.state_code {
            record.state_code = Some(value);
        }
        if let Some(value) = update.school_district {
            record.school_district = Some(value);
        }
        if let Some(value) = update.nces_id {
            record.nces_id = Some(value);
        }
        if let Some(value) = update.total_students {
            record.total_students = value;
        }
        if let Some(value) = update.graduation_rate {
            record.graduation_rate = value;
        }
        if let Some(value) = update.ap_course_count {
            record.ap_course_count = value;
        }
        if let Some(value) = update.honors_course_count {
            record.honors_course_count = value;
        }
        if let Some(value) = update.ib_program_available {
            record.ib_program_available = value;
        }
        if let Some(value) = update.stem_program_available {
            record.stem_program_available = value;
        }
        if let Some(value) = update.free_lunch_percentage {
            record.free_lunch_percentage = value;
        }
        if let Some(value) = update.opportunity_score {
            record.opportunity_score = value;
        }
        if let Some(value) = update.confidence_score {
            record.confidence_score = value;
        }
        if let Some(status) = update.analysis_status {
            record.analysis_status = status;
        }
        record.updated_at = Some(Utc::now());
    }
}
