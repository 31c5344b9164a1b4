use applicant_eval::domain::{Application, ApplicationId, StepId};
use applicant_eval::orchestrator::{AggregateResult, ApplicationSummary};
use applicant_eval::repository::{ApplicationRepository, RepositoryError, SchoolRepository};
use applicant_eval::schools::{
    EnrichmentError, EnrichmentRequest, EnrichmentResponse, EnrichmentUpdate, SchoolEnricher,
    SchoolEnrichmentRecord, SchoolId, ValidationLog,
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, RepositoryError> {
    mutex
        .lock()
        .map_err(|_| RepositoryError::Unavailable("in-memory store poisoned".to_string()))
}

#[derive(Debug, Clone)]
pub(crate) struct AuditEntry {
    pub(crate) step: StepId,
    pub(crate) source: Option<String>,
    pub(crate) recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredApplication {
    pub(crate) application: Application,
    pub(crate) aggregate: Option<serde_json::Value>,
    pub(crate) summary: Option<ApplicationSummary>,
    pub(crate) audit: Vec<AuditEntry>,
}

#[derive(Default, Clone)]
pub(crate) struct InMemoryApplicationRepository {
    records: Arc<Mutex<HashMap<ApplicationId, StoredApplication>>>,
}

impl InMemoryApplicationRepository {
    pub(crate) fn insert(&self, application: Application) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.records)?;
        if guard.contains_key(&application.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.insert(
            application.id.clone(),
            StoredApplication {
                application,
                aggregate: None,
                summary: None,
                audit: Vec::new(),
            },
        );
        Ok(())
    }

    /// Insert or replace the application, keeping any stored results and audit trail.
    pub(crate) fn upsert(&self, application: Application) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.records)?;
        match guard.get_mut(&application.id) {
            Some(stored) => stored.application = application,
            None => {
                guard.insert(
                    application.id.clone(),
                    StoredApplication {
                        application,
                        aggregate: None,
                        summary: None,
                        audit: Vec::new(),
                    },
                );
            }
        }
        Ok(())
    }

    pub(crate) fn ids(&self) -> Result<Vec<ApplicationId>, RepositoryError> {
        let guard = lock(&self.records)?;
        let mut ids: Vec<ApplicationId> = guard.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    pub(crate) fn stored(&self, id: &ApplicationId) -> Option<StoredApplication> {
        lock(&self.records).ok()?.get(id).cloned()
    }
}

impl ApplicationRepository for InMemoryApplicationRepository {
    fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        let guard = lock(&self.records)?;
        Ok(guard.get(id).map(|stored| stored.application.clone()))
    }

    fn update_application_summary(
        &self,
        id: &ApplicationId,
        aggregate: &AggregateResult,
        summary: &ApplicationSummary,
    ) -> Result<(), RepositoryError> {
        let aggregate = serde_json::to_value(aggregate)?;
        let mut guard = lock(&self.records)?;
        let stored = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        stored.aggregate = Some(aggregate);
        stored.summary = Some(summary.clone());
        Ok(())
    }

    fn append_audit(
        &self,
        id: &ApplicationId,
        step: &StepId,
        source: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.records)?;
        let stored = guard.get_mut(id).ok_or(RepositoryError::NotFound)?;
        stored.audit.push(AuditEntry {
            step: step.clone(),
            source: source.map(str::to_string),
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

#[derive(Default, Clone)]
pub(crate) struct InMemorySchoolRepository {
    rows: Arc<Mutex<Vec<SchoolEnrichmentRecord>>>,
}

impl InMemorySchoolRepository {
    pub(crate) fn records(&self) -> Vec<SchoolEnrichmentRecord> {
        lock(&self.rows).map(|rows| rows.clone()).unwrap_or_default()
    }
}

fn same_school(record: &SchoolEnrichmentRecord, name: &str, state: Option<&str>) -> bool {
    record.school_name.trim().eq_ignore_ascii_case(name.trim())
        && match (state, record.state_code.as_deref()) {
            (Some(wanted), Some(stored)) => wanted.eq_ignore_ascii_case(stored),
            _ => true,
        }
}

impl SchoolRepository for InMemorySchoolRepository {
    fn get_enrichment(
        &self,
        school_name: &str,
        state: Option<&str>,
    ) -> Result<Option<SchoolEnrichmentRecord>, RepositoryError> {
        let guard = lock(&self.rows)?;
        Ok(guard
            .iter()
            .find(|row| same_school(row, school_name, state))
            .cloned())
    }

    fn create_enrichment(
        &self,
        skeleton: &SchoolEnrichmentRecord,
    ) -> Result<SchoolId, RepositoryError> {
        let mut guard = lock(&self.rows)?;
        let name = skeleton.school_name.as_str();
        if guard
            .iter()
            .any(|row| same_school(row, name, skeleton.state_code.as_deref()))
        {
            return Err(RepositoryError::Conflict);
        }
        let id = SchoolId(guard.len() as i64 + 1);
        let mut row = skeleton.clone();
        row.id = Some(id);
        row.updated_at = Some(Utc::now());
        guard.push(row);
        Ok(id)
    }

    fn update_enrichment(
        &self,
        id: SchoolId,
        update: &EnrichmentUpdate,
    ) -> Result<(), RepositoryError> {
        let mut guard = lock(&self.rows)?;
        let row = guard
            .iter_mut()
            .find(|row| row.id == Some(id))
            .ok_or(RepositoryError::NotFound)?;
        update.apply_to(row);
        Ok(())
    }

    fn mark_validated(&self, id: SchoolId, log: &ValidationLog) -> Result<(), RepositoryError> {
        tracing::debug!(%id, checks = log.validation_checks, "school validated");
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) enum ImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    Invalid { row: usize, message: String },
}

impl std::fmt::Display for ImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImportError::Io(err) => write!(f, "failed to read export: {}", err),
            ImportError::Csv(err) => write!(f, "invalid CSV data: {}", err),
            ImportError::Invalid { row, message } => write!(f, "row {}: {}", row, message),
        }
    }
}

impl std::error::Error for ImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ImportError::Io(err) => Some(err),
            ImportError::Csv(err) => Some(err),
            ImportError::Invalid { .. } => None,
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<ImportError> for applicant_eval::error::AppError {
    fn from(err: ImportError) -> Self {
        Self::Import(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ApplicationRow {
    id: String,
    applicant_name: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    essay: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    transcript: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    recommendation: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    school_name: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    school_state: Option<String>,
    #[serde(default, deserialize_with = "flag")]
    is_training: bool,
    #[serde(default, deserialize_with = "flag")]
    is_test: bool,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}

fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(optional_flag(deserializer)?.unwrap_or(false))
}

/// Yes/no cell where blank means unknown.
fn optional_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "false" | "no" | "0" => Ok(Some(false)),
        "true" | "yes" | "1" => Ok(Some(true)),
        other => Err(serde::de::Error::custom(format!("expected a yes/no flag, got '{other}'"))),
    }
}

/// Parse an application export. Columns: `id`, `applicant_name`, `essay`, `transcript`,
/// `recommendation`, `school_name`, `school_state`, `is_training`, `is_test`.
pub(crate) fn read_applications<R: Read>(reader: R) -> Result<Vec<Application>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(reader);
    let mut applications = Vec::new();

    for (index, row) in csv_reader.deserialize::<ApplicationRow>().enumerate() {
        let row = row?;
        let id = row.id.trim();
        if id.is_empty() {
            return Err(ImportError::Invalid {
                row: index + 1,
                message: "application id is blank".to_string(),
            });
        }
        applications.push(Application {
            id: ApplicationId(id.to_string()),
            applicant_name: row.applicant_name.trim().to_string(),
            essay: row.essay,
            transcript: row.transcript,
            recommendation_text: row.recommendation,
            school_name: row.school_name,
            school_state: row.school_state,
            is_training: row.is_training,
            is_test: row.is_test,
        });
    }

    Ok(applications)
}

pub(crate) fn load_applications(path: &Path) -> Result<Vec<Application>, ImportError> {
    let file = std::fs::File::open(path)?;
    read_applications(file)
}

/// One row of a school reference table (state report card export or similar).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SchoolReferenceRow {
    pub(crate) school_name: String,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub(crate) state_code: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub(crate) school_district: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    pub(crate) nces_id: Option<String>,
    #[serde(default)]
    pub(crate) total_students: Option<u32>,
    #[serde(default)]
    pub(crate) graduation_rate: Option<f32>,
    #[serde(default)]
    pub(crate) ap_course_count: Option<u32>,
    #[serde(default)]
    pub(crate) honors_course_count: Option<u32>,
    #[serde(default, deserialize_with = "optional_flag")]
    pub(crate) ib_program_available: Option<bool>,
    #[serde(default, deserialize_with = "optional_flag")]
    pub(crate) stem_program_available: Option<bool>,
    #[serde(default)]
    pub(crate) free_lunch_percentage: Option<f32>,
    #[serde(default)]
    pub(crate) opportunity_score: Option<f32>,
}

impl SchoolReferenceRow {
    fn update(&self) -> EnrichmentUpdate {
        EnrichmentUpdate {
            state_code: self.state_code.clone(),
            school_district: self.school_district.clone(),
            nces_id: self.nces_id.clone(),
            total_students: self.total_students,
            graduation_rate: self.graduation_rate,
            ap_course_count: self.ap_course_count,
            honors_course_count: self.honors_course_count,
            ib_program_available: self.ib_program_available,
            stem_program_available: self.stem_program_available,
            free_lunch_percentage: self.free_lunch_percentage,
            opportunity_score: self.opportunity_score,
            confidence_score: Some(REFERENCE_CONFIDENCE),
            analysis_status: None,
        }
    }
}

const REFERENCE_CONFIDENCE: f32 = 0.9;

pub(crate) fn read_school_reference<R: Read>(
    reader: R,
) -> Result<Vec<SchoolReferenceRow>, ImportError> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut rows = Vec::new();
    for row in csv_reader.deserialize::<SchoolReferenceRow>() {
        rows.push(row?);
    }
    Ok(rows)
}

pub(crate) fn load_school_reference(path: &Path) -> Result<Vec<SchoolReferenceRow>, ImportError> {
    let file = std::fs::File::open(path)?;
    read_school_reference(file)
}

/// Enricher answering from a static reference table instead of a research model.
pub(crate) struct ReferenceTableEnricher {
    rows: Vec<SchoolReferenceRow>,
}

impl ReferenceTableEnricher {
    pub(crate) fn new(rows: Vec<SchoolReferenceRow>) -> Self {
        Self { rows }
    }

    fn find(&self, request: &EnrichmentRequest) -> Option<&SchoolReferenceRow> {
        let name = request.school_name.trim();
        self.rows.iter().find(|row| {
            row.school_name.trim().eq_ignore_ascii_case(name)
                && match (request.state_code.as_deref(), row.state_code.as_deref()) {
                    (Some(wanted), Some(listed)) => wanted.eq_ignore_ascii_case(listed),
                    _ => true,
                }
        })
    }
}

impl SchoolEnricher for ReferenceTableEnricher {
    fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResponse, EnrichmentError> {
        let Some(row) = self.find(request) else {
            return Ok(EnrichmentResponse::failed(format!(
                "no reference data for {}",
                request.school_name
            )));
        };

        let update = if request.is_remediation() {
            row.update().restricted_to(&request.focus)
        } else {
            row.update()
        };
        Ok(EnrichmentResponse::complete(update))
    }

    fn model(&self) -> Option<&str> {
        Some("reference-table")
    }
}
