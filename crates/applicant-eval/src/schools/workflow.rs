use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::domain::{
    AnalysisStatus, EnrichmentUpdate, SchoolEnrichmentRecord, SchoolField, SchoolId,
};
use super::enricher::{
    EnrichmentError, EnrichmentRequest, EnrichmentResponse, EnrichmentStatus, SchoolEnricher,
};
use super::validation::{validate, ValidationReport, DEFAULT_REQUIRED_FIELDS};
use crate::monitor::{ExecutionMonitor, ExecutionStatus};
use crate::repository::{RepositoryError, SchoolRepository};

pub const DEFAULT_MAX_REMEDIATION_ATTEMPTS: u32 = 2;

/// One remediation round inside a validation loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemediationAttempt {
    pub attempt: u32,
    pub missing_before: Vec<SchoolField>,
    pub remediation_applied: bool,
    pub error: Option<String>,
    pub missing_after: Vec<SchoolField>,
}

/// Terminal outcome of a validation loop; never retried by the workflow itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    NotReady {
        missing: Vec<SchoolField>,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationLog {
    pub school_name: String,
    pub validation_checks: u32,
    pub attempts: Vec<RemediationAttempt>,
    pub readiness: Readiness,
}

impl ValidationLog {
    pub fn is_ready(&self) -> bool {
        matches!(self.readiness, Readiness::Ready)
    }

    pub fn remaining_missing(&self) -> &[SchoolField] {
        match &self.readiness {
            Readiness::Ready => &[],
            Readiness::NotReady { missing, .. } => missing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemediationOutcome {
    pub record: SchoolEnrichmentRecord,
    pub log: ValidationLog,
}

impl RemediationOutcome {
    pub fn is_ready(&self) -> bool {
        self.log.is_ready()
    }
}

/// What an evaluation step receives about the applicant's school.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchoolContext {
    pub record: Option<SchoolEnrichmentRecord>,
    pub ready: bool,
    pub log: Option<ValidationLog>,
    pub error: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SchoolWorkflowError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),
}

/// Cache-or-enrich plus the bounded validate/remediate loop for school records.
pub struct SchoolDataWorkflow<S> {
    repository: Arc<S>,
    monitor: Arc<ExecutionMonitor>,
    enricher: Option<Arc<dyn SchoolEnricher>>,
    max_remediation_attempts: u32,
    required_fields: Vec<SchoolField>,
}

impl<S> SchoolDataWorkflow<S>
where
    S: SchoolRepository + 'static,
{
    pub fn new(repository: Arc<S>, monitor: Arc<ExecutionMonitor>) -> Self {
        Self {
            repository,
            monitor,
            enricher: None,
            max_remediation_attempts: DEFAULT_MAX_REMEDIATION_ATTEMPTS,
            required_fields: DEFAULT_REQUIRED_FIELDS.to_vec(),
        }
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn SchoolEnricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_max_remediation_attempts(mut self, attempts: u32) -> Self {
        self.max_remediation_attempts = attempts;
        self
    }

    pub fn with_required_fields(mut self, fields: Vec<SchoolField>) -> Self {
        self.required_fields = fields;
        self
    }

    pub fn required_fields(&self) -> &[SchoolField] {
        &self.required_fields
    }

    /// Cached record for the school, if any. Read failures count as a miss.
    pub fn lookup(&self, school_name: &str, state: Option<&str>) -> Option<SchoolEnrichmentRecord> {
        match self.repository.get_enrichment(school_name, state) {
            Ok(found) => found,
            Err(error) => {
                warn!(school = school_name, %error, "school lookup failed; treating as cache miss");
                None
            }
        }
    }

    /// Return the existing record or insert a pending skeleton. Enrichment is left to
    /// [`Self::enrich`].
    pub fn get_or_create(
        &self,
        school_name: &str,
        state: Option<&str>,
        district: Option<&str>,
    ) -> Result<SchoolEnrichmentRecord, SchoolWorkflowError> {
        if let Some(existing) = self.lookup(school_name, state) {
            debug!(
                school = school_name,
                needs_enrichment = existing.needs_enrichment(),
                "school record found"
            );
            return Ok(existing);
        }

        let mut skeleton = SchoolEnrichmentRecord::skeleton(school_name, state, district);
        let id = match self.repository.create_enrichment(&skeleton) {
            Ok(id) => id,
            Err(RepositoryError::Conflict) => {
                let existing = self
                    .lookup(school_name, state)
                    .ok_or(RepositoryError::Conflict)?;
                debug!(school = school_name, "school record created concurrently; reusing it");
                return Ok(existing);
            }
            Err(error) => return Err(error.into()),
        };
        skeleton.id = Some(id);
        info!(school = school_name, %id, "created skeleton school record");
        Ok(skeleton)
    }

    /// Run the enrichment collaborator when the record needs it. Records that are already
    /// populated, or calls without a collaborator, return the record untouched. `scope`
    /// prefixes the monitor key so concurrent runs on one school stay distinct.
    pub fn enrich(
        &self,
        scope: &str,
        mut record: SchoolEnrichmentRecord,
    ) -> Result<SchoolEnrichmentRecord, SchoolWorkflowError> {
        if !record.needs_enrichment() {
            return Ok(record);
        }
        let Some(enricher) = self.enricher.as_deref() else {
            debug!(school = %record.school_name, "no enricher configured; leaving record pending");
            return Ok(record);
        };

        let step_name = format!("{scope}:school_enrichment:{}", record.school_name);
        let request = EnrichmentRequest::for_record(&record, Vec::new());
        let outcome = self.call_enricher(enricher, &step_name, &request);

        let failure = match outcome {
            Ok(response) if response.status == EnrichmentStatus::Complete => {
                let mut update = response.fields.sanitized();
                update.analysis_status = Some(AnalysisStatus::Complete);
                let mut candidate = record.clone();
                update.apply_to(&mut candidate);

                if candidate.lacks_core_data() {
                    EnrichmentError::EmptyResult
                } else {
                    self.persist(&mut record, &update)?;
                    info!(school = %record.school_name, "school enrichment complete");
                    return Ok(record);
                }
            }
            Ok(response) => EnrichmentError::Rejected(
                response
                    .message
                    .unwrap_or_else(|| "no reason given".to_string()),
            ),
            Err(error) => error,
        };

        warn!(school = %record.school_name, error = %failure, "school enrichment failed");
        let marked = self.persist(&mut record, &EnrichmentUpdate::status(AnalysisStatus::Failed));
        if let Err(error) = marked {
            warn!(school = %record.school_name, %error, "could not mark school enrichment failed");
        }
        Err(failure.into())
    }

    /// Lookup-or-create followed by enrichment when needed.
    pub fn ensure_enriched(
        &self,
        scope: &str,
        school_name: &str,
        state: Option<&str>,
    ) -> Result<SchoolEnrichmentRecord, SchoolWorkflowError> {
        let record = self.get_or_create(school_name, state, None)?;
        self.enrich(scope, record)
    }

    pub fn validate(&self, record: &SchoolEnrichmentRecord) -> ValidationReport {
        validate(record, &self.required_fields)
    }

    /// Validate the record and, while fields are missing, ask the enricher for exactly those
    /// fields, up to `max_remediation_attempts` times.
    pub fn validate_and_remediate(
        &self,
        scope: &str,
        mut record: SchoolEnrichmentRecord,
    ) -> RemediationOutcome {
        let mut report = self.validate(&record);
        let mut validation_checks = 1;
        let mut attempts = Vec::new();
        let mut stop_reason = None;

        for attempt in 1..=self.max_remediation_attempts {
            if report.passed {
                break;
            }
            let Some(enricher) = self.enricher.as_deref() else {
                stop_reason = Some("no enrichment collaborator configured".to_string());
                break;
            };

            let missing_before = report.missing.clone();
            let step_name = format!(
                "{scope}:school_remediation:{}:attempt-{attempt}",
                record.school_name
            );
            let request = EnrichmentRequest::for_record(&record, missing_before.clone());

            let (remediation_applied, error) =
                match self.call_enricher(enricher, &step_name, &request) {
                    Ok(response) => self.merge_remediation(&mut record, response),
                    Err(error) => (false, Some(error.to_string())),
                };
            if let Some(error) = &error {
                warn!(school = %record.school_name, attempt, %error, "school remediation failed");
            }

            report = self.validate(&record);
            validation_checks += 1;
            attempts.push(RemediationAttempt {
                attempt,
                missing_before,
                remediation_applied,
                error,
                missing_after: report.missing.clone(),
            });
        }

        let readiness = if report.passed {
            Readiness::Ready
        } else {
            let reason = stop_reason.unwrap_or_else(|| {
                format!(
                    "required fields still missing after {} remediation attempt(s)",
                    attempts.len()
                )
            });
            Readiness::NotReady {
                missing: report.missing.clone(),
                reason,
            }
        };

        let log = ValidationLog {
            school_name: record.school_name.clone(),
            validation_checks,
            attempts,
            readiness,
        };

        if log.is_ready() {
            if let Some(id) = record.id {
                if let Err(error) = self.repository.mark_validated(id, &log) {
                    warn!(school = %record.school_name, %error, "could not mark school validated");
                }
            }
        }

        RemediationOutcome { record, log }
    }

    /// Full preparation used before a school-aware evaluation step. Never fails; problems are
    /// reported through `ready = false` and `error`.
    pub fn prepare_context(
        &self,
        scope: &str,
        school_name: &str,
        state: Option<&str>,
    ) -> SchoolContext {
        let record = match self.get_or_create(school_name, state, None) {
            Ok(record) => record,
            Err(error) => {
                return SchoolContext {
                    record: None,
                    ready: false,
                    log: None,
                    error: Some(error.to_string()),
                }
            }
        };

        let record = match self.enrich(scope, record.clone()) {
            Ok(enriched) => enriched,
            Err(error) => {
                let record = self.lookup(school_name, state).unwrap_or(record);
                return SchoolContext {
                    record: Some(record),
                    ready: false,
                    log: None,
                    error: Some(error.to_string()),
                };
            }
        };

        let outcome = self.validate_and_remediate(scope, record);
        SchoolContext {
            ready: outcome.is_ready(),
            record: Some(outcome.record),
            log: Some(outcome.log),
            error: None,
        }
    }

    fn call_enricher(
        &self,
        enricher: &dyn SchoolEnricher,
        step_name: &str,
        request: &EnrichmentRequest,
    ) -> Result<EnrichmentResponse, EnrichmentError> {
        self.monitor.start(step_name, enricher.model(), None);
        let result = enricher.enrich(request);
        match &result {
            Ok(response) if response.status == EnrichmentStatus::Complete => {
                let fields = response.fields.populated_fields().len();
                self.monitor
                    .end(step_name, ExecutionStatus::Completed, None, Some(fields));
            }
            Ok(response) => {
                self.monitor.end(
                    step_name,
                    ExecutionStatus::Failed,
                    response.message.clone(),
                    None,
                );
            }
            Err(error) => {
                self.monitor
                    .end(step_name, ExecutionStatus::Failed, Some(error.to_string()), None);
            }
        }
        result
    }

    /// Merge a remediation response. Returns whether any field was applied and the error, if
    /// the response or the write failed.
    fn merge_remediation(
        &self,
        record: &mut SchoolEnrichmentRecord,
        response: EnrichmentResponse,
    ) -> (bool, Option<String>) {
        if response.status == EnrichmentStatus::Failed {
            let message = response
                .message
                .unwrap_or_else(|| "remediation reported failure".to_string());
            return (false, Some(message));
        }

        let mut update = response.fields.sanitized();
        if !update.has_data() {
            return (false, Some("remediation returned no usable fields".to_string()));
        }

        let mut candidate = record.clone();
        update.apply_to(&mut candidate);
        if !candidate.lacks_core_data() {
            update.analysis_status = Some(AnalysisStatus::Complete);
        }

        match self.persist(record, &update) {
            Ok(()) => (true, None),
            Err(error) => {
                // Keep the merged values for this loop even though the write failed.
                update.apply_to(record);
                (true, Some(error.to_string()))
            }
        }
    }

    /// Apply `update` to the stored row and to `record`. Rows without an id are inserted.
    fn persist(
        &self,
        record: &mut SchoolEnrichmentRecord,
        update: &EnrichmentUpdate,
    ) -> Result<(), RepositoryError> {
        match record.id {
            Some(id) => {
                self.repository.update_enrichment(id, update)?;
                update.apply_to(record);
            }
            None => {
                update.apply_to(record);
                let id: SchoolId = self.repository.create_enrichment(record)?;
                record.id = Some(id);
            }
        }
        Ok(())
    }
}
