//! Persistence contracts consumed by the pipeline. Adapters live outside the crate (the CLI
//! ships in-memory ones); every call is synchronous and may fail.

use crate::domain::{Application, ApplicationId, StepId};
use crate::orchestrator::{AggregateResult, ApplicationSummary};
use crate::schools::{EnrichmentUpdate, SchoolEnrichmentRecord, SchoolId, ValidationLog};

/// Storage for applicant records and their evaluation results.
pub trait ApplicationRepository: Send + Sync {
    fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError>;

    /// Write the aggregate and the compact summary back onto the application.
    fn update_application_summary(
        &self,
        id: &ApplicationId,
        aggregate: &AggregateResult,
        summary: &ApplicationSummary,
    ) -> Result<(), RepositoryError>;

    /// Record that `step` produced output for the application.
    fn append_audit(
        &self,
        id: &ApplicationId,
        step: &StepId,
        source: Option<&str>,
    ) -> Result<(), RepositoryError>;
}

/// Storage for school enrichment records.
pub trait SchoolRepository: Send + Sync {
    fn get_enrichment(
        &self,
        school_name: &str,
        state: Option<&str>,
    ) -> Result<Option<SchoolEnrichmentRecord>, RepositoryError>;

    fn create_enrichment(&self, skeleton: &SchoolEnrichmentRecord)
        -> Result<SchoolId, RepositoryError>;

    /// Apply the populated fields of `update` to the existing row.
    fn update_enrichment(&self, id: SchoolId, update: &EnrichmentUpdate)
        -> Result<(), RepositoryError>;

    /// Called once a validation loop ends ready. Adapters without a column for it can ignore it.
    fn mark_validated(&self, _id: SchoolId, _log: &ValidationLog) -> Result<(), RepositoryError> {
        Ok(())
    }
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
    #[error("failed to serialize record: {0}")]
    Serialization(#[from] serde_json::Error),
}
