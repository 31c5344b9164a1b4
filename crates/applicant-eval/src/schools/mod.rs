//! School enrichment records and the workflow guaranteeing they are complete before an
//! evaluation step reads them.

mod domain;
mod enricher;
mod validation;
mod workflow;

#[cfg(test)]
mod tests;

pub use domain::{
    AnalysisStatus, EnrichmentUpdate, ReviewStatus, SchoolEnrichmentRecord, SchoolField, SchoolId,
};
pub use enricher::{
    EnrichmentError, EnrichmentRequest, EnrichmentResponse, EnrichmentStatus, SchoolEnricher,
};
pub use validation::{validate, FieldCheck, ValidationReport, DEFAULT_REQUIRED_FIELDS};
pub use workflow::{
    Readiness, RemediationAttempt, RemediationOutcome, SchoolContext, SchoolDataWorkflow,
    SchoolWorkflowError, ValidationLog, DEFAULT_MAX_REMEDIATION_ATTEMPTS,
};
