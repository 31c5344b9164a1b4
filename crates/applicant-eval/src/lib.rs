//! Applicant evaluation pipeline: step orchestration, execution monitoring, and the
//! school-data validate/remediate loop that feeds school context into evaluation steps.

pub mod agents;
pub mod config;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod orchestrator;
pub mod repository;
pub mod schools;
pub mod telemetry;

pub use agents::{AgentRegistry, RegistryError, StepCapability, StepContext, StepError, StepOutput};
pub use domain::{Application, ApplicationId, StepId};
pub use error::AppError;
pub use monitor::{ExecutionMonitor, ExecutionStatus, MonitorSnapshot, StepExecution};
pub use orchestrator::{
    AggregateResult, ApplicationSummary, DependencyPolicy, Orchestrator, OrchestratorError,
    OverallStatus, PlannedStep, ProgressEvent, SchoolContextRequirement, StepPlan,
    StepRequirement,
};
pub use repository::{ApplicationRepository, RepositoryError, SchoolRepository};
pub use schools::{
    AnalysisStatus, EnrichmentError, SchoolDataWorkflow, SchoolEnricher, SchoolEnrichmentRecord,
    SchoolField, ValidationLog,
};
