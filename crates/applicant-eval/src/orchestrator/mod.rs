//! Step planning, execution, and aggregation for one application.

mod aggregate;
mod plan;
mod service;
mod summary;

#[cfg(test)]
mod tests;

pub use aggregate::{AggregateResult, ApplicationSummary, OverallStatus, RunMetadata, StepRecord};
pub use plan::{
    DependencyPolicy, PlannedStep, SchoolContextRequirement, StepPlan, StepRequirement,
};
pub use service::{Orchestrator, OrchestratorError, ProgressCallback, ProgressEvent};
pub use summary::{synthesize_summary, TopLevelSummary};
