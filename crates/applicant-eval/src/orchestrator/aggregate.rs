use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::plan::{StepPlan, StepRequirement};
use super::summary::{extract_top_level, TopLevelSummary};
use crate::domain::{ApplicationId, StepId};
use crate::monitor::ExecutionStatus;
use crate::schools::ValidationLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    /// Every required step completed.
    Complete,
    /// At least one step completed but a required step failed or was skipped.
    Partial,
    /// Nothing completed.
    Pending,
}

impl OverallStatus {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Pending => "pending",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub status: ExecutionStatus,
    pub requirement: StepRequirement,
    pub output: Option<Value>,
    pub human_summary: Option<String>,
    pub error: Option<String>,
    pub duration_ms: Option<i64>,
}

impl StepRecord {
    pub(crate) fn unfinished(
        requirement: StepRequirement,
        status: ExecutionStatus,
        error: String,
    ) -> Self {
        Self {
            status,
            requirement,
            output: None,
            human_summary: None,
            error: Some(error),
            duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub scheduled: Vec<StepId>,
    pub completed: Vec<StepId>,
    pub failed: Vec<StepId>,
    pub skipped: Vec<StepId>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Combined per-step result of one run; written to the application's summary field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateResult {
    pub application_id: ApplicationId,
    pub steps: BTreeMap<StepId, StepRecord>,
    pub overall_status: OverallStatus,
    pub top_level: TopLevelSummary,
    pub metadata: RunMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub school_validation: Option<ValidationLog>,
}

impl AggregateResult {
    pub(crate) fn assemble(
        application_id: ApplicationId,
        plan: &StepPlan,
        steps: BTreeMap<StepId, StepRecord>,
        school_validation: Option<ValidationLog>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let ids_with = |status: ExecutionStatus| -> Vec<StepId> {
            plan.steps()
                .iter()
                .filter(|step| steps.get(&step.id).map(|record| record.status) == Some(status))
                .map(|step| step.id.clone())
                .collect()
        };

        let metadata = RunMetadata {
            scheduled: plan.ids(),
            completed: ids_with(ExecutionStatus::Completed),
            failed: ids_with(ExecutionStatus::Failed),
            skipped: ids_with(ExecutionStatus::Skipped),
            started_at,
            finished_at: Utc::now().max(started_at),
        };

        let overall_status = derive_status(plan, &steps);
        let top_level = extract_top_level(&metadata.completed, &steps);

        Self {
            application_id,
            steps,
            overall_status,
            top_level,
            metadata,
            school_validation,
        }
    }

    pub fn step(&self, id: &str) -> Option<&StepRecord> {
        self.steps.get(&StepId::from(id))
    }
}

pub(crate) fn derive_status(
    plan: &StepPlan,
    steps: &BTreeMap<StepId, StepRecord>,
) -> OverallStatus {
    let completed = |id: &StepId| {
        steps.get(id).map(|record| record.status) == Some(ExecutionStatus::Completed)
    };

    if !plan.steps().iter().any(|step| completed(&step.id)) {
        return OverallStatus::Pending;
    }

    if plan
        .steps()
        .iter()
        .filter(|step| step.is_required())
        .all(|step| completed(&step.id))
    {
        OverallStatus::Complete
    } else {
        OverallStatus::Partial
    }
}

/// Compact view stored next to the aggregate for list screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub application_id: ApplicationId,
    pub overall_status: OverallStatus,
    pub completed_steps: Vec<StepId>,
    pub score: Option<f64>,
    pub recommendation: Option<String>,
    pub strengths: Vec<String>,
    pub risks: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl From<&AggregateResult> for ApplicationSummary {
    fn from(aggregate: &AggregateResult) -> Self {
        Self {
            application_id: aggregate.application_id.clone(),
            overall_status: aggregate.overall_status,
            completed_steps: aggregate.metadata.completed.clone(),
            score: aggregate.top_level.score,
            recommendation: aggregate.top_level.recommendation.clone(),
            strengths: aggregate.top_level.strengths.clone(),
            risks: aggregate.top_level.risks.clone(),
            generated_at: aggregate.metadata.finished_at,
        }
    }
}
