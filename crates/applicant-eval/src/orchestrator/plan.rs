use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::agents::{AgentRegistry, RegistryError};
use crate::domain::StepId;

/// Whether a step's failure downgrades the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepRequirement {
    Required,
    Optional,
}

/// How much a step depends on the applicant's school record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchoolContextRequirement {
    None,
    /// Run with whatever school data exists, even if validation did not pass.
    Preferred,
    /// Skip the step unless the school record validated.
    Required,
}

/// What happens to a step whose prerequisite produced no output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyPolicy {
    #[default]
    SkipDependents,
    RunDependents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub id: StepId,
    pub requirement: StepRequirement,
    #[serde(default)]
    pub prerequisites: Vec<StepId>,
    pub school_context: SchoolContextRequirement,
}

impl PlannedStep {
    pub fn required(id: impl Into<StepId>) -> Self {
        Self::new(id.into(), StepRequirement::Required)
    }

    pub fn optional(id: impl Into<StepId>) -> Self {
        Self::new(id.into(), StepRequirement::Optional)
    }

    fn new(id: StepId, requirement: StepRequirement) -> Self {
        Self {
            id,
            requirement,
            prerequisites: Vec::new(),
            school_context: SchoolContextRequirement::None,
        }
    }

    /// Declare that this step consumes the output of `step`.
    pub fn after(mut self, step: impl Into<StepId>) -> Self {
        self.prerequisites.push(step.into());
        self
    }

    pub fn with_school_context(mut self, requirement: SchoolContextRequirement) -> Self {
        self.school_context = requirement;
        self
    }

    pub fn is_required(&self) -> bool {
        self.requirement == StepRequirement::Required
    }
}

/// Ordered list of steps for one evaluation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPlan {
    steps: Vec<PlannedStep>,
    #[serde(default)]
    dependency_policy: DependencyPolicy,
}

impl StepPlan {
    pub fn new(steps: Vec<PlannedStep>) -> Self {
        Self {
            steps,
            dependency_policy: DependencyPolicy::default(),
        }
    }

    /// Every id becomes a required step with no prerequisites.
    pub fn required<I, T>(ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<StepId>,
    {
        Self::new(ids.into_iter().map(PlannedStep::required).collect())
    }

    pub fn with_dependency_policy(mut self, policy: DependencyPolicy) -> Self {
        self.dependency_policy = policy;
        self
    }

    pub fn steps(&self) -> &[PlannedStep] {
        &self.steps
    }

    pub fn dependency_policy(&self) -> DependencyPolicy {
        self.dependency_policy
    }

    pub fn ids(&self) -> Vec<StepId> {
        self.steps.iter().map(|step| step.id.clone()).collect()
    }

    /// Check that no step is scheduled twice and every planned step has a registered
    /// capability.
    pub fn validate(&self, registry: &AgentRegistry) -> Result<(), RegistryError> {
        let mut seen = BTreeSet::new();
        if let Some(step) = self.steps.iter().find(|step| !seen.insert(&step.id)) {
            return Err(RegistryError::DuplicatePlanned(step.id.clone()));
        }

        let missing: Vec<StepId> = self
            .steps
            .iter()
            .filter(|step| !registry.contains(&step.id))
            .map(|step| step.id.clone())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::Unregistered(missing))
        }
    }
}
