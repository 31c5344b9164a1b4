use std::collections::BTreeMap;

use serde_json::Value;

use crate::domain::{Application, StepId};
use crate::schools::SchoolContext;

/// Everything a step sees when it runs.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    pub application: &'a Application,
    /// Outputs of steps that already completed in this run, keyed by step id.
    pub prior_outputs: &'a BTreeMap<StepId, Value>,
    pub school: Option<&'a SchoolContext>,
}

impl<'a> StepContext<'a> {
    pub fn prior(&self, step: &str) -> Option<&'a Value> {
        self.prior_outputs.get(&StepId::from(step))
    }
}

/// Normalized, JSON-serializable result of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub data: Value,
    pub human_summary: Option<String>,
    /// Where the output came from (model deployment, rule set), recorded in the audit trail.
    pub source: Option<String>,
}

impl StepOutput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            human_summary: None,
            source: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.human_summary = Some(summary.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Message of an error-shaped output: an object whose `error` key is set.
    pub fn error_message(&self) -> Option<String> {
        match self.data.get("error") {
            None | Some(Value::Null) | Some(Value::Bool(false)) => None,
            Some(Value::String(message)) => Some(message.clone()),
            Some(other) => Some(other.to_string()),
        }
    }

    pub fn size(&self) -> usize {
        self.data.to_string().len()
    }
}

/// A collaborator able to perform one evaluation step (parse a transcript, analyze an
/// essay, score the applicant). Implementations may block on a model call.
pub trait StepCapability: Send + Sync {
    fn run(&self, context: &StepContext<'_>) -> Result<StepOutput, StepError>;

    /// Model identifier reported to the execution monitor.
    fn model(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StepError {
    #[error("required input missing: {0}")]
    MissingInput(String),
    #[error("model call failed: {0}")]
    Model(String),
    #[error("step failed: {0}")]
    Failed(String),
}
