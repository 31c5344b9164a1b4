use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier wrapper for applications under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicationId(pub String);

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name of one evaluation step (e.g. `transcript_parser`, `student_evaluator`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StepId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Applicant record as read from persistence. The pipeline never mutates it; results are
/// written back through [`crate::repository::ApplicationRepository::update_application_summary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub applicant_name: String,
    #[serde(default)]
    pub essay: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub recommendation_text: Option<String>,
    #[serde(default)]
    pub school_name: Option<String>,
    #[serde(default)]
    pub school_state: Option<String>,
    #[serde(default)]
    pub is_training: bool,
    #[serde(default)]
    pub is_test: bool,
}

impl Application {
    /// Total characters of free text handed to the steps, used as the monitor's input size.
    pub fn text_size(&self) -> usize {
        [&self.essay, &self.transcript, &self.recommendation_text]
            .into_iter()
            .flatten()
            .map(|text| text.len())
            .sum()
    }

    /// School name and state when the application references a school.
    pub fn school(&self) -> Option<(&str, Option<&str>)> {
        let name = self.school_name.as_deref().map(str::trim)?;
        if name.is_empty() {
            return None;
        }
        let state = self
            .school_state
            .as_deref()
            .map(str::trim)
            .filter(|state| !state.is_empty());
        Some((name, state))
    }
}
