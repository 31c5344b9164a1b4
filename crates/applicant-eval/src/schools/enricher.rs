use serde::{Deserialize, Serialize};

use super::domain::{EnrichmentUpdate, SchoolEnrichmentRecord, SchoolField};

/// Inputs for one enrichment or remediation call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentRequest {
    pub school_name: String,
    pub school_district: Option<String>,
    pub state_code: Option<String>,
    pub existing: Option<SchoolEnrichmentRecord>,
    /// Empty for a full enrichment; the missing fields for a remediation call.
    pub focus: Vec<SchoolField>,
}

impl EnrichmentRequest {
    pub fn for_record(record: &SchoolEnrichmentRecord, focus: Vec<SchoolField>) -> Self {
        Self {
            school_name: record.school_name.clone(),
            school_district: record.school_district.clone(),
            state_code: record.state_code.clone(),
            existing: Some(record.clone()),
            focus,
        }
    }

    pub fn is_remediation(&self) -> bool {
        !self.focus.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResponse {
    pub status: EnrichmentStatus,
    #[serde(default)]
    pub fields: EnrichmentUpdate,
    #[serde(default)]
    pub message: Option<String>,
}

impl EnrichmentResponse {
    pub fn complete(fields: EnrichmentUpdate) -> Self {
        Self {
            status: EnrichmentStatus::Complete,
            fields,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: EnrichmentStatus::Failed,
            fields: EnrichmentUpdate::default(),
            message: Some(message.into()),
        }
    }
}

/// Collaborator that researches school data, typically backed by a model call. Must be
/// safe to call repeatedly for the same school.
pub trait SchoolEnricher: Send + Sync {
    fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResponse, EnrichmentError>;

    /// Model identifier reported to the execution monitor.
    fn model(&self) -> Option<&str> {
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EnrichmentError {
    #[error("enrichment backend unavailable: {0}")]
    Unavailable(String),
    #[error("enrichment reported failure: {0}")]
    Rejected(String),
    #[error("enrichment marked complete but returned no core school data")]
    EmptyResult,
}
