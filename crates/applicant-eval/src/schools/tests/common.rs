use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::monitor::ExecutionMonitor;
use crate::repository::{RepositoryError, SchoolRepository};
use crate::schools::{
    AnalysisStatus, EnrichmentError, EnrichmentRequest, EnrichmentResponse, EnrichmentUpdate,
    SchoolDataWorkflow, SchoolEnricher, SchoolEnrichmentRecord, SchoolId, ValidationLog,
};

#[derive(Default)]
pub(super) struct MemorySchools {
    pub(super) rows: Mutex<BTreeMap<SchoolId, SchoolEnrichmentRecord>>,
    pub(super) creates: Mutex<u32>,
    pub(super) updates: Mutex<Vec<(SchoolId, EnrichmentUpdate)>>,
    pub(super) validated: Mutex<Vec<SchoolId>>,
}

impl MemorySchools {
    pub(super) fn seeded(record: SchoolEnrichmentRecord) -> (Self, SchoolId) {
        let schools = Self::default();
        let id = schools.create_enrichment(&record).expect("seed insert");
        *schools.creates.lock().expect("create counter poisoned") = 0;
        (schools, id)
    }

    pub(super) fn row(&self, id: SchoolId) -> SchoolEnrichmentRecord {
        self.rows
            .lock()
            .expect("rows mutex poisoned")
            .get(&id)
            .cloned()
            .expect("row present")
    }

    pub(super) fn row_count(&self) -> usize {
        self.rows.lock().expect("rows mutex poisoned").len()
    }

    pub(super) fn creates(&self) -> u32 {
        *self.creates.lock().expect("create counter poisoned")
    }
}

impl SchoolRepository for MemorySchools {
    fn get_enrichment(
        &self,
        school_name: &str,
        state: Option<&str>,
    ) -> Result<Option<SchoolEnrichmentRecord>, RepositoryError> {
        let rows = self.rows.lock().expect("rows mutex poisoned");
        Ok(rows
            .values()
            .find(|row| {
                row.school_name.eq_ignore_ascii_case(school_name)
                    && state.map_or(true, |state| row.state_code.as_deref() == Some(state))
            })
            .cloned())
    }

    fn create_enrichment(
        &self,
        skeleton: &SchoolEnrichmentRecord,
    ) -> Result<SchoolId, RepositoryError> {
        let mut rows = self.rows.lock().expect("rows mutex poisoned");
        let id = SchoolId(rows.len() as i64 + 1);
        let mut row = skeleton.clone();
        row.id = Some(id);
        rows.insert(id, row);
        *self.creates.lock().expect("create counter poisoned") += 1;
        Ok(id)
    }

    fn update_enrichment(
        &self,
        id: SchoolId,
        update: &EnrichmentUpdate,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().expect("rows mutex poisoned");
        let row = rows.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        update.apply_to(row);
        self.updates
            .lock()
            .expect("updates mutex poisoned")
            .push((id, update.clone()));
        Ok(())
    }

    fn mark_validated(&self, id: SchoolId, _log: &ValidationLog) -> Result<(), RepositoryError> {
        self.validated
            .lock()
            .expect("validated mutex poisoned")
            .push(id);
        Ok(())
    }
}

/// Repository whose reads always fail but whose writes succeed.
#[derive(Default)]
pub(super) struct FlakyReadSchools {
    pub(super) inner: MemorySchools,
}

impl SchoolRepository for FlakyReadSchools {
    fn get_enrichment(
        &self,
        _school_name: &str,
        _state: Option<&str>,
    ) -> Result<Option<SchoolEnrichmentRecord>, RepositoryError> {
        Err(RepositoryError::Unavailable("read replica lagging".to_string()))
    }

    fn create_enrichment(
        &self,
        skeleton: &SchoolEnrichmentRecord,
    ) -> Result<SchoolId, RepositoryError> {
        self.inner.create_enrichment(skeleton)
    }

    fn update_enrichment(
        &self,
        id: SchoolId,
        update: &EnrichmentUpdate,
    ) -> Result<(), RepositoryError> {
        self.inner.update_enrichment(id, update)
    }
}

/// Repository that loses a race: the first read misses, and by the time the skeleton is
/// inserted another writer has already stored the row.
pub(super) struct RacingSchools {
    pub(super) inner: MemorySchools,
    pub(super) winner: SchoolId,
    reads: Mutex<u32>,
}

impl Default for RacingSchools {
    fn default() -> Self {
        let (inner, winner) = MemorySchools::seeded(SchoolEnrichmentRecord::skeleton(
            "Lincoln High",
            Some("GA"),
            None,
        ));
        Self {
            inner,
            winner,
            reads: Mutex::new(0),
        }
    }
}

impl SchoolRepository for RacingSchools {
    fn get_enrichment(
        &self,
        school_name: &str,
        state: Option<&str>,
    ) -> Result<Option<SchoolEnrichmentRecord>, RepositoryError> {
        let mut reads = self.reads.lock().expect("reads mutex poisoned");
        *reads += 1;
        if *reads == 1 {
            return Ok(None);
        }
        self.inner.get_enrichment(school_name, state)
    }

    fn create_enrichment(
        &self,
        _skeleton: &SchoolEnrichmentRecord,
    ) -> Result<SchoolId, RepositoryError> {
        Err(RepositoryError::Conflict)
    }

    fn update_enrichment(
        &self,
        id: SchoolId,
        update: &EnrichmentUpdate,
    ) -> Result<(), RepositoryError> {
        self.inner.update_enrichment(id, update)
    }
}

type EnrichFn =
    dyn Fn(&EnrichmentRequest) -> Result<EnrichmentResponse, EnrichmentError> + Send + Sync;

/// Enricher driven by a closure that records every request it receives.
pub(super) struct ScriptedEnricher {
    respond: Box<EnrichFn>,
    pub(super) requests: Mutex<Vec<EnrichmentRequest>>,
}

impl ScriptedEnricher {
    pub(super) fn new<F>(respond: F) -> Arc<Self>
    where
        F: Fn(&EnrichmentRequest) -> Result<EnrichmentResponse, EnrichmentError>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub(super) fn calls(&self) -> usize {
        self.requests.lock().expect("requests mutex poisoned").len()
    }

    pub(super) fn request(&self, index: usize) -> EnrichmentRequest {
        self.requests.lock().expect("requests mutex poisoned")[index].clone()
    }
}

impl SchoolEnricher for ScriptedEnricher {
    fn enrich(&self, request: &EnrichmentRequest) -> Result<EnrichmentResponse, EnrichmentError> {
        self.requests
            .lock()
            .expect("requests mutex poisoned")
            .push(request.clone());
        (self.respond)(request)
    }

    fn model(&self) -> Option<&str> {
        Some("school-research-test")
    }
}

pub(super) fn full_update() -> EnrichmentUpdate {
    EnrichmentUpdate {
        state_code: Some("GA".to_string()),
        total_students: Some(1_450),
        graduation_rate: Some(91.5),
        ap_course_count: Some(18),
        honors_course_count: Some(9),
        ib_program_available: Some(false),
        stem_program_available: Some(true),
        free_lunch_percentage: Some(42.0),
        opportunity_score: Some(73.0),
        confidence_score: Some(0.8),
        ..EnrichmentUpdate::default()
    }
}

pub(super) fn populated_record() -> SchoolEnrichmentRecord {
    let mut record = SchoolEnrichmentRecord::skeleton("Lincoln High", Some("GA"), None);
    full_update().apply_to(&mut record);
    record.analysis_status = AnalysisStatus::Complete;
    record
}

pub(super) fn workflow<S>(schools: Arc<S>) -> (SchoolDataWorkflow<S>, Arc<ExecutionMonitor>)
where
    S: SchoolRepository + 'static,
{
    let monitor = Arc::new(ExecutionMonitor::default());
    (SchoolDataWorkflow::new(schools, monitor.clone()), monitor)
}
