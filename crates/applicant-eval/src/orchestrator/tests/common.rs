use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::agents::{AgentRegistry, StepCapability, StepContext, StepError, StepOutput};
use crate::domain::{Application, ApplicationId, StepId};
use crate::monitor::ExecutionMonitor;
use crate::orchestrator::{AggregateResult, ApplicationSummary, Orchestrator};
use crate::repository::{ApplicationRepository, RepositoryError, SchoolRepository};
use crate::schools::{EnrichmentUpdate, SchoolDataWorkflow, SchoolEnrichmentRecord, SchoolId};

#[derive(Default)]
pub(super) struct MemoryApplications {
    pub(super) applications: Mutex<BTreeMap<ApplicationId, Application>>,
    pub(super) summaries: Mutex<BTreeMap<ApplicationId, (AggregateResult, ApplicationSummary)>>,
    pub(super) audit: Mutex<Vec<(ApplicationId, StepId, Option<String>)>>,
}

impl MemoryApplications {
    pub(super) fn with(application: Application) -> Self {
        let repo = Self::default();
        repo.applications
            .lock()
            .expect("applications mutex poisoned")
            .insert(application.id.clone(), application);
        repo
    }

    pub(super) fn summary(&self, id: &ApplicationId) -> Option<ApplicationSummary> {
        self.summaries
            .lock()
            .expect("summaries mutex poisoned")
            .get(id)
            .map(|(_, summary)| summary.clone())
    }

    pub(super) fn audited_steps(&self) -> Vec<String> {
        self.audit
            .lock()
            .expect("audit mutex poisoned")
            .iter()
            .map(|(_, step, _)| step.to_string())
            .collect()
    }
}

impl ApplicationRepository for MemoryApplications {
    fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        Ok(self
            .applications
            .lock()
            .expect("applications mutex poisoned")
            .get(id)
            .cloned())
    }

    fn update_application_summary(
        &self,
        id: &ApplicationId,
        aggregate: &AggregateResult,
        summary: &ApplicationSummary,
    ) -> Result<(), RepositoryError> {
        self.summaries
            .lock()
            .expect("summaries mutex poisoned")
            .insert(id.clone(), (aggregate.clone(), summary.clone()));
        Ok(())
    }

    fn append_audit(
        &self,
        id: &ApplicationId,
        step: &StepId,
        source: Option<&str>,
    ) -> Result<(), RepositoryError> {
        self.audit
            .lock()
            .expect("audit mutex poisoned")
            .push((id.clone(), step.clone(), source.map(str::to_string)));
        Ok(())
    }
}

/// Reads succeed; every write is rejected.
#[derive(Default)]
pub(super) struct ReadOnlyApplications {
    pub(super) inner: MemoryApplications,
}

impl ApplicationRepository for ReadOnlyApplications {
    fn fetch(&self, id: &ApplicationId) -> Result<Option<Application>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn update_application_summary(
        &self,
        _id: &ApplicationId,
        _aggregate: &AggregateResult,
        _summary: &ApplicationSummary,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database is read-only".to_string()))
    }

    fn append_audit(
        &self,
        _id: &ApplicationId,
        _step: &StepId,
        _source: Option<&str>,
    ) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("database is read-only".to_string()))
    }
}

#[derive(Default)]
pub(super) struct MemorySchools {
    rows: Mutex<Vec<SchoolEnrichmentRecord>>,
}

impl MemorySchools {
    pub(super) fn with(mut record: SchoolEnrichmentRecord) -> Self {
        record.id = Some(SchoolId(1));
        Self {
            rows: Mutex::new(vec![record]),
        }
    }

    pub(super) fn row_count(&self) -> usize {
        self.rows.lock().expect("rows mutex poisoned").len()
    }
}

impl SchoolRepository for MemorySchools {
    fn get_enrichment(
        &self,
        school_name: &str,
        _state: Option<&str>,
    ) -> Result<Option<SchoolEnrichmentRecord>, RepositoryError> {
        Ok(self
            .rows
            .lock()
            .expect("rows mutex poisoned")
            .iter()
            .find(|row| row.school_name == school_name)
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
        rows.push(row);
        Ok(id)
    }

    fn update_enrichment(
        &self,
        id: SchoolId,
        update: &EnrichmentUpdate,
    ) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().expect("rows mutex poisoned");
        let row = rows
            .iter_mut()
            .find(|row| row.id == Some(id))
            .ok_or(RepositoryError::NotFound)?;
        update.apply_to(row);
        Ok(())
    }
}

type RunFn = dyn Fn(&StepContext<'_>) -> Result<StepOutput, StepError> + Send + Sync;

/// Capability driven by a closure; counts how often it ran.
pub(super) struct FnCapability {
    run: Box<RunFn>,
    pub(super) calls: Mutex<u32>,
}

impl FnCapability {
    pub(super) fn new<F>(run: F) -> Arc<Self>
    where
        F: Fn(&StepContext<'_>) -> Result<StepOutput, StepError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            run: Box::new(run),
            calls: Mutex::new(0),
        })
    }

    pub(super) fn returning(data: Value) -> Arc<Self> {
        Self::new(move |_| Ok(StepOutput::new(data.clone()).with_source("fixture")))
    }

    pub(super) fn failing(message: &'static str) -> Arc<Self> {
        Self::new(move |_| Err(StepError::Model(message.to_string())))
    }

    pub(super) fn calls(&self) -> u32 {
        *self.calls.lock().expect("calls mutex poisoned")
    }
}

impl StepCapability for FnCapability {
    fn run(&self, context: &StepContext<'_>) -> Result<StepOutput, StepError> {
        *self.calls.lock().expect("calls mutex poisoned") += 1;
        (self.run)(context)
    }

    fn model(&self) -> Option<&str> {
        Some("fixture-model")
    }
}

pub(super) fn application(id: &str) -> Application {
    Application {
        id: ApplicationId(id.to_string()),
        applicant_name: "Ada Byron".to_string(),
        essay: Some("I built a weather station for my town.".to_string()),
        transcript: Some("Calculus A, Physics A-".to_string()),
        recommendation_text: None,
        school_name: Some("Lincoln High".to_string()),
        school_state: Some("GA".to_string()),
        is_training: false,
        is_test: false,
    }
}

pub(super) fn orchestrator<A>(
    registry: AgentRegistry,
    applications: Arc<A>,
    schools: Arc<MemorySchools>,
) -> Orchestrator<A, MemorySchools>
where
    A: ApplicationRepository + 'static,
{
    let monitor = Arc::new(ExecutionMonitor::default());
    let workflow = SchoolDataWorkflow::new(schools, monitor.clone());
    Orchestrator::new(Arc::new(registry), monitor, applications, Arc::new(workflow))
}

/// Orchestrator over empty in-memory stores.
pub(super) fn standalone(
    registry: AgentRegistry,
) -> Orchestrator<MemoryApplications, MemorySchools> {
    orchestrator(registry, Arc::default(), Arc::default())
}

pub(super) fn with_schools(
    registry: AgentRegistry,
    schools: Arc<MemorySchools>,
) -> Orchestrator<MemoryApplications, MemorySchools> {
    orchestrator(registry, Arc::default(), schools)
}
