use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use super::aggregate::{AggregateResult, ApplicationSummary, StepRecord};
use super::plan::{DependencyPolicy, PlannedStep, SchoolContextRequirement, StepPlan};
use super::summary::synthesize_summary;
use crate::agents::{AgentRegistry, StepContext, StepOutput};
use crate::domain::{Application, ApplicationId, StepId};
use crate::monitor::{ExecutionMonitor, ExecutionStatus};
use crate::repository::{ApplicationRepository, RepositoryError, SchoolRepository};
use crate::schools::{SchoolContext, SchoolDataWorkflow};

/// Pushed to the caller's callback after every step transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub application_id: ApplicationId,
    pub step: StepId,
    pub status: ExecutionStatus,
    pub message: String,
}

pub type ProgressCallback<'a> = &'a dyn Fn(&ProgressEvent);

/// Runs a step plan against one application and persists the aggregate.
pub struct Orchestrator<A, S> {
    registry: Arc<AgentRegistry>,
    monitor: Arc<ExecutionMonitor>,
    applications: Arc<A>,
    schools: Arc<SchoolDataWorkflow<S>>,
}

impl<A, S> Orchestrator<A, S>
where
    A: ApplicationRepository + 'static,
    S: SchoolRepository + 'static,
{
    pub fn new(
        registry: Arc<AgentRegistry>,
        monitor: Arc<ExecutionMonitor>,
        applications: Arc<A>,
        schools: Arc<SchoolDataWorkflow<S>>,
    ) -> Self {
        Self {
            registry,
            monitor,
            applications,
            schools,
        }
    }

    pub fn monitor(&self) -> &Arc<ExecutionMonitor> {
        &self.monitor
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Fetch the application and run the plan against it.
    pub fn evaluate(
        &self,
        application_id: &ApplicationId,
        plan: &StepPlan,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<AggregateResult, OrchestratorError> {
        let application = self
            .applications
            .fetch(application_id)?
            .ok_or_else(|| OrchestratorError::NotFound(application_id.clone()))?;
        self.run(&application, plan, progress)
    }

    /// Execute every planned step in order, then write the aggregate once. Step failures
    /// never abort the run; only the final write can fail, and that error still carries
    /// the aggregate.
    pub fn run(
        &self,
        application: &Application,
        plan: &StepPlan,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<AggregateResult, OrchestratorError> {
        let mut run = RunState {
            application,
            progress,
            started_at: Utc::now(),
            records: BTreeMap::new(),
            outputs: BTreeMap::new(),
            school: None,
        };

        for step in plan.steps() {
            let record = self.run_step(&mut run, step, plan.dependency_policy());
            run.records.insert(step.id.clone(), record);
        }

        let school_validation = run.school.as_ref().and_then(|school| school.log.clone());
        let aggregate = AggregateResult::assemble(
            application.id.clone(),
            plan,
            run.records,
            school_validation,
            run.started_at,
        );
        let summary = ApplicationSummary::from(&aggregate);

        if let Err(source) =
            self.applications
                .update_application_summary(&application.id, &aggregate, &summary)
        {
            warn!(application = %application.id, error = %source, "failed to persist evaluation");
            return Err(OrchestratorError::Persistence {
                aggregate: Box::new(aggregate),
                source,
            });
        }

        info!(
            application = %application.id,
            status = aggregate.overall_status.label(),
            completed = aggregate.metadata.completed.len(),
            scheduled = aggregate.metadata.scheduled.len(),
            "evaluation persisted"
        );
        Ok(aggregate)
    }

    fn run_step(
        &self,
        run: &mut RunState<'_>,
        step: &PlannedStep,
        policy: DependencyPolicy,
    ) -> StepRecord {
        let key = format!("{}:{}", run.application.id, step.id);

        if policy == DependencyPolicy::SkipDependents {
            let missing: Vec<&str> = step
                .prerequisites
                .iter()
                .filter(|prerequisite| !run.outputs.contains_key(*prerequisite))
                .map(StepId::as_str)
                .collect();
            if !missing.is_empty() {
                let reason = format!("missing prerequisite output: {}", missing.join(", "));
                return self.close_without_running(run, step, &key, ExecutionStatus::Skipped, reason);
            }
        }

        let Some(capability) = self.registry.get(&step.id) else {
            let reason = format!("no capability registered for step '{}'", step.id);
            return self.close_without_running(run, step, &key, ExecutionStatus::Failed, reason);
        };

        if step.school_context != SchoolContextRequirement::None {
            let school = self.school_context(run);
            if step.school_context == SchoolContextRequirement::Required && !school.ready {
                let reason = format!("school context not ready: {}", school_reason(school));
                return self.close_without_running(run, step, &key, ExecutionStatus::Skipped, reason);
            }
        }

        let school = match step.school_context {
            SchoolContextRequirement::None => None,
            _ => run.school.as_ref(),
        };
        let context = StepContext {
            application: run.application,
            prior_outputs: &run.outputs,
            school,
        };

        self.monitor.start(
            &key,
            capability.model(),
            Some(run.application.text_size()),
        );
        run.emit(step, ExecutionStatus::Running, "step started".to_string());

        let outcome = capability
            .run(&context)
            .map_err(|error| error.to_string())
            .and_then(|output| match output.error_message() {
                Some(message) => Err(message),
                None => Ok(output),
            });

        match outcome {
            Ok(output) => self.complete_step(run, step, &key, output),
            Err(message) => {
                let execution =
                    self.monitor
                        .end(&key, ExecutionStatus::Failed, Some(message.clone()), None);
                warn!(
                    application = %run.application.id,
                    step = %step.id,
                    required = step.is_required(),
                    error = %message,
                    "step failed"
                );
                run.emit(step, ExecutionStatus::Failed, message.clone());
                StepRecord {
                    duration_ms: execution.duration_ms,
                    ..StepRecord::unfinished(step.requirement, ExecutionStatus::Failed, message)
                }
            }
        }
    }

    fn complete_step(
        &self,
        run: &mut RunState<'_>,
        step: &PlannedStep,
        key: &str,
        output: StepOutput,
    ) -> StepRecord {
        let execution = self.monitor.end(
            key,
            ExecutionStatus::Completed,
            None,
            Some(output.size()),
        );

        if let Err(error) =
            self.applications
                .append_audit(&run.application.id, &step.id, output.source.as_deref())
        {
            warn!(application = %run.application.id, step = %step.id, %error, "audit append failed");
        }

        let human_summary = output
            .human_summary
            .clone()
            .filter(|summary| !summary.trim().is_empty())
            .or_else(|| synthesize_summary(&output.data));

        run.outputs.insert(step.id.clone(), output.data.clone());
        run.emit(
            step,
            ExecutionStatus::Completed,
            human_summary
                .clone()
                .unwrap_or_else(|| "step completed".to_string()),
        );

        StepRecord {
            status: ExecutionStatus::Completed,
            requirement: step.requirement,
            output: Some(output.data),
            human_summary,
            error: None,
            duration_ms: execution.duration_ms,
        }
    }

    /// Record a step that never reached its capability (skipped or unregistered).
    fn close_without_running(
        &self,
        run: &RunState<'_>,
        step: &PlannedStep,
        key: &str,
        status: ExecutionStatus,
        reason: String,
    ) -> StepRecord {
        self.monitor.end(key, status, Some(reason.clone()), None);
        warn!(
            application = %run.application.id,
            step = %step.id,
            status = status.label(),
            %reason,
            "step did not run"
        );
        run.emit(step, status, reason.clone());
        StepRecord::unfinished(step.requirement, status, reason)
    }

    /// School context for the run, prepared once on first use.
    fn school_context<'r>(&self, run: &'r mut RunState<'_>) -> &'r SchoolContext {
        let application = run.application;
        run.school.get_or_insert_with(|| match application.school() {
            Some((name, state)) => self.schools.prepare_context(&application.id.0, name, state),
            None => SchoolContext {
                record: None,
                ready: false,
                log: None,
                error: Some("application does not reference a school".to_string()),
            },
        })
    }
}

fn school_reason(school: &SchoolContext) -> String {
    if let Some(error) = &school.error {
        return error.clone();
    }
    match &school.log {
        Some(log) => {
            let missing: Vec<&str> = log.remaining_missing().iter().map(|field| field.key()).collect();
            format!("missing {}", missing.join(", "))
        }
        None => "school record unavailable".to_string(),
    }
}

struct RunState<'a> {
    application: &'a Application,
    progress: Option<ProgressCallback<'a>>,
    started_at: chrono::DateTime<Utc>,
    records: BTreeMap<StepId, StepRecord>,
    outputs: BTreeMap<StepId, Value>,
    school: Option<SchoolContext>,
}

impl RunState<'_> {
    fn emit(&self, step: &PlannedStep, status: ExecutionStatus, message: String) {
        if let Some(callback) = self.progress {
            callback(&ProgressEvent {
                application_id: self.application.id.clone(),
                step: step.id.clone(),
                status,
                message,
            });
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("application {0} not found")]
    NotFound(ApplicationId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("failed to persist evaluation for application {}: {source}", .aggregate.application_id)]
    Persistence {
        aggregate: Box<AggregateResult>,
        source: RepositoryError,
    },
}

impl OrchestratorError {
    /// The aggregate that was computed before the write failed, if any.
    pub fn aggregate(&self) -> Option<&AggregateResult> {
        match self {
            OrchestratorError::Persistence { aggregate, .. } => Some(aggregate),
            _ => None,
        }
    }
}
