use crate::capabilities::{
    EssayAnalyzer, RecommendationReader, StudentEvaluator, TranscriptParser, ESSAY_ANALYZER,
    RECOMMENDATION_READER, STUDENT_EVALUATOR, TRANSCRIPT_PARSER,
};
use crate::infra::{
    load_applications, load_school_reference, InMemoryApplicationRepository,
    InMemorySchoolRepository, ReferenceTableEnricher, SchoolReferenceRow,
};
use applicant_eval::agents::{AgentRegistry, RegistryError};
use applicant_eval::config::{AppConfig, PipelineConfig};
use applicant_eval::domain::{Application, ApplicationId};
use applicant_eval::error::AppError;
use applicant_eval::monitor::ExecutionMonitor;
use applicant_eval::orchestrator::{
    AggregateResult, Orchestrator, OrchestratorError, PlannedStep, ProgressEvent,
    SchoolContextRequirement, StepPlan,
};
use applicant_eval::schools::SchoolDataWorkflow;
use applicant_eval::telemetry;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

pub(crate) type DemoOrchestrator =
    Orchestrator<InMemoryApplicationRepository, InMemorySchoolRepository>;

#[derive(Args, Debug, Default)]
pub(crate) struct EvaluateArgs {
    /// Application CSV export. Defaults to the built-in demo applicants.
    #[arg(long)]
    pub(crate) applications: Option<PathBuf>,
    /// School reference CSV used to enrich school records. Defaults to a small built-in table.
    #[arg(long)]
    pub(crate) schools: Option<PathBuf>,
    /// Evaluate only this application
    #[arg(long)]
    pub(crate) application_id: Option<String>,
    /// Print the execution monitor snapshot after the run
    #[arg(long)]
    pub(crate) show_monitor: bool,
}

/// Everything one evaluation process shares: the monitor, the stores, and the orchestrator.
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) monitor: Arc<ExecutionMonitor>,
    pub(crate) applications: Arc<InMemoryApplicationRepository>,
    pub(crate) schools: Arc<InMemorySchoolRepository>,
    pub(crate) orchestrator: Arc<DemoOrchestrator>,
    pub(crate) plan: StepPlan,
}

pub(crate) fn default_registry() -> Result<AgentRegistry, RegistryError> {
    AgentRegistry::new()
        .with(TRANSCRIPT_PARSER, Arc::new(TranscriptParser))?
        .with(ESSAY_ANALYZER, Arc::new(EssayAnalyzer))?
        .with(RECOMMENDATION_READER, Arc::new(RecommendationReader))?
        .with(STUDENT_EVALUATOR, Arc::new(StudentEvaluator))
}

pub(crate) fn default_plan(config: &PipelineConfig) -> StepPlan {
    StepPlan::new(vec![
        PlannedStep::required(TRANSCRIPT_PARSER),
        PlannedStep::required(ESSAY_ANALYZER),
        PlannedStep::optional(RECOMMENDATION_READER),
        PlannedStep::required(STUDENT_EVALUATOR)
            .after(TRANSCRIPT_PARSER)
            .after(ESSAY_ANALYZER)
            .with_school_context(SchoolContextRequirement::Preferred),
    ])
    .with_dependency_policy(config.dependency_policy)
}

pub(crate) fn build_pipeline(
    config: &PipelineConfig,
    reference: Vec<SchoolReferenceRow>,
) -> Result<Pipeline, AppError> {
    let monitor = Arc::new(ExecutionMonitor::with_window(
        config.monitor_history,
        config.monitor_window,
    ));
    let applications = Arc::new(InMemoryApplicationRepository::default());
    let schools = Arc::new(InMemorySchoolRepository::default());
    let workflow = SchoolDataWorkflow::new(schools.clone(), monitor.clone())
        .with_enricher(Arc::new(ReferenceTableEnricher::new(reference)))
        .with_max_remediation_attempts(config.max_remediation_attempts);

    let registry = default_registry()?;
    let plan = default_plan(config);
    plan.validate(&registry)?;

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(registry),
        monitor.clone(),
        applications.clone(),
        Arc::new(workflow),
    ));

    Ok(Pipeline {
        monitor,
        applications,
        schools,
        orchestrator,
        plan,
    })
}

pub(crate) fn run_evaluate(args: EvaluateArgs) -> Result<(), AppError> {
    let EvaluateArgs {
        applications,
        schools,
        application_id,
        show_monitor,
    } = args;

    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let applications = match applications {
        Some(path) => load_applications(&path)?,
        None => demo_applications(),
    };
    let reference = match schools {
        Some(path) => load_school_reference(&path)?,
        None => demo_school_reference(),
    };

    let pipeline = build_pipeline(&config.pipeline, reference)?;
    for application in applications {
        let id = application.id.clone();
        pipeline
            .applications
            .insert(application)
            .map_err(|err| AppError::Import(format!("application {id}: {err}")))?;
    }

    let ids = match application_id {
        Some(id) => vec![ApplicationId(id)],
        None => pipeline
            .applications
            .ids()
            .map_err(|err| AppError::Import(err.to_string()))?,
    };

    println!("Applicant evaluation run ({} application(s))", ids.len());
    let progress: &dyn Fn(&ProgressEvent) = &|event| {
        println!(
            "  [{:<9}] {:<22} {}",
            event.status.label(),
            event.step,
            event.message
        );
    };

    for id in ids {
        println!("\nApplication {id}");
        let aggregate = match pipeline.orchestrator.evaluate(&id, &pipeline.plan, Some(progress)) {
            Ok(aggregate) => aggregate,
            Err(OrchestratorError::Persistence { aggregate, source }) => {
                eprintln!("  result not persisted: {source}");
                *aggregate
            }
            Err(err) => return Err(err.into()),
        };
        render_aggregate(&pipeline, &aggregate)?;
    }

    for school in pipeline.schools.records() {
        println!(
            "\nSchool {} ({}): status {:?}, opportunity {:.1}",
            school.school_name,
            school.state_code.as_deref().unwrap_or("??"),
            school.analysis_status,
            school.opportunity_score
        );
    }

    if show_monitor {
        let snapshot = serde_json::to_string_pretty(&pipeline.monitor.snapshot())
            .map_err(std::io::Error::from)?;
        println!("\nExecution monitor\n{snapshot}");
    }

    Ok(())
}

fn render_aggregate(pipeline: &Pipeline, aggregate: &AggregateResult) -> Result<(), AppError> {
    println!(
        "  overall status: {} | score: {} | recommendation: {}",
        aggregate.overall_status.label(),
        aggregate
            .top_level
            .score
            .map(|score| format!("{score:.1}"))
            .unwrap_or_else(|| "n/a".to_string()),
        aggregate
            .top_level
            .recommendation
            .as_deref()
            .unwrap_or("n/a")
    );
    if let Some(validation) = &aggregate.school_validation {
        println!(
            "  school data: {} after {} check(s)",
            if validation.is_ready() { "ready" } else { "not ready" },
            validation.validation_checks
        );
    }

    if let Some(stored) = pipeline.applications.stored(&aggregate.application_id) {
        if let (Some(_), Some(summary)) = (&stored.aggregate, &stored.summary) {
            println!(
                "  persisted aggregate and summary ({} completed step(s))",
                summary.completed_steps.len()
            );
        }
        for entry in &stored.audit {
            println!(
                "  audit: {} via {} at {}",
                entry.step,
                entry.source.as_deref().unwrap_or("unknown"),
                entry.recorded_at.format("%H:%M:%S")
            );
        }
    }

    let json = serde_json::to_string_pretty(aggregate).map_err(std::io::Error::from)?;
    println!("{json}");
    Ok(())
}

fn demo_applications() -> Vec<Application> {
    vec![
        Application {
            id: ApplicationId("demo-001".to_string()),
            applicant_name: "Maya Chen".to_string(),
            essay: Some(
                "When our town library closed I founded a weekend tutoring program in the church \
                 basement. I organized twelve volunteers, built a lending shelf from donated \
                 books, and helped forty younger students keep reading through the summer. \
                 Despite working evenings at my family's restaurant I kept the program running \
                 for two years."
                    .to_string(),
            ),
            transcript: Some(
                "AP Calculus A, AP Biology A-, Honors English A, Spanish III B+, US History A"
                    .to_string(),
            ),
            recommendation_text: Some(
                "Maya is an exceptional student and a remarkable leader. I highly recommend her."
                    .to_string(),
            ),
            school_name: Some("Rural Valley High".to_string()),
            school_state: Some("MT".to_string()),
            is_training: false,
            is_test: false,
        },
        Application {
            id: ApplicationId("demo-002".to_string()),
            applicant_name: "Jordan Ellis".to_string(),
            essay: Some("I like computers and want to study them.".to_string()),
            transcript: Some("Algebra II B-, Chemistry C+, English B, Art A".to_string()),
            recommendation_text: None,
            school_name: Some("Lincoln High".to_string()),
            school_state: Some("GA".to_string()),
            is_training: false,
            is_test: false,
        },
        Application {
            id: ApplicationId("demo-003".to_string()),
            applicant_name: "Sam Ortiz".to_string(),
            essay: Some("My robotics team designed a prototype water filter.".to_string()),
            transcript: Some("see attached scan".to_string()),
            recommendation_text: None,
            school_name: Some("Harbor Point Academy".to_string()),
            school_state: Some("ME".to_string()),
            is_training: false,
            is_test: true,
        },
    ]
}

fn demo_school_reference() -> Vec<SchoolReferenceRow> {
    let row = |name: &str, state: &str, students, graduation, ap, honors, lunch, opportunity| {
        SchoolReferenceRow {
            school_name: name.to_string(),
            state_code: Some(state.to_string()),
            school_district: None,
            nces_id: None,
            total_students: Some(students),
            graduation_rate: Some(graduation),
            ap_course_count: ap,
            honors_course_count: Some(honors),
            ib_program_available: Some(false),
            stem_program_available: None,
            free_lunch_percentage: Some(lunch),
            opportunity_score: Some(opportunity),
        }
    };

    vec![
        row("Lincoln High", "GA", 1450, 91.5, Some(18), 9, 42.0, 73.0),
        row("Rural Valley High", "MT", 210, 84.0, Some(2), 3, 61.0, 38.0),
    ]
}
