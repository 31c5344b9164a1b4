use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use super::common::*;
use crate::monitor::ExecutionStatus;
use crate::schools::{
    AnalysisStatus, EnrichmentError, EnrichmentResponse, EnrichmentUpdate, Readiness,
    SchoolEnrichmentRecord, SchoolField, SchoolWorkflowError,
};

#[test]
fn get_or_create_inserts_pending_skeleton_once() {
    let schools = Arc::new(MemorySchools::default());
    let (workflow, _) = workflow(schools.clone());

    let created = workflow
        .get_or_create("Lincoln High", Some("GA"), Some("Fulton"))
        .expect("skeleton created");
    assert_eq!(created.analysis_status, AnalysisStatus::Pending);
    assert!(created.needs_enrichment());
    assert!(created.id.is_some());

    let again = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("existing row returned");
    assert_eq!(again.id, created.id);
    assert_eq!(schools.creates(), 1);
    assert_eq!(schools.row_count(), 1);
}

#[test]
fn concurrent_skeleton_insert_reuses_the_stored_row() {
    let schools = Arc::new(RacingSchools::default());
    let (workflow, _) = workflow(schools.clone());

    let record = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("conflict resolves to the existing row");

    assert_eq!(record.id, Some(schools.winner));
    assert_eq!(record.school_name, "Lincoln High");
    assert_eq!(schools.inner.row_count(), 1);

    let context = workflow.prepare_context("app-1", "Lincoln High", Some("GA"));
    assert!(context.error.is_none());
    assert_eq!(context.record.and_then(|record| record.id), Some(schools.winner));
}

#[test]
fn lookup_failure_falls_back_to_skeleton_creation() {
    let schools = Arc::new(FlakyReadSchools::default());
    let (workflow, _) = workflow(schools.clone());

    assert!(workflow.lookup("Lincoln High", Some("GA")).is_none());
    let record = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("fails open to create");
    assert_eq!(record.analysis_status, AnalysisStatus::Pending);
    assert_eq!(schools.inner.creates(), 1);
}

#[test]
fn populated_record_is_returned_without_enrichment_call() {
    let (schools, id) = MemorySchools::seeded(populated_record());
    let schools = Arc::new(schools);
    let enricher = ScriptedEnricher::new(|_| Ok(EnrichmentResponse::complete(full_update())));
    let (workflow, monitor) = workflow(schools.clone());
    let workflow = workflow.with_enricher(enricher.clone());

    let record = workflow
        .ensure_enriched("app-1", "Lincoln High", Some("GA"))
        .expect("cached record returned");

    assert_eq!(record.id, Some(id));
    assert_eq!(enricher.calls(), 0);
    assert_eq!(monitor.snapshot().total_calls, 0);
}

#[test]
fn enrichment_updates_existing_row_in_place() {
    let schools = Arc::new(MemorySchools::default());
    let enricher = ScriptedEnricher::new(|_| Ok(EnrichmentResponse::complete(full_update())));
    let (workflow, monitor) = workflow(schools.clone());
    let workflow = workflow.with_enricher(enricher.clone());

    let skeleton = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("skeleton");
    let id = skeleton.id.expect("skeleton has id");
    let enriched = workflow.enrich("app-1", skeleton).expect("enrichment succeeds");

    assert_eq!(enriched.analysis_status, AnalysisStatus::Complete);
    assert!(!enriched.needs_enrichment());
    assert_eq!(schools.row_count(), 1);
    assert_eq!(schools.row(id).analysis_status, AnalysisStatus::Complete);
    assert_eq!(schools.row(id).ap_course_count, 18);
    assert!(enricher.request(0).focus.is_empty());

    let history = monitor.history_for("app-1:school_enrichment:Lincoln High", 5);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ExecutionStatus::Completed);
    assert_eq!(history[0].model.as_deref(), Some("school-research-test"));
}

#[test]
fn enrichment_failure_marks_row_failed_and_propagates() {
    let schools = Arc::new(MemorySchools::default());
    let enricher = ScriptedEnricher::new(|_| {
        Err(EnrichmentError::Unavailable("rate limited".to_string()))
    });
    let (workflow, monitor) = workflow(schools.clone());
    let workflow = workflow.with_enricher(enricher);

    let skeleton = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("skeleton");
    let id = skeleton.id.expect("id");

    match workflow.enrich("app-1", skeleton) {
        Err(SchoolWorkflowError::Enrichment(EnrichmentError::Unavailable(_))) => {}
        other => panic!("expected enrichment error, got {other:?}"),
    }
    assert_eq!(schools.row(id).analysis_status, AnalysisStatus::Failed);
    assert_eq!(monitor.snapshot().total_errors, 1);
}

#[test]
fn complete_response_without_core_data_is_not_marked_complete() {
    let schools = Arc::new(MemorySchools::default());
    let enricher = ScriptedEnricher::new(|_| {
        Ok(EnrichmentResponse::complete(EnrichmentUpdate {
            ap_course_count: Some(3),
            ..EnrichmentUpdate::default()
        }))
    });
    let (workflow, _) = workflow(schools.clone());
    let workflow = workflow.with_enricher(enricher);

    let skeleton = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("skeleton");
    let id = skeleton.id.expect("id");

    assert!(matches!(
        workflow.enrich("app-1", skeleton),
        Err(SchoolWorkflowError::Enrichment(EnrichmentError::EmptyResult))
    ));
    let row = schools.row(id);
    assert_ne!(row.analysis_status, AnalysisStatus::Complete);
    assert!(row.needs_enrichment());
}

#[test]
fn valid_record_needs_no_remediation() {
    let (schools, id) = MemorySchools::seeded(populated_record());
    let schools = Arc::new(schools);
    let enricher = ScriptedEnricher::new(|_| Ok(EnrichmentResponse::complete(full_update())));
    let (workflow, _) = workflow(schools.clone());
    let workflow = workflow.with_enricher(enricher.clone());

    let outcome = workflow.validate_and_remediate("app-1", schools.row(id));

    assert!(outcome.is_ready());
    assert_eq!(outcome.log.validation_checks, 1);
    assert!(outcome.log.attempts.is_empty());
    assert_eq!(enricher.calls(), 0);
    assert_eq!(
        *schools.validated.lock().expect("validated mutex poisoned"),
        vec![id]
    );
}

#[test]
fn remediation_stops_after_budget_when_enricher_never_succeeds() {
    let schools = Arc::new(MemorySchools::default());
    let enricher = ScriptedEnricher::new(|_| {
        Err(EnrichmentError::Unavailable("backend down".to_string()))
    });
    let (workflow, _) = workflow(schools.clone());
    let workflow = workflow
        .with_enricher(enricher.clone())
        .with_max_remediation_attempts(2);

    let skeleton = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("skeleton");
    let outcome = workflow.validate_and_remediate("app-1", skeleton);

    assert!(!outcome.is_ready());
    assert_eq!(enricher.calls(), 2);
    assert_eq!(outcome.log.attempts.len(), 2);
    assert!(!outcome.log.remaining_missing().is_empty());
    assert!(outcome
        .log
        .attempts
        .iter()
        .all(|attempt| !attempt.remediation_applied && attempt.error.is_some()));
    assert!(schools
        .validated
        .lock()
        .expect("validated mutex poisoned")
        .is_empty());
}

#[test]
fn remediation_succeeds_on_first_attempt() {
    let schools = Arc::new(MemorySchools::default());
    let enricher = ScriptedEnricher::new(|_| Ok(EnrichmentResponse::complete(full_update())));
    let (workflow, monitor) = workflow(schools.clone());
    let workflow = workflow.with_enricher(enricher.clone());

    let skeleton = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("skeleton");
    let id = skeleton.id.expect("id");
    let outcome = workflow.validate_and_remediate("app-1", skeleton);

    assert!(outcome.is_ready());
    assert_eq!(outcome.log.validation_checks, 2);
    assert_eq!(outcome.log.attempts.len(), 1);
    assert!(outcome.log.attempts[0].remediation_applied);
    assert!(outcome.log.attempts[0].missing_after.is_empty());
    assert_eq!(outcome.record.analysis_status, AnalysisStatus::Complete);
    assert_eq!(schools.row(id).opportunity_score, 73.0);
    assert_eq!(schools.row_count(), 1);

    let focus = enricher.request(0).focus;
    assert!(focus.contains(&SchoolField::OpportunityScore));
    assert!(!focus.contains(&SchoolField::SchoolName));
    assert_eq!(
        monitor
            .history_for("app-1:school_remediation:Lincoln High:attempt-1", 1)
            .len(),
        1
    );
}

#[test]
fn remediation_requests_only_fields_still_missing() {
    let schools = Arc::new(MemorySchools::default());
    let enricher = ScriptedEnricher::new(|request| {
        if request.focus.contains(&SchoolField::OpportunityScore) && request.focus.len() > 1 {
            Ok(EnrichmentResponse::complete(EnrichmentUpdate {
                opportunity_score: Some(64.0),
                graduation_rate: Some(88.0),
                ap_course_count: Some(6),
                ..EnrichmentUpdate::default()
            }))
        } else {
            Ok(EnrichmentResponse::complete(full_update()))
        }
    });
    let (workflow, _) = workflow(schools.clone());
    let workflow = workflow.with_enricher(enricher.clone());

    let skeleton = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("skeleton");
    let outcome = workflow.validate_and_remediate("app-1", skeleton);

    assert!(outcome.is_ready());
    assert_eq!(outcome.log.attempts.len(), 2);
    assert_eq!(
        enricher.request(1).focus,
        vec![SchoolField::HonorsCourseCount, SchoolField::FreeLunchPercentage]
    );
    assert_eq!(outcome.log.attempts[0].missing_after.len(), 2);
}

#[test]
fn remediation_without_enricher_reports_reason() {
    let schools = Arc::new(MemorySchools::default());
    let (workflow, _) = workflow(schools);

    let outcome = workflow.validate_and_remediate(
        "app-1",
        SchoolEnrichmentRecord::skeleton("Lincoln High", None, None),
    );

    match &outcome.log.readiness {
        Readiness::NotReady { missing, reason } => {
            assert!(missing.contains(&SchoolField::StateCode));
            assert!(reason.contains("no enrichment collaborator"));
        }
        Readiness::Ready => panic!("skeleton cannot be ready"),
    }
    assert!(outcome.log.attempts.is_empty());
}

#[test]
fn prepare_context_runs_full_pipeline() {
    let schools = Arc::new(MemorySchools::default());
    let enricher = ScriptedEnricher::new(|_| Ok(EnrichmentResponse::complete(full_update())));
    let (workflow, _) = workflow(schools.clone());
    let workflow = workflow.with_enricher(enricher.clone());

    let context = workflow.prepare_context("app-1", "Lincoln High", Some("GA"));

    assert!(context.ready);
    assert!(context.error.is_none());
    let record = context.record.expect("record attached");
    assert_eq!(record.analysis_status, AnalysisStatus::Complete);
    assert_eq!(enricher.calls(), 1);
    assert_eq!(context.log.expect("log attached").validation_checks, 1);
}

#[test]
fn prepare_context_reports_enrichment_failure() {
    let schools = Arc::new(MemorySchools::default());
    let enricher = ScriptedEnricher::new(|_| Ok(EnrichmentResponse::failed("no web results")));
    let (workflow, _) = workflow(schools);
    let workflow = workflow.with_enricher(enricher);

    let context = workflow.prepare_context("app-1", "Lincoln High", Some("GA"));

    assert!(!context.ready);
    let error = context.error.expect("error surfaced");
    assert!(error.contains("no web results"));
    assert_eq!(
        context.record.expect("best-effort record").analysis_status,
        AnalysisStatus::Failed
    );
}

#[test]
fn concurrent_enrichments_of_one_school_keep_their_own_timing() {
    let schools = Arc::new(MemorySchools::default());
    let barrier = Arc::new(Barrier::new(2));
    let gate = barrier.clone();
    let enricher = ScriptedEnricher::new(move |_| {
        gate.wait();
        thread::sleep(Duration::from_millis(40));
        Ok(EnrichmentResponse::complete(full_update()))
    });
    let (workflow, monitor) = workflow(schools.clone());
    let workflow = Arc::new(workflow.with_enricher(enricher));

    let skeleton = workflow
        .get_or_create("Lincoln High", Some("GA"), None)
        .expect("skeleton");
    let handles: Vec<_> = ["app-1", "app-2"]
        .into_iter()
        .map(|scope| {
            let workflow = workflow.clone();
            let record = skeleton.clone();
            thread::spawn(move || workflow.enrich(scope, record))
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .expect("enrichment thread panicked")
            .expect("enrichment succeeds");
    }

    for scope in ["app-1", "app-2"] {
        let history = monitor.history_for(&format!("{scope}:school_enrichment:Lincoln High"), 5);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, ExecutionStatus::Completed);
        assert!(history[0].duration_ms.is_some_and(|duration| duration >= 40));
    }
    assert_eq!(monitor.running_count(), 0);
}
