use crate::demo::Pipeline;
use crate::infra::AppState;
use applicant_eval::domain::Application;
use applicant_eval::error::AppError;
use applicant_eval::monitor::monitor_router;
use applicant_eval::orchestrator::AggregateResult;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde_json::json;
use tracing::info;

pub(crate) fn with_pipeline_routes(pipeline: Pipeline) -> Router {
    let evaluations = Router::new()
        .route("/api/v1/evaluations", post(evaluate_endpoint))
        .with_state(pipeline.clone());

    monitor_router(pipeline.monitor.clone())
        .merge(evaluations)
        .route("/health", get(healthcheck))
        .route("/ready", get(readiness_endpoint))
        .route("/metrics", get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

/// Store the submitted application and run the default plan against it. Capabilities block,
/// so the run happens on the blocking pool.
pub(crate) async fn evaluate_endpoint(
    State(pipeline): State<Pipeline>,
    Json(application): Json<Application>,
) -> Result<Json<AggregateResult>, AppError> {
    let id = application.id.clone();
    pipeline
        .applications
        .upsert(application)
        .map_err(|err| AppError::Import(err.to_string()))?;

    let aggregate = tokio::task::spawn_blocking(move || {
        pipeline.orchestrator.evaluate(&id, &pipeline.plan, None)
    })
    .await
    .map_err(|err| AppError::Io(std::io::Error::other(err)))??;

    info!(
        application = %aggregate.application_id,
        status = aggregate.overall_status.label(),
        "evaluation served"
    );
    Ok(Json(aggregate))
}
