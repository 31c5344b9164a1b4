use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{ExecutionMonitor, MonitorSnapshot, StepExecution};

const DEFAULT_HISTORY_PAGE: usize = 10;

/// Read-only routes for a status dashboard polling the shared monitor.
pub fn monitor_router(monitor: Arc<ExecutionMonitor>) -> Router {
    Router::new()
        .route("/api/v1/executions", get(snapshot_handler))
        .route("/api/v1/executions/:step", get(history_handler))
        .with_state(monitor)
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub(crate) struct HistoryResponse {
    step: String,
    executions: Vec<StepExecution>,
}

pub(crate) async fn snapshot_handler(
    State(monitor): State<Arc<ExecutionMonitor>>,
) -> Json<MonitorSnapshot> {
    Json(monitor.snapshot())
}

pub(crate) async fn history_handler(
    State(monitor): State<Arc<ExecutionMonitor>>,
    Path(step): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_PAGE);
    let executions = monitor.history_for(&step, limit);
    Json(HistoryResponse { step, executions })
}
