use crate::cli::ServeArgs;
use crate::demo::build_pipeline;
use crate::infra::{load_school_reference, AppState};
use crate::routes::with_pipeline_routes;
use applicant_eval::config::AppConfig;
use applicant_eval::error::AppError;
use applicant_eval::telemetry;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let reference = match args.schools.take() {
        Some(path) => load_school_reference(&path)?,
        None => Vec::new(),
    };
    let pipeline = build_pipeline(&config.pipeline, reference)?;
    let app = with_pipeline_routes(pipeline)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "applicant evaluation service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
