use crate::cli::ServeArgs;
use crate::infra::{
    seed_demo_class, AppState, FsDocumentStore, InMemoryAuditSink, InMemoryGradingRepository,
};
use crate::routes::with_grading_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use scrutinio::config::AppConfig;
use scrutinio::error::AppError;
use scrutinio::telemetry;
use scrutinio::workflows::scrutinio::GradingSessionService;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;
    args.apply(&mut config);

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let repository = Arc::new(InMemoryGradingRepository::default());
    if let Err(err) = seed_demo_class(&repository) {
        warn!(error = %err, "demo class not seeded");
    }
    let documents = Arc::new(FsDocumentStore::new(config.documents.root.clone()));
    let audit = Arc::new(InMemoryAuditSink::default());
    let grading_service = Arc::new(GradingSessionService::new(
        repository,
        documents,
        audit,
        config.grading.policy(),
    ));

    let app = with_grading_routes(grading_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        documents = %config.documents.root.display(),
        "grading session service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
