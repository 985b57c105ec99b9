use crate::infra::{ApiGradingService, AppState};
use axum::extract::Path;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use axum::Json;
use scrutinio::error::AppError;
use scrutinio::workflows::scrutinio::{grading_router, ClassId, PeriodType, ProposalImporter};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Cursor;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct ProposalImportRequest {
    /// Register export with `Student,Subject,Teacher,Grade,Recovery,Debt` columns.
    pub(crate) csv: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct ProposalImportResponse {
    pub(crate) class_id: ClassId,
    pub(crate) period: PeriodType,
    pub(crate) imported: usize,
}

pub(crate) fn with_grading_routes(service: Arc<ApiGradingService>) -> axum::Router {
    grading_router(service.clone())
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
        .route(
            "/api/v1/scrutinio/:class_id/:period/proposals",
            axum::routing::post(proposal_import_endpoint),
        )
        .layer(Extension(service))
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

/// Loads proposals from a register export; refused once the session has started.
pub(crate) async fn proposal_import_endpoint(
    Extension(service): Extension<Arc<ApiGradingService>>,
    Path((class_id, period)): Path<(u32, String)>,
    Json(payload): Json<ProposalImportRequest>,
) -> Result<Response, AppError> {
    let period = match period.parse::<PeriodType>() {
        Ok(period) => period,
        Err(err) => {
            return Ok((
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response())
        }
    };

    let class_id = ClassId(class_id);
    let reader = Cursor::new(payload.csv.into_bytes());
    let proposals = ProposalImporter::from_reader(reader, class_id, period)?;
    let imported = service.import_proposals(proposals)?;

    Ok(Json(ProposalImportResponse {
        class_id,
        period,
        imported,
    })
    .into_response())
}
