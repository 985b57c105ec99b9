use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;

use super::domain::{Actor, ClassId, PeriodType, SessionState};
use super::machine::TransitionPayload;
use super::repository::{AuditSink, DocumentStore, GradingRepository, RepositoryError};
use super::service::{GradingSessionService, SessionServiceError, TransitionCommand};

/// Router exposing session inspection, transitions and minutes edits.
pub fn grading_router<R, D, A>(service: Arc<GradingSessionService<R, D, A>>) -> Router
where
    R: GradingRepository + 'static,
    D: DocumentStore + 'static,
    A: AuditSink + 'static,
{
    Router::new()
        .route(
            "/api/v1/scrutinio/:class_id/:period",
            get(session_handler::<R, D, A>),
        )
        .route(
            "/api/v1/scrutinio/:class_id/:period/transition",
            post(transition_handler::<R, D, A>),
        )
        .route(
            "/api/v1/scrutinio/:class_id/:period/minutes/:step",
            post(argument_handler::<R, D, A>),
        )
        .with_state(service)
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransitionBody {
    pub(crate) from: SessionState,
    pub(crate) to: SessionState,
    pub(crate) actor: Actor,
    #[serde(default)]
    pub(crate) payload: TransitionPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArgumentBody {
    pub(crate) actor: Actor,
    #[serde(default)]
    pub(crate) text: String,
}

pub(crate) async fn session_handler<R, D, A>(
    State(service): State<Arc<GradingSessionService<R, D, A>>>,
    Path((class_id, period)): Path<(u32, String)>,
) -> Response
where
    R: GradingRepository + 'static,
    D: DocumentStore + 'static,
    A: AuditSink + 'static,
{
    let period = match parse_period(&period) {
        Ok(period) => period,
        Err(response) => return response,
    };
    let class_id = ClassId(class_id);

    let session = match service.session(class_id, period) {
        Ok(session) => session,
        Err(error) => return error_response(error),
    };
    let transitions = match service.available_transitions(class_id, period) {
        Ok(transitions) => transitions,
        Err(error) => return error_response(error),
    };
    let state = session
        .as_ref()
        .map(|session| session.state)
        .unwrap_or(SessionState::NotStarted);

    let payload = json!({
        "class_id": class_id,
        "period": period,
        "state": state,
        "transitions": transitions,
        "session": session,
    });
    (StatusCode::OK, axum::Json(payload)).into_response()
}

pub(crate) async fn transition_handler<R, D, A>(
    State(service): State<Arc<GradingSessionService<R, D, A>>>,
    Path((class_id, period)): Path<(u32, String)>,
    axum::Json(body): axum::Json<TransitionBody>,
) -> Response
where
    R: GradingRepository + 'static,
    D: DocumentStore + 'static,
    A: AuditSink + 'static,
{
    let period = match parse_period(&period) {
        Ok(period) => period,
        Err(response) => return response,
    };
    let command = TransitionCommand {
        class_id: ClassId(class_id),
        period,
        from: body.from,
        to: body.to,
        actor: body.actor,
        payload: body.payload,
    };

    match service.transition(command) {
        Ok(report) if !report.applied && !report.messages.is_empty() => {
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(report)).into_response()
        }
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn argument_handler<R, D, A>(
    State(service): State<Arc<GradingSessionService<R, D, A>>>,
    Path((class_id, period, step)): Path<(u32, String, u8)>,
    axum::Json(body): axum::Json<ArgumentBody>,
) -> Response
where
    R: GradingRepository + 'static,
    D: DocumentStore + 'static,
    A: AuditSink + 'static,
{
    let period = match parse_period(&period) {
        Ok(period) => period,
        Err(response) => return response,
    };

    match service.record_argument(ClassId(class_id), period, step, &body.text, &body.actor) {
        Ok(report) if !report.validated => {
            (StatusCode::UNPROCESSABLE_ENTITY, axum::Json(report)).into_response()
        }
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(error) => error_response(error),
    }
}

fn parse_period(value: &str) -> Result<PeriodType, Response> {
    value.parse::<PeriodType>().map_err(|error| {
        let payload = json!({ "error": error.to_string() });
        (StatusCode::BAD_REQUEST, axum::Json(payload)).into_response()
    })
}

fn error_response(error: SessionServiceError) -> Response {
    let payload = json!({ "error": error.to_string() });
    (status_for(&error), axum::Json(payload)).into_response()
}

pub(crate) fn status_for(error: &SessionServiceError) -> StatusCode {
    match error {
        SessionServiceError::UnknownClass(_)
        | SessionServiceError::SessionNotFound { .. }
        | SessionServiceError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
        SessionServiceError::NotEditable(_)
        | SessionServiceError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
        SessionServiceError::UnknownStudent(_)
        | SessionServiceError::UnknownSubject(_)
        | SessionServiceError::NotAdmitted(_)
        | SessionServiceError::ReservedVerdict(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionServiceError::Repository(RepositoryError::Unavailable(_))
        | SessionServiceError::Document(_)
        | SessionServiceError::Audit(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
