//! REST endpoints for driving and inspecting onboarding sessions.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use super::orchestrator::{Orchestrator, StartRequest};
use super::session::{SessionScope, SessionStatus};
use crate::error::OrchestratorError;

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub orchestrator: Arc<Orchestrator>,
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            OrchestratorError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            OrchestratorError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "session_not_found"),
            OrchestratorError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
            OrchestratorError::DuplicateThreadId(_) => (StatusCode::CONFLICT, "duplicate_thread_id"),
            OrchestratorError::ConcurrentModification(_) => {
                (StatusCode::CONFLICT, "concurrent_modification")
            }
            OrchestratorError::SessionExpired(_) => (StatusCode::GONE, "session_expired"),
            OrchestratorError::Database(e) => {
                tracing::error!(error = %e, "Database error while serving onboarding request");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        (
            status,
            Json(serde_json::json!({ "error": self.to_string(), "code": code })),
        )
            .into_response()
    }
}

impl From<JsonRejection> for OrchestratorError {
    fn from(rejection: JsonRejection) -> Self {
        OrchestratorError::InvalidInput(rejection.body_text())
    }
}

impl From<QueryRejection> for OrchestratorError {
    fn from(rejection: QueryRejection) -> Self {
        OrchestratorError::InvalidInput(rejection.body_text())
    }
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApprovalBody {
    approved: bool,
    #[serde(default)]
    notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    location_id: Option<String>,
    agency_id: Option<String>,
    status: Option<String>,
    limit: Option<usize>,
}

/// POST /api/onboarding/sessions
async fn start_session(
    State(state): State<OnboardingRouteState>,
    body: Result<Json<StartRequest>, JsonRejection>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let Json(body) = body?;
    let turn = state.orchestrator.start(body).await?;
    Ok((StatusCode::CREATED, Json(turn)))
}

/// POST /api/onboarding/sessions/{thread_id}/messages
async fn post_message(
    State(state): State<OnboardingRouteState>,
    Path(thread_id): Path<String>,
    body: Result<Json<MessageBody>, JsonRejection>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let Json(body) = body?;
    let turn = state
        .orchestrator
        .resume_with_message(&thread_id, &body.message)
        .await?;
    Ok(Json(turn))
}

/// POST /api/onboarding/sessions/{thread_id}/approval
async fn post_approval(
    State(state): State<OnboardingRouteState>,
    Path(thread_id): Path<String>,
    body: Result<Json<ApprovalBody>, JsonRejection>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let Json(body) = body?;
    let turn = state
        .orchestrator
        .resume_with_approval(&thread_id, body.approved, body.notes)
        .await?;
    Ok(Json(turn))
}

/// GET /api/onboarding/sessions/{thread_id}
async fn get_session(
    State(state): State<OnboardingRouteState>,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, OrchestratorError> {
    Ok(Json(state.orchestrator.inspect(&thread_id).await?))
}

/// GET /api/onboarding/sessions?location_id=..|agency_id=..&status=..&limit=..
async fn list_sessions(
    State(state): State<OnboardingRouteState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, OrchestratorError> {
    let Query(query) = query?;
    let scope = match (query.location_id, query.agency_id) {
        (Some(location), None) => SessionScope::Location(location),
        (None, Some(agency)) => SessionScope::Agency(agency),
        _ => {
            return Err(OrchestratorError::InvalidInput(
                "exactly one of location_id or agency_id is required".to_string(),
            ));
        }
    };
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(OrchestratorError::InvalidInput)?;

    let sessions = state.orchestrator.list(&scope, status, query.limit).await?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

/// POST /api/onboarding/sessions/{thread_id}/complete
async fn complete_session(
    State(state): State<OnboardingRouteState>,
    Path(thread_id): Path<String>,
) -> Result<impl IntoResponse, OrchestratorError> {
    Ok(Json(state.orchestrator.mark_completed(&thread_id).await?))
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/onboarding/sessions",
            post(start_session).get(list_sessions),
        )
        .route("/api/onboarding/sessions/{thread_id}", get(get_session))
        .route(
            "/api/onboarding/sessions/{thread_id}/messages",
            post(post_message),
        )
        .route(
            "/api/onboarding/sessions/{thread_id}/approval",
            post(post_approval),
        )
        .route(
            "/api/onboarding/sessions/{thread_id}/complete",
            post(complete_session),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
