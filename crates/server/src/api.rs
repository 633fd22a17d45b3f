//! JSON API for the refill workflow.
//!
//! Endpoints:
//! - `POST /api/v1/token`                              — exchange credentials for a bearer token
//! - `POST /api/v1/refill-requests`                    — submit a refill request (staff only)
//! - `GET  /api/v1/refill-requests?status_filter=`     — list requests visible to the caller
//! - `POST /api/v1/refill-requests/{id}/action`        — approve or refuse a pending request
//! - `GET  /api/v1/refill-requests/{id}/audit`         — approval history for one request
//!
//! This layer only translates transport payloads into engine calls and engine
//! errors into status codes; all authorization and lifecycle rules live in
//! `cashpoint-core`.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use cashpoint_core::domain::principal::Principal;
use cashpoint_core::domain::refill::{Decision, RefillRequestId, RefillStatus};
use cashpoint_core::errors::WorkflowError;
use cashpoint_core::workflow::engine::{CreateRefillRequest, WorkflowEngine};
use cashpoint_core::{ApprovalRecord, RefillRequest};
use cashpoint_db::{SqlRefillStore, UserRepository};

use crate::auth::{LoginError, SessionManager};

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<WorkflowEngine<SqlRefillStore>>,
    pub users: Arc<dyn UserRepository>,
    pub sessions: SessionManager,
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct CreateRequestBody {
    pub atm_id: String,
    pub requested_amount: Decimal,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub message: String,
    pub request_id: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListQuery {
    pub status_filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActionBody {
    pub action: String,
    pub comment: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
}

type ErrorResponse = (StatusCode, Json<ApiErrorBody>);

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/token", post(login))
        .route("/api/v1/refill-requests", post(create_request).get(list_requests))
        .route("/api/v1/refill-requests/{request_id}/action", post(act_on_request))
        .route("/api/v1/refill-requests/{request_id}/audit", get(get_audit))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn login(
    State(state): State<ApiState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ErrorResponse> {
    let token = state
        .sessions
        .login(state.users.as_ref(), &body.username, &body.password)
        .await
        .map_err(login_error_response)?;

    Ok(Json(LoginResponse { access_token: token, token_type: "bearer" }))
}

pub async fn create_request(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<CreateRequestBody>,
) -> Result<(StatusCode, Json<CreateResponse>), ErrorResponse> {
    let principal = authenticate(&state, &headers).await?;

    let created = state
        .engine
        .create(
            CreateRefillRequest {
                atm_id: body.atm_id,
                requested_amount: body.requested_amount,
                comment: body.comment,
            },
            &principal,
        )
        .await
        .map_err(workflow_error_response)?;

    info!(
        event_name = "workflow.request_created",
        request_id = %created.request_id.0,
        atm_id = %created.atm_id,
        actor = %principal.username,
        "refill request created"
    );

    Ok((
        StatusCode::CREATED,
        Json(CreateResponse {
            message: "Refill request created".to_string(),
            request_id: created.request_id.0,
        }),
    ))
}

pub async fn list_requests(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RefillRequest>>, ErrorResponse> {
    let principal = authenticate(&state, &headers).await?;
    let status_filter = parse_status_filter(query.status_filter.as_deref())?;

    let requests = state
        .engine
        .list(&principal, status_filter)
        .await
        .map_err(workflow_error_response)?;

    Ok(Json(requests))
}

pub async fn act_on_request(
    State(state): State<ApiState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ActionBody>,
) -> Result<Json<ActionResponse>, ErrorResponse> {
    let principal = authenticate(&state, &headers).await?;
    let decision = Decision::parse(&body.action).ok_or_else(|| {
        workflow_error_response(WorkflowError::InvalidAction { action: body.action.clone() })
    })?;

    let updated = state
        .engine
        .act(&RefillRequestId(request_id), decision, &principal, body.comment)
        .await
        .map_err(workflow_error_response)?;

    info!(
        event_name = "workflow.request_decided",
        request_id = %updated.request_id.0,
        status = updated.status.as_str(),
        actor = %principal.username,
        "refill request decided"
    );

    Ok(Json(ActionResponse {
        message: format!("Refill request {}", updated.status.as_str()),
    }))
}

pub async fn get_audit(
    State(state): State<ApiState>,
    Path(request_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ApprovalRecord>>, ErrorResponse> {
    let principal = authenticate(&state, &headers).await?;

    let trail = state
        .engine
        .audit_trail(&RefillRequestId(request_id), &principal)
        .await
        .map_err(workflow_error_response)?;

    Ok(Json(trail))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ")
}

async fn authenticate(
    state: &ApiState,
    headers: &HeaderMap,
) -> Result<Principal, ErrorResponse> {
    let Some(token) = bearer_token(headers) else {
        return Err(unauthenticated("missing bearer token"));
    };
    state
        .sessions
        .resolve(token)
        .await
        .map_err(|_| unauthenticated("invalid authentication credentials"))
}

fn unauthenticated(message: &str) -> ErrorResponse {
    (StatusCode::UNAUTHORIZED, Json(ApiErrorBody { error: message.to_string() }))
}

fn parse_status_filter(raw: Option<&str>) -> Result<Option<RefillStatus>, ErrorResponse> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(None),
        Some(value) => match RefillStatus::parse(value) {
            Some(status) => Ok(Some(status)),
            None => Err((
                StatusCode::BAD_REQUEST,
                Json(ApiErrorBody {
                    error: format!(
                        "unknown status filter `{value}` (expected pending|approved|refused)"
                    ),
                }),
            )),
        },
    }
}

fn login_error_response(error: LoginError) -> ErrorResponse {
    match error {
        LoginError::Auth(_) => (
            StatusCode::UNAUTHORIZED,
            Json(ApiErrorBody { error: "incorrect username or password".to_string() }),
        ),
        LoginError::Directory(message) => {
            (StatusCode::SERVICE_UNAVAILABLE, Json(ApiErrorBody { error: message }))
        }
    }
}

fn workflow_error_response(error: WorkflowError) -> ErrorResponse {
    let status = match &error {
        WorkflowError::InvalidInput(_) | WorkflowError::InvalidAction { .. } => {
            StatusCode::BAD_REQUEST
        }
        WorkflowError::Unauthorized { .. } => StatusCode::FORBIDDEN,
        WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
        WorkflowError::AlreadyProcessed { .. } => StatusCode::CONFLICT,
        WorkflowError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(ApiErrorBody { error: error.to_string() }))
}
