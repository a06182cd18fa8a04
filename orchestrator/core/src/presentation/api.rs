// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # A2A HTTP API
//!
//! Thin axum routes over [`TaskService`]:
//!
//! | Method | Path                        | Use case            |
//! |--------|-----------------------------|---------------------|
//! | GET    | `/health`                   | liveness, pool stats |
//! | POST   | `/a2a/send-message`         | accept a delegation |
//! | GET    | `/a2a/tasks`                | list with filters   |
//! | GET    | `/a2a/tasks/{id}`           | fetch one task      |
//! | POST   | `/a2a/tasks/{id}/cancel`    | cancel (idempotent) |
//! | PATCH  | `/a2a/tasks/{id}/state`     | report a transition |
//!
//! Every `/a2a` route requires `Authorization: Bearer <token>` when a token is
//! configured. Errors are returned as
//! `{"error": {"kind": ..., "message": ..., "field": ...}}`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, RawQuery, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::application::task_service::{TaskService, TaskServiceError};
use crate::domain::repository::RepositoryError;
use crate::domain::task::{SendMessageRequest, SendMessageResponse, StateUpdate, Task, TaskId};
use crate::domain::task_filter::{parse_integer_param, TaskFilter};
use crate::domain::validation::ValidationError;
use crate::infrastructure::db::SqlitePool;

pub struct ApiState {
    pub tasks: Arc<TaskService>,
    pub pool: Option<SqlitePool>,
    /// Expected inbound bearer token. `None` disables inbound auth.
    pub auth_token: Option<String>,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(tasks: Arc<TaskService>, pool: Option<SqlitePool>, auth_token: Option<String>) -> Self {
        Self {
            tasks,
            pool,
            auth_token: auth_token.filter(|t| !t.is_empty()),
            started_at: Instant::now(),
        }
    }
}

pub fn app(state: ApiState) -> Router {
    let state = Arc::new(state);

    let a2a = Router::new()
        .route("/send-message", post(send_message))
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/{id}/cancel", post(cancel_task))
        .route("/tasks/{id}/state", patch(update_task_state))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health))
        .nest("/a2a", a2a)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
    field: Option<String>,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind,
            message: message.into(),
            field: None,
        }
    }

    fn unauthorized(message: &str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation_error",
            message: err.message,
            field: Some(err.field),
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Validation(v) => v.into(),
            RepositoryError::InvalidTransition(e) => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_transition", e.to_string())
            }
            RepositoryError::NotFound(what) => Self::new(StatusCode::NOT_FOUND, "not_found", what),
            e @ (RepositoryError::AlreadyTerminal { .. } | RepositoryError::Conflict(_)) => {
                Self::new(StatusCode::CONFLICT, "conflict", e.to_string())
            }
            RepositoryError::Unavailable(msg) => {
                warn!(error = %msg, "Storage unavailable");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg)
            }
            e @ (RepositoryError::Database(_) | RepositoryError::Serialization(_)) => {
                error!(error = %e, "Storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal storage error")
            }
        }
    }
}

impl From<TaskServiceError> for ApiError {
    fn from(err: TaskServiceError) -> Self {
        match err {
            TaskServiceError::Validation(v) => v.into(),
            TaskServiceError::NotFound(id) => {
                Self::new(StatusCode::NOT_FOUND, "not_found", format!("task {} not found", id))
            }
            e @ TaskServiceError::AgentBusy { .. } => {
                Self::new(StatusCode::CONFLICT, "agent_busy", e.to_string())
            }
            TaskServiceError::Repository(e) => e.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), "invalid_body", rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": ErrorBody {
                kind: self.kind,
                message: &self.message,
                field: self.field.as_deref(),
            }
        });
        (self.status, Json(body)).into_response()
    }
}

async fn require_bearer(State(state): State<Arc<ApiState>>, request: Request, next: Next) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let verdict = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| bool::from(token.trim().as_bytes().ct_eq(expected.as_bytes())));

    match verdict {
        None => ApiError::unauthorized("missing bearer token").into_response(),
        Some(true) => next.run(request).await,
        Some(false) => {
            warn!(path = %request.uri().path(), "Rejected request with invalid bearer token");
            ApiError::unauthorized("invalid bearer token").into_response()
        }
    }
}

async fn health(State(state): State<Arc<ApiState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "pool": state.pool.as_ref().map(|pool| pool.status()),
        "queue": {
            "entries": state.tasks.queue().len(),
            "busy_agents": state.tasks.queue().busy_agents(),
        },
    }))
}

async fn send_message(
    State(state): State<Arc<ApiState>>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>, ApiError> {
    let Json(request) = body?;
    Ok(Json(state.tasks.send_message(request).await?))
}

async fn get_task(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.get_task(&TaskId::from(id)).await?))
}

async fn list_tasks(
    State(state): State<Arc<ApiState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<serde_json::Value>, ApiError> {
    let filter = parse_task_filter(query.as_deref().unwrap_or(""))?;
    let tasks = state.tasks.list_tasks(&filter).await?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn cancel_task(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Result<Json<Task>, ApiError> {
    Ok(Json(state.tasks.cancel_task(&TaskId::from(id)).await?))
}

async fn update_task_state(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    body: Result<Json<StateUpdate>, JsonRejection>,
) -> Result<Json<Task>, ApiError> {
    let Json(update) = body?;
    Ok(Json(state.tasks.update_state(&TaskId::from(id), update).await?))
}

/// Build a [`TaskFilter`] from a query string. `state` and `priority` may be
/// repeated or comma-separated; unknown keys are ignored.
pub fn parse_task_filter(query: &str) -> Result<TaskFilter, ValidationError> {
    let mut filter = TaskFilter::default();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "state" => filter.state.extend(split_list(&value)),
            "priority" => filter.priority.extend(split_list(&value)),
            "createdAfter" => filter.created_after = Some(value.into_owned()),
            "createdBefore" => filter.created_before = Some(value.into_owned()),
            "limit" => filter.limit = Some(parse_integer_param("limit", &value)?),
            "offset" => filter.offset = Some(parse_integer_param("offset", &value)?),
            _ => {}
        }
    }
    Ok(filter)
}

fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}
