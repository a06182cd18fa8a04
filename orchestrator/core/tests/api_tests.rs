// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP-level tests for the A2A routes, driven through `tower::ServiceExt`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use courier_core::application::delegation_queue::DelegationQueue;
use courier_core::application::task_service::TaskService;
use courier_core::domain::repository::TaskRepository;
use courier_core::infrastructure::event_bus::EventBus;
use courier_core::infrastructure::repositories::InMemoryTaskRepository;
use courier_core::presentation::api::{app, ApiState};
use serde_json::{json, Value};
use tower::ServiceExt;

const TOKEN: &str = "inbound-secret";

fn router() -> Router {
    let repository: Arc<dyn TaskRepository> = Arc::new(InMemoryTaskRepository::new());
    let event_bus = EventBus::with_default_capacity();
    let queue = Arc::new(DelegationQueue::new(
        repository.clone(),
        event_bus.clone(),
        Duration::from_secs(300),
    ));
    let tasks = Arc::new(TaskService::new(repository, queue, event_bus));
    app(ApiState::new(tasks, None, Some(TOKEN.to_string())))
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TOKEN));
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn delegation(agent: &str) -> Value {
    json!({
        "message": {"role": "user", "parts": [{"kind": "text", "text": "translate the README"}]},
        "agentId": agent,
        "priority": "high"
    })
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let router = router();
    let response = router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_missing_or_wrong_token_is_unauthorized() {
    let router = router();
    let (status, body) = call(
        &router,
        Request::get("/a2a/tasks").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["kind"], "unauthorized");

    let (status, _) = call(
        &router,
        Request::get("/a2a/tasks")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_send_message_then_fetch() {
    let router = router();
    let (status, body) = call(
        &router,
        request(Method::POST, "/a2a/send-message", Some(delegation("translator"))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "SUBMITTED");
    let task_id = body["taskId"].as_str().unwrap().to_string();

    let (status, task) = call(&router, request(Method::GET, &format!("/a2a/tasks/{}", task_id), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(task["id"], task_id.as_str());
    assert_eq!(task["priority"], "high");
    assert_eq!(task["agentId"], "translator");
}

#[tokio::test]
async fn test_busy_agent_is_conflict() {
    let router = router();
    call(&router, request(Method::POST, "/a2a/send-message", Some(delegation("translator")))).await;
    let (status, body) = call(
        &router,
        request(Method::POST, "/a2a/send-message", Some(delegation("translator"))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["kind"], "agent_busy");

    let (_, listed) = call(&router, request(Method::GET, "/a2a/tasks?state=REJECTED", None)).await;
    assert_eq!(listed["tasks"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_list_validation_errors_name_the_field() {
    let router = router();
    let cases = [
        ("/a2a/tasks?state=SUBMITTED%27%20OR%20%271%27%3D%271", "state"),
        ("/a2a/tasks?priority=critical", "priority"),
        ("/a2a/tasks?limit=10001", "limit"),
        ("/a2a/tasks?limit=-1", "limit"),
        ("/a2a/tasks?offset=abc", "offset"),
        ("/a2a/tasks?createdAfter=yesterday", "createdAfter"),
    ];
    for (uri, field) in cases {
        let (status, body) = call(&router, request(Method::GET, uri, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["error"]["kind"], "validation_error", "{}", uri);
        assert_eq!(body["error"]["field"], field, "{}", uri);
    }
}

#[tokio::test]
async fn test_cancel_is_idempotent_over_http() {
    let router = router();
    let (_, body) = call(
        &router,
        request(Method::POST, "/a2a/send-message", Some(delegation("translator"))),
    )
    .await;
    let uri = format!("/a2a/tasks/{}/cancel", body["taskId"].as_str().unwrap());

    let (first, task) = call(&router, request(Method::POST, &uri, None)).await;
    let (second, again) = call(&router, request(Method::POST, &uri, None)).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);
    assert_eq!(task["state"], "CANCELED");
    assert_eq!(again["state"], "CANCELED");

    let (status, _) = call(&router, request(Method::POST, "/a2a/tasks/missing/cancel", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_patch_state_enforces_lifecycle() {
    let router = router();
    let (_, body) = call(
        &router,
        request(Method::POST, "/a2a/send-message", Some(delegation("translator"))),
    )
    .await;
    let uri = format!("/a2a/tasks/{}/state", body["taskId"].as_str().unwrap());

    let (status, body) = call(&router, request(Method::PATCH, &uri, Some(json!({"state": "COMPLETED"})))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_transition");

    let (status, body) = call(&router, request(Method::PATCH, &uri, Some(json!({"state": "WORKING"})))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "WORKING");

    let (status, body) = call(
        &router,
        request(
            Method::PATCH,
            &uri,
            Some(json!({"state": "COMPLETED", "result": {"language": "fr"}})),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["language"], "fr");

    let (status, body) = call(&router, request(Method::PATCH, &uri, Some(json!({"state": "BOGUS"})))).await;
    assert!(status.is_client_error());
    assert_eq!(body["error"]["kind"], "invalid_body");
}
