use super::*;
use crate::orchestrator::test_helpers::{
    ACCOUNT_SCRIPT, LONG_RUNNING_SCRIPT, SUCCESS_SCRIPT, create_test_orchestrator,
};
use axum::body::Body;
use axum::extract::Request;
use axum::http::{Method, StatusCode};
use serde_json::{Value, json};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

mod system;

/// Router over an orchestrator whose SteamCMD runs `body`
async fn create_test_app(body: &str) -> (Router, Arc<Orchestrator>, TempDir) {
    let (orchestrator, temp_dir) = create_test_orchestrator(body).await;
    let orchestrator = Arc::new(orchestrator);
    let config = orchestrator.get_config();
    (create_router(orchestrator.clone(), config), orchestrator, temp_dir)
}

/// Send a request and decode the JSON body (`Null` when empty)
async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// GET /downloads/:id until `condition` holds (10 s limit)
async fn poll_until<F>(app: &Router, task_id: u64, condition: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let (status, snapshot) =
            send(app, Method::GET, &format!("/downloads/{task_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if condition(&snapshot) {
            return snapshot;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for task {task_id}; last snapshot: {snapshot}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn is_terminal(snapshot: &Value) -> bool {
    snapshot["state"] != "running"
}

#[tokio::test]
async fn test_health_endpoint() {
    let (app, _orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;

    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["active_tasks"], 0);
}

#[tokio::test]
async fn test_cors_enabled() {
    let (_app, orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;
    let mut config = (*orchestrator.get_config()).clone();
    config.api.cors_enabled = true;
    config.api.cors_origins = vec!["*".to_string()];
    let app = create_router(orchestrator, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let (_app, orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;
    let mut config = (*orchestrator.get_config()).clone();
    config.api.cors_enabled = false;
    let app = create_router(orchestrator, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_cors_specific_origin() {
    let (_app, orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;
    let mut config = (*orchestrator.get_config()).clone();
    config.api.cors_origins = vec!["http://allowed.example".to_string()];
    let app = create_router(orchestrator, Arc::new(config));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://allowed.example")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://allowed.example"
    );
}

#[tokio::test]
async fn test_files_are_served_from_download_root() {
    let (app, _orchestrator, temp_dir) = create_test_app(SUCCESS_SCRIPT).await;
    let dir = temp_dir.path().join("downloads/480/bin");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("data file.pak"), "pak contents").unwrap();

    let request = Request::builder()
        .uri("/files/480/bin/data%20file.pak")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], b"pak contents");

    let request = Request::builder()
        .uri("/files/480/missing.bin")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_api_server_stops_on_signal() {
    let (_app, orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;
    let mut config = (*orchestrator.get_config()).clone();
    // Port 0 = OS assigns a free port
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(start_api_server_with_shutdown(
        orchestrator,
        Arc::new(config),
        async move {
            stop_rx.await.ok();
        },
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_event_stream_ends_after_shutdown() {
    let (app, orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;

    let request = Request::builder()
        .uri("/events")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    orchestrator.shutdown().await.unwrap();

    let body = tokio::time::timeout(
        Duration::from_secs(5),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("event stream still open after shutdown")
    .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("event: shutdown"), "{text}");

    // a client arriving after shutdown is not left hanging
    let request = Request::builder()
        .uri("/events")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    tokio::time::timeout(
        Duration::from_secs(5),
        axum::body::to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("late event stream never ended")
    .unwrap();
}
