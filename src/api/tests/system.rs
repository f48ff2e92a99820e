use super::*;

#[tokio::test]
async fn test_openapi_endpoint() {
    let (app, _orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;

    let (status, spec) = send(&app, Method::GET, "/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(spec["info"]["title"], "steamcmd-dl REST API");
    assert!(spec["paths"]["/downloads/{id}/input"].is_object());
}

#[tokio::test]
async fn test_swagger_ui_toggle() {
    let (app, orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;

    let (status, _) = send(&app, Method::GET, "/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);

    let mut config = (*orchestrator.get_config()).clone();
    config.api.swagger_ui = false;
    let app = create_router(orchestrator, Arc::new(config));
    let (status, _) = send(&app, Method::GET, "/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_tool_status_reports_configured_path() {
    let (app, _orchestrator, temp_dir) = create_test_app(SUCCESS_SCRIPT).await;

    let (status, body) = send(&app, Method::GET, "/tool", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["installed"], true);
    assert_eq!(body["auto_install"], false);
    assert_eq!(
        body["path"],
        temp_dir.path().join("bin/steamcmd.sh").to_str().unwrap()
    );
}

#[tokio::test]
async fn test_install_tool_when_present_is_noop() {
    let (app, orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;
    let mut events = orchestrator.subscribe();

    let (status, body) = send(&app, Method::POST, "/tool/install", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["installed"], true);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_install_tool_failure_is_bad_gateway() {
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (_app, orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;
    let mut config = (*orchestrator.get_config()).clone();
    config.tool.steamcmd_path = None;
    config.tool.distribution_url = Some(format!("{}/steamcmd_linux.tar.gz", server.uri()));
    let orchestrator = Arc::new(crate::Orchestrator::new(config).await.unwrap());
    let app = create_router(orchestrator.clone(), orchestrator.get_config());

    let (status, body) = send(&app, Method::POST, "/tool/install", None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "install_error");
}

#[tokio::test]
async fn test_unknown_task_is_not_found() {
    let (app, _orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;

    for (method, uri) in [
        (Method::GET, "/downloads/99"),
        (Method::DELETE, "/downloads/99"),
        (Method::GET, "/downloads/99/artifacts"),
    ] {
        let (status, body) = send(&app, method, uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert_eq!(body["error"]["code"], "unknown_task");
        assert_eq!(body["error"]["details"]["task_id"], 99);
    }

    let (status, _) = send(
        &app,
        Method::POST,
        "/downloads/99/input",
        Some(json!({"input": "ABCDE"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_rejects_bad_requests() {
    let (app, orchestrator, _temp_dir) = create_test_app(SUCCESS_SCRIPT).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/downloads",
        Some(json!({"identifier": "not-a-number"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_request");

    let (status, body) = send(
        &app,
        Method::POST,
        "/downloads",
        Some(json!({"identifier": "480", "anonymous": true, "username": "gaben"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, body) = send(
        &app,
        Method::POST,
        "/downloads",
        Some(json!({"identifier": "480", "anonymous": false})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, _) = send(
        &app,
        Method::POST,
        "/downloads",
        Some(json!({"identifier": "480", "install_dir": "/etc"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(orchestrator.list().is_empty());
}

#[test]
fn test_wire_request_defaults_to_anonymous() {
    use crate::api::routes::StartDownloadRequest;

    let body: StartDownloadRequest = serde_json::from_value(json!({"identifier": "480"})).unwrap();
    let request = body.into_download_request().unwrap();
    assert!(request.login.is_anonymous());
    assert!(request.install_dir.is_none());

    let body: StartDownloadRequest = serde_json::from_value(json!({
        "identifier": "480",
        "username": "gaben",
        "password": "hunter2",
        "install_dir": "servers/spacewar",
    }))
    .unwrap();
    let debug = format!("{body:?}");
    assert!(!debug.contains("hunter2"));
    let request = body.into_download_request().unwrap();
    assert!(!request.login.is_anonymous());
    assert_eq!(
        request.install_dir.as_deref(),
        Some(std::path::Path::new("servers/spacewar"))
    );
}
