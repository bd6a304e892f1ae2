mod common;

use axum::http::{header, Method, Request, StatusCode};
use axum::body::Body;
use tower::ServiceExt;

use common::TestApp;

#[tokio::test]
async fn test_health_reports_route_counts() {
    let app = TestApp::new().await;
    let (status, body) = app.send(Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["environment"], "test");
    assert_eq!(body["storage_backend"], "memory");
    assert_eq!(body["routes"]["static_routes"], 5);
    assert_eq!(body["routes"]["dynamic_routes"], 3);
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = TestApp::new().await;
    let (status, body) = app.send(Method::GET, "/api-docs/openapi.json", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/webhooks"].is_object());
    assert!(body["components"]["schemas"]["Webhook"].is_object());
}

#[tokio::test]
async fn test_metrics_endpoint_is_plain_text() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let app = TestApp::new().await;
    let response = app
        .router
        .clone()
        .oneshot(
            Request::get("/nowhere")
                .header("X-Request-ID", "trace-me")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers()["X-Request-ID"], "trace-me");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["request_id"], "trace-me");
}
