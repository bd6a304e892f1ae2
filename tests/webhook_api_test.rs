mod common;

use std::collections::HashSet;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use serde_json::{json, Value};

use common::{webhook, TestApp};

async fn content(app: &TestApp, name: &str) -> Vec<Value> {
    let (status, body) = app
        .send(Method::GET, &format!("/webhooks/{name}/content"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body.as_array()
        .unwrap()
        .iter()
        .map(|payload| serde_json::from_str(payload.as_str().unwrap()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_create_ingest_and_read_back() {
    let app = TestApp::new().await;

    let (status, created) = app
        .create(webhook("github", "POST", "/hooks/github/{repo}", ".commits | map(.id)"))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["name"], "github");
    assert_eq!(created["preserve_payload"], false);

    let (status, transformed) = app
        .send(
            Method::POST,
            "/hooks/github/core",
            Some(json!({"commits": [{"id": "a1"}, {"id": "b2"}]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(transformed, json!(["a1", "b2"]));

    assert_eq!(content(&app, "github").await, vec![json!(["a1", "b2"])]);
}

#[tokio::test]
async fn test_preserved_payload_is_stored_alongside_transform() {
    let app = TestApp::new().await;
    let mut hook = webhook("orders", "PUT", "/orders", ".total");
    hook["preserve_payload"] = json!(true);
    assert_eq!(app.create(hook).await.0, StatusCode::CREATED);

    let (status, total) = app
        .send(Method::PUT, "/orders", Some(json!({"total": 42})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(total, json!(42));

    let stored = content(&app, "orders").await;
    assert_eq!(stored.len(), 2);
    assert!(stored.contains(&json!(42)));
    assert!(stored.contains(&json!({"total": 42})));
}

#[tokio::test]
async fn test_list_webhooks() {
    let app = TestApp::new().await;
    app.create(webhook("one", "POST", "/one", "")).await;
    app.create(webhook("two", "POST", "/two", ".")).await;

    let (status, list) = app.send(Method::GET, "/webhooks", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: HashSet<&str> = list
        .as_array()
        .unwrap()
        .iter()
        .map(|w| w["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, HashSet::from(["one", "two"]));
}

#[tokio::test]
async fn test_same_static_route_is_replaced() {
    let app = TestApp::new().await;
    app.create(webhook("first", "POST", "/shared", ".a")).await;
    app.create(webhook("second", "POST", "/shared", ".b")).await;

    let (status, value) = app
        .send(Method::POST, "/shared", Some(json!({"a": 1, "b": 2})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!(2));

    let (_, list) = app.send(Method::GET, "/webhooks", None).await;
    assert_eq!(list.as_array().unwrap().len(), 2);
    assert!(content(&app, "first").await.is_empty());
}

#[tokio::test]
async fn test_invalid_filter_creates_nothing() {
    let app = TestApp::new().await;

    let (status, body) = app
        .create(webhook("broken", "POST", "/broken", ".foo | | ."))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VAL_3004");
    assert!(body["request_id"].is_string());

    let (status, body) = app.send(Method::GET, "/webhooks/broken/content", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RES_4001");

    let (status, _) = app.send(Method::POST, "/broken", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, list) = app.send(Method::GET, "/webhooks", None).await;
    assert_eq!(list, json!([]));
}

#[tokio::test]
async fn test_duplicate_name_conflicts() {
    let app = TestApp::new().await;
    assert_eq!(app.create(webhook("dup", "POST", "/a", "")).await.0, StatusCode::CREATED);

    let (status, body) = app.create(webhook("dup", "POST", "/b", "")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "RES_4003");
}

#[tokio::test]
async fn test_malformed_create_bodies() {
    let app = TestApp::new().await;

    let (status, body) = app
        .create(json!({"name": "x y", "path": "/p", "method": "POST"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VAL_3001");

    let (status, _) = app.create(json!({"name": "nopath"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::post("/webhooks")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VAL_3003");
}

#[tokio::test]
async fn test_ingest_errors() {
    let app = TestApp::new().await;
    app.create(webhook("strict", "POST", "/strict", "error(\"nope\")")).await;
    app.create(webhook("empty", "POST", "/empty", "empty")).await;

    let (status, body) = app.send(Method::POST, "/strict", Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "TRF_5001");

    let (status, body) = app.send(Method::POST, "/empty", Some(json!({}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "TRF_5002");

    let request = Request::post("/strict").body(Body::from("not json")).unwrap();
    let (status, body) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "TRF_5003");

    let oversized = "x".repeat(app.state.config.max_body_bytes + 1);
    let request = Request::post("/strict").body(Body::from(oversized)).unwrap();
    let (status, _) = app.send_raw(request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_concurrent_creations_are_all_routable() {
    let app = TestApp::new().await;
    let n = 32;

    let creations = (0..n).map(|i| {
        let router = app.router.clone();
        async move {
            let request = Request::post("/webhooks")
                .header("content-type", "application/json")
                .body(Body::from(
                    webhook(&format!("hook-{i}"), "POST", &format!("/c/{i}/{{id}}"), ".id").to_string(),
                ))
                .unwrap();
            tower::ServiceExt::oneshot(router, request).await.unwrap().status()
        }
    });
    let statuses = futures::future::join_all(creations).await;
    assert!(statuses.iter().all(|s| *s == StatusCode::CREATED), "{statuses:?}");

    for i in 0..n {
        let (status, value) = app
            .send(Method::POST, &format!("/c/{i}/x"), Some(json!({"id": i})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value, json!(i));
    }
}

#[tokio::test]
async fn test_unrouted_request_is_not_found() {
    let app = TestApp::new().await;
    let (status, body) = app.send(Method::GET, "/nowhere", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "RES_4004");
}

#[tokio::test]
async fn test_deletion_is_not_implemented() {
    let app = TestApp::new().await;
    app.create(webhook("keep", "POST", "/keep", "")).await;

    for uri in ["/webhooks/keep", "/webhooks/keep/content"] {
        let (status, body) = app.send(Method::DELETE, uri, None).await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["error"]["code"], "INT_9997");
    }
}

#[tokio::test]
async fn test_restart_restores_routes() {
    let store = webhook_gateway::services::PersistenceGateway::in_memory();
    let app = TestApp::with_store(store.clone()).await;
    app.create(webhook("durable", "POST", "/durable/{id}", "{id: .id}")).await;

    let restarted = TestApp::with_store(store).await;
    let (status, value) = restarted
        .send(Method::POST, "/durable/7", Some(json!({"id": 7, "noise": true})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value, json!({"id": 7}));
}
