#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use tower::ServiceExt;

use webhook_gateway::{
    config::Config, router::build_router, services::PersistenceGateway, startup, AppState,
};

pub struct TestApp {
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_store(PersistenceGateway::in_memory()).await
    }

    pub async fn with_store(store: PersistenceGateway) -> Self {
        let config = Config::in_memory();
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let state = startup::build_app_state(config, store, handle)
            .await
            .expect("state builds");
        let router = build_router(state.clone());
        Self { state, router }
    }

    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send_raw(builder.body(body).unwrap()).await
    }

    pub async fn send_raw(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, value)
    }

    pub async fn create(&self, webhook: Value) -> (StatusCode, Value) {
        self.send(Method::POST, "/webhooks", Some(webhook)).await
    }
}

pub fn webhook(name: &str, method: &str, path: &str, filter: &str) -> Value {
    serde_json::json!({
        "name": name,
        "description": format!("{name} test hook"),
        "path": path,
        "method": method,
        "jq_filter": filter,
    })
}
