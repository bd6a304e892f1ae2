//! Application constants and configuration defaults.

/// Defaults applied when the corresponding environment variable is unset.
pub mod defaults {
    pub const ENVIRONMENT: &str = "development";

    pub const SERVER_ADDRESS: &str = "0.0.0.0:8080";

    pub const STORAGE_BACKEND: &str = "postgres-s3";

    pub const DATABASE_MAX_CONNECTIONS: u32 = 10;

    pub const MINIO_REGION: &str = "us-east-1";

    /// 1 MiB
    pub const MAX_BODY_BYTES: usize = 1_048_576;

    pub const REQUEST_TIMEOUT_SECS: u64 = 30;

    pub const LOG_FILTER: &str = "webhook_gateway=debug,tower_http=info";
}

/// Fixed administrative surface, registered in the route table at startup.
pub mod routes {
    pub const CREATE_WEBHOOK: &str = "POST /webhooks";
    pub const LIST_WEBHOOKS: &str = "GET /webhooks";
    pub const GET_WEBHOOK_CONTENT: &str = "GET /webhooks/{name}/content";
    pub const DELETE_WEBHOOK: &str = "DELETE /webhooks/{name}";
    pub const DELETE_WEBHOOK_CONTENT: &str = "DELETE /webhooks/{name}/content";
    pub const HEALTH: &str = "GET /health";
    pub const METRICS: &str = "GET /metrics";
    pub const OPENAPI: &str = "GET /api-docs/openapi.json";
}

pub mod headers {
    pub const REQUEST_ID: &str = "X-Request-ID";
}
