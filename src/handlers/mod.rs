pub mod health;
pub mod metrics;
pub mod openapi;
pub mod webhooks;

pub use health::{health_check, HealthInfo, HealthStatus};
pub use metrics::get_prometheus_metrics;
pub use openapi::{openapi_json, ApiDoc};
