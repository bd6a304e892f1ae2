//! Webhook ingestion gateway.
//!
//! Webhooks are registered at runtime through `POST /webhooks`. Each one gets
//! an object-store bucket, a metadata row and a live route whose handler runs
//! the incoming JSON through the webhook's filter and stores the result.

pub mod app_state;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod router;
pub mod services;
pub mod startup;

pub use app_state::AppState;
pub use config::Config;
pub use error::{ApiError, ErrorCode, Result};
