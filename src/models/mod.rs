// Data models and DTOs

pub mod webhook;

pub use webhook::{CreateWebhookRequest, Webhook};
