//! Webhook Models
//!
//! Persisted webhook metadata and the registration request body.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use validator::Validate;

/// S3 bucket naming rules: 3-63 chars, lower-case alphanumerics, `-` and `.`,
/// starting and ending with a letter or digit.
static BUCKET_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").expect("valid regex"));

static HTTP_METHOD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]+$").expect("valid regex"));

static ROUTE_PATH: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/\S*$").expect("valid regex"));

/// A registered webhook. `name` is the identity and doubles as the bucket name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Webhook {
    #[schema(example = "github-push")]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[schema(example = "/hooks/github/{event}")]
    pub path: String,
    #[schema(example = "POST")]
    pub method: String,
    /// Empty when the payload is stored as received.
    #[serde(default)]
    #[schema(example = "{ref: .ref, pusher: .pusher.name}")]
    pub jq_filter: String,
    /// Reserved. Forwarding is not performed.
    #[serde(default)]
    pub forward_to: String,
    #[serde(default)]
    pub preserve_payload: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Webhook {
    /// The route-table pattern this webhook is served under.
    pub fn route_pattern(&self) -> String {
        format!("{} {}", self.method, self.path)
    }

    pub fn has_filter(&self) -> bool {
        !self.jq_filter.trim().is_empty()
    }
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
pub struct CreateWebhookRequest {
    #[validate(regex(
        path = *BUCKET_NAME,
        message = "must be 3-63 characters of a-z, 0-9, '-' or '.', starting and ending with a letter or digit"
    ))]
    #[schema(example = "github-push")]
    pub name: String,

    #[serde(default)]
    #[validate(length(max = 1024))]
    pub description: String,

    #[validate(regex(path = *ROUTE_PATH, message = "must start with '/' and contain no whitespace"))]
    #[schema(example = "/hooks/github/{event}")]
    pub path: String,

    #[validate(regex(path = *HTTP_METHOD, message = "must be an upper-case HTTP method"))]
    #[schema(example = "POST")]
    pub method: String,

    #[serde(default)]
    pub jq_filter: String,

    #[serde(default)]
    pub forward_to: String,

    #[serde(default)]
    pub preserve_payload: bool,
}

impl From<CreateWebhookRequest> for Webhook {
    fn from(request: CreateWebhookRequest) -> Self {
        Self {
            name: request.name,
            description: request.description,
            path: request.path,
            method: request.method,
            jq_filter: request.jq_filter,
            forward_to: request.forward_to,
            preserve_payload: request.preserve_payload,
            created_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, method: &str, path: &str) -> CreateWebhookRequest {
        CreateWebhookRequest {
            name: name.to_string(),
            description: String::new(),
            path: path.to_string(),
            method: method.to_string(),
            jq_filter: String::new(),
            forward_to: String::new(),
            preserve_payload: false,
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request("orders", "POST", "/orders").validate().is_ok());
        assert!(request("my.bucket-01", "PUT", "/x/{id}").validate().is_ok());
    }

    #[test]
    fn test_bucket_name_rules() {
        let long = "a".repeat(64);
        for name in ["ab", "Orders", "-orders", "orders-", "has space", long.as_str()] {
            let errors = request(name, "POST", "/orders").validate().unwrap_err();
            assert!(errors.field_errors().contains_key("name"), "{name:?}");
        }
    }

    #[test]
    fn test_method_and_path_rules() {
        let errors = request("orders", "post", "orders").validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("method"));
        assert!(fields.contains_key("path"));

        assert!(request("orders", "POST", "/a b").validate().is_err());
    }

    #[test]
    fn test_wire_defaults() {
        let webhook: Webhook =
            serde_json::from_str(r#"{"name":"n1x","path":"/p","method":"POST"}"#).unwrap();
        assert_eq!(webhook.jq_filter, "");
        assert!(!webhook.preserve_payload);
        assert!(!webhook.has_filter());
        assert_eq!(webhook.route_pattern(), "POST /p");
    }
}
