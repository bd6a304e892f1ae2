use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::middleware::request_logger::current_request_id;
use crate::router::RouteError;
use crate::services::persistence::StorageError;
use crate::services::registrar::RegistrarError;
use crate::services::transform::TransformError;

pub type Result<T> = std::result::Result<T, ApiError>;

/// Error codes for categorizing errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub enum ErrorCode {
    // Validation errors (3xxx)
    #[serde(rename = "VAL_3001")]
    InvalidInput,
    #[serde(rename = "VAL_3003")]
    InvalidFormat,
    #[serde(rename = "VAL_3004")]
    InvalidFilter,
    #[serde(rename = "VAL_3005")]
    InvalidRoute,
    #[serde(rename = "VAL_3006")]
    PayloadTooLarge,

    // Resource errors (4xxx)
    #[serde(rename = "RES_4001")]
    NotFound,
    #[serde(rename = "RES_4002")]
    AlreadyExists,
    #[serde(rename = "RES_4003")]
    Conflict,
    #[serde(rename = "RES_4004")]
    RouteNotFound,

    // Transform errors (5xxx)
    #[serde(rename = "TRF_5001")]
    TransformFailed,
    #[serde(rename = "TRF_5002")]
    NoResults,
    #[serde(rename = "TRF_5003")]
    InvalidPayload,
    #[serde(rename = "TRF_5004")]
    TransformCancelled,

    // Storage errors (7xxx)
    #[serde(rename = "STO_7001")]
    QueryFailed,
    #[serde(rename = "STO_7002")]
    ObjectStoreFailed,

    // Internal errors (9xxx)
    #[serde(rename = "INT_9999")]
    InternalServerError,
    #[serde(rename = "INT_9997")]
    NotImplemented,
}

impl ErrorCode {
    /// Get numeric code
    pub fn code(&self) -> u16 {
        match self {
            ErrorCode::InvalidInput => 3001,
            ErrorCode::InvalidFormat => 3003,
            ErrorCode::InvalidFilter => 3004,
            ErrorCode::InvalidRoute => 3005,
            ErrorCode::PayloadTooLarge => 3006,

            ErrorCode::NotFound => 4001,
            ErrorCode::AlreadyExists => 4002,
            ErrorCode::Conflict => 4003,
            ErrorCode::RouteNotFound => 4004,

            ErrorCode::TransformFailed => 5001,
            ErrorCode::NoResults => 5002,
            ErrorCode::InvalidPayload => 5003,
            ErrorCode::TransformCancelled => 5004,

            ErrorCode::QueryFailed => 7001,
            ErrorCode::ObjectStoreFailed => 7002,

            ErrorCode::InternalServerError => 9999,
            ErrorCode::NotImplemented => 9997,
        }
    }

    /// Get user-friendly message
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Invalid input provided",
            ErrorCode::InvalidFormat => "Invalid format provided",
            ErrorCode::InvalidFilter => "The filter expression is invalid",
            ErrorCode::InvalidRoute => "The webhook method and path do not form a valid route",
            ErrorCode::PayloadTooLarge => "The request body exceeds the configured limit",

            ErrorCode::NotFound => "The requested resource was not found",
            ErrorCode::AlreadyExists => "This resource already exists",
            ErrorCode::Conflict => "A conflict occurred with an existing resource",
            ErrorCode::RouteNotFound => "No route matches this request",

            ErrorCode::TransformFailed => "The filter failed while transforming the payload",
            ErrorCode::NoResults => "The filter produced no results",
            ErrorCode::InvalidPayload => "The payload is not valid JSON",
            ErrorCode::TransformCancelled => "The transform did not finish in time",

            ErrorCode::QueryFailed => "Database query failed",
            ErrorCode::ObjectStoreFailed => "Object storage request failed",

            ErrorCode::InternalServerError => "An internal server error occurred",
            ErrorCode::NotImplemented => "This operation is not implemented",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidInput
            | ErrorCode::InvalidFormat
            | ErrorCode::InvalidFilter
            | ErrorCode::InvalidRoute
            | ErrorCode::InvalidPayload => StatusCode::BAD_REQUEST,
            ErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorCode::NotFound | ErrorCode::RouteNotFound => StatusCode::NOT_FOUND,
            ErrorCode::AlreadyExists | ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::TransformFailed | ErrorCode::NoResults => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::TransformCancelled => StatusCode::REQUEST_TIMEOUT,
            ErrorCode::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorCode::QueryFailed
            | ErrorCode::ObjectStoreFailed
            | ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Structured error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
    pub request_id: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub code_number: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("{1}")]
    WithCode(ErrorCode, String),

    #[error("{1}")]
    WithCodeAndDetails(ErrorCode, String, String),
}

impl ApiError {
    /// Create error with specific error code
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        ApiError::WithCode(code, message.into())
    }

    /// Create error with code and additional details
    pub fn with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        ApiError::WithCodeAndDetails(code, message.into(), details.into())
    }

    /// Helper: Resource not found
    pub fn not_found(resource: &str) -> Self {
        ApiError::NotFound(format!("{} not found", resource))
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Validation(_) => ErrorCode::InvalidInput,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::Conflict(_) => ErrorCode::Conflict,
            ApiError::PayloadTooLarge(_) => ErrorCode::PayloadTooLarge,
            ApiError::NotImplemented(_) => ErrorCode::NotImplemented,
            ApiError::Route(RouteError::NotFound { .. }) => ErrorCode::RouteNotFound,
            ApiError::Route(RouteError::MalformedPattern { .. }) => ErrorCode::InvalidRoute,
            ApiError::Transform(e) => match e {
                TransformError::InvalidFilter(_) => ErrorCode::InvalidFilter,
                TransformError::InvalidPayload(_) => ErrorCode::InvalidPayload,
                TransformError::Execution(_) => ErrorCode::TransformFailed,
                TransformError::NoResults => ErrorCode::NoResults,
                TransformError::Cancelled => ErrorCode::TransformCancelled,
            },
            ApiError::Storage(e) => match e {
                StorageError::BucketExists(_) | StorageError::Conflict(_) => ErrorCode::AlreadyExists,
                StorageError::Database(_) | StorageError::Migration(_) => ErrorCode::QueryFailed,
                StorageError::ObjectStore(_) => ErrorCode::ObjectStoreFailed,
            },
            ApiError::Internal(_) => ErrorCode::InternalServerError,
            ApiError::WithCode(code, _) | ApiError::WithCodeAndDetails(code, _, _) => *code,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.error_code().status()
    }

    /// Client errors carry their own message. Server errors only ever expose
    /// the generic text for their code.
    fn public_message(&self) -> String {
        if self.status_code().is_server_error() {
            return self.error_code().message().to_string();
        }
        match self {
            ApiError::BadRequest(msg)
            | ApiError::Validation(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::NotImplemented(msg)
            | ApiError::WithCode(_, msg)
            | ApiError::WithCodeAndDetails(_, msg, _) => msg.clone(),
            ApiError::Route(e) => e.to_string(),
            ApiError::Transform(e) => e.to_string(),
            ApiError::Storage(e) => e.to_string(),
            _ => self.error_code().message().to_string(),
        }
    }

    fn error_details(&self) -> Option<String> {
        match self {
            ApiError::WithCodeAndDetails(_, _, details) if !self.status_code().is_server_error() => {
                Some(details.clone())
            }
            _ => None,
        }
    }

    /// Log error with appropriate level
    fn log_error(&self, request_id: &str) {
        match self.status_code() {
            status if status.is_server_error() => {
                error!(
                    request_id = %request_id,
                    error = %error_chain(self),
                    "Server error occurred"
                );
            }
            status if status.is_client_error() => {
                warn!(
                    request_id = %request_id,
                    error = %self,
                    "Client error occurred"
                );
            }
            _ => {}
        }
    }
}

/// Renders an error and all of its sources as `outer: inner: ...`.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut rendered = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !rendered.ends_with(&cause_text) {
            rendered.push_str(": ");
            rendered.push_str(&cause_text);
        }
        source = cause.source();
    }
    rendered
}

impl From<RegistrarError> for ApiError {
    fn from(err: RegistrarError) -> Self {
        match err {
            RegistrarError::Invalid(msg) => ApiError::Validation(msg),
            RegistrarError::InvalidFilter(e) => ApiError::Transform(TransformError::InvalidFilter(e)),
            RegistrarError::InvalidRoute(e) => ApiError::Route(e),
            RegistrarError::Conflict(name) => {
                ApiError::Conflict(format!("webhook {name:?} already exists"))
            }
            RegistrarError::NotFound(name) => ApiError::not_found(&format!("webhook {name:?}")),
            RegistrarError::NotImplemented(operation) => {
                ApiError::NotImplemented(format!("{operation} is not supported"))
            }
            RegistrarError::Storage(e) => ApiError::Storage(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let request_id = current_request_id().unwrap_or_else(|| Uuid::new_v4().to_string());
        let status = self.status_code();
        let code = self.error_code();

        self.log_error(&request_id);

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code,
                code_number: code.code(),
                message: self.public_message(),
                details: self.error_details(),
            },
            request_id,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(error_response)).into_response()
    }
}

/// Handle Axum JSON rejections and convert to structured API errors
pub fn handle_rejection(err: JsonRejection) -> ApiError {
    match err {
        JsonRejection::JsonDataError(e) => ApiError::with_details(
            ErrorCode::InvalidInput,
            "Invalid input provided",
            e.body_text(),
        ),
        JsonRejection::JsonSyntaxError(e) => {
            ApiError::with_details(ErrorCode::InvalidFormat, "Invalid JSON format", e.body_text())
        }
        JsonRejection::MissingJsonContentType(_) => {
            ApiError::with_code(ErrorCode::InvalidFormat, "JSON content type required")
        }
        JsonRejection::BytesRejection(_) => {
            ApiError::with_code(ErrorCode::InvalidInput, "Invalid request body format")
        }
        _ => ApiError::with_details(
            ErrorCode::InvalidInput,
            "Invalid input provided",
            err.body_text(),
        ),
    }
}
