//! # Error Handling Module
//!
//! Error types for the tracking service, built with `thiserror`, plus the
//! mapping from each error to the HTTP status and JSON body the adapter
//! returns.
//!
//! ## Error categories
//! - **Request errors**: malformed shipment codes (`400`)
//! - **Secondary source errors**: spreadsheet fetch or parse failures. These
//!   are the only source failures that reach the caller, as `400` with the
//!   underlying message.
//! - **Primary source errors**: vendor API failures. They never reach the
//!   HTTP boundary because the lookup strategy turns them into a fallback,
//!   but the variant exists so the vendor client can report what went wrong.
//! - **Internal errors**: configuration files (unreadable, bad YAML, invalid
//!   values) and everything unexpected (`500`)
//!
//! Cache failures never surface here: the cache
//! client swallows them (see [`crate::caching::client`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Result type used throughout the service
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Error types for the tracking service
#[derive(Debug, Error, Clone)]
pub enum TrackingError {
    /// Configuration-related errors (invalid config, unreadable files, etc.)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The shipment code did not pass normalization
    #[error("Invalid shipment code '{code}': {reason}")]
    InvalidCode { code: String, reason: String },

    /// The vendor tracking API failed (network, status, payload)
    #[error("Vendor API error: {message}")]
    Vendor { message: String },

    /// The spreadsheet source could not be fetched or returned an error response
    #[error("Sheet lookup failed: {message}")]
    Sheet { message: String },

    /// A spreadsheet row did not match the expected column schema
    #[error("Sheet schema mismatch (schema v{version}): {message}")]
    SheetSchema { version: u32, message: String },

    /// Configuration file could not be read
    #[error("I/O error: {message}")]
    Io { message: String },

    /// YAML parsing errors for configuration files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// Internal server errors for unexpected failures
    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl TrackingError {
    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid code error
    pub fn invalid_code<C: Into<String>, R: Into<String>>(code: C, reason: R) -> Self {
        Self::InvalidCode {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Create a vendor API error
    pub fn vendor<S: Into<String>>(message: S) -> Self {
        Self::Vendor {
            message: message.into(),
        }
    }

    /// Create a spreadsheet source error
    pub fn sheet<S: Into<String>>(message: S) -> Self {
        Self::Sheet {
            message: message.into(),
        }
    }

    /// Create a spreadsheet schema error
    pub fn sheet_schema<S: Into<String>>(version: u32, message: S) -> Self {
        Self::SheetSchema {
            version,
            message: message.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidCode { .. } => StatusCode::BAD_REQUEST,
            Self::Sheet { .. } => StatusCode::BAD_REQUEST,
            Self::SheetSchema { .. } => StatusCode::BAD_REQUEST,
            Self::Vendor { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Yaml { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a string representation of the error type for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::InvalidCode { .. } => "invalid_code",
            Self::Vendor { .. } => "vendor_error",
            Self::Sheet { .. } => "sheet_error",
            Self::SheetSchema { .. } => "sheet_schema_error",
            Self::Io { .. } => "io_error",
            Self::Yaml { .. } => "yaml_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

impl From<std::io::Error> for TrackingError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for TrackingError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

/// Errors become `{ status, message, error }` bodies, the same envelope the
/// success path uses for `status`/`message`.
impl IntoResponse for TrackingError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = json!({
            "status": status.as_u16(),
            "message": self.to_string(),
            "error": self.error_type(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            TrackingError::invalid_code("ab", "too short").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TrackingError::sheet("connection refused").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TrackingError::sheet_schema(1, "row has 4 cells").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            TrackingError::config("missing spreadsheet id").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_sheet_error_keeps_underlying_message() {
        let err = TrackingError::sheet("HTTP 503 from tab 'T10'");
        assert_eq!(err.to_string(), "Sheet lookup failed: HTTP 503 from tab 'T10'");
        assert_eq!(err.error_type(), "sheet_error");
    }

    #[tokio::test]
    async fn test_into_response_body() {
        let response = TrackingError::invalid_code("x", "too short").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], 400);
        assert_eq!(body["error"], "invalid_code");
        assert!(body["message"].as_str().unwrap().contains("too short"));
    }
}
