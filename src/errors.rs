//! # Error Taxonomy
//!
//! Every failure a request can run into is expressed as an [`ApiError`]. The variants map
//! one-to-one onto the HTTP statuses a generated endpoint can answer with:
//!
//! | Variant | Status |
//! |---|---|
//! | `BadRequest` | 400 |
//! | `Forbidden` | 403 |
//! | `NotFound` | 404 |
//! | `MethodNotAllowed` | 405 |
//! | `NotAcceptable` | 406 |
//! | `LockConflict` | 409 |
//! | `UnsupportedMediaType` | 415 |
//! | `UnprocessableEntity` | 422 |
//! | `Internal` | 500 |
//! | `NotImplemented` | 501 |
//!
//! Failures raised by a model arrive as [`ApiError::Model`] and stay untranslated until the
//! [translation chain](crate::translation) rewrites them into one of the kinds above.
//!
//! Wiring-time mistakes are not request errors at all: they surface as [`Misconfigured`]
//! from the builders and are expected to abort application start-up.
//!
//! ## Logging
//!
//! Internal details are logged through `tracing` and never written to the client:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt()
//!     .with_target(false)
//!     .compact()
//!     .init();
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use utoipa::ToSchema;

use crate::model::ModelError;

/// A startup-time invariant violation: bad route shape, non-unique `findBy`, invalid
/// semver, and so on. Never produced while serving requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Misconfigured(pub String);

impl Misconfigured {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// One element of an error response body.
///
/// Error bodies are always a JSON array of these, even when a single problem occurred.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEntry {
    /// User-facing message
    pub message: String,
    /// Error kind, e.g. `BadRequest` or `ValidatorError`
    pub name: String,
    /// Document path the error refers to
    pub path: Option<String>,
    /// Validator type, e.g. `unique` or `required`
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    /// Offending value
    #[schema(value_type = Option<Object>)]
    pub value: Option<Value>,
    pub kind: Option<String>,
    /// Message reported by the backend before rewriting
    pub original_message: Option<String>,
    /// Structured validator properties
    #[schema(value_type = Option<Object>)]
    pub properties: Option<Value>,
}

impl ErrorEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    #[must_use]
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// REST error raised anywhere in a controller's chain
#[derive(Debug)]
pub enum ApiError {
    /// 400 - malformed client input
    BadRequest { message: String },

    /// 403 - policy violation
    Forbidden { message: String },

    /// 404 - nothing matched
    NotFound { message: String },

    /// 405 - verb disabled for this resource
    MethodNotAllowed { message: String },

    /// 406 - no formatter for the `Accept` header
    NotAcceptable { message: String },

    /// 501 - structurally unsupported verb/endpoint combination or operator
    NotImplemented { message: String },

    /// 415 - no parser for the `Content-Type`
    UnsupportedMediaType { message: String },

    /// 422 - documents that cannot be stored as sent
    UnprocessableEntity {
        message: String,
        /// Per-path details; empty when the message says it all
        errors: Vec<ErrorEntry>,
    },

    /// 409 - optimistic locking version mismatch
    LockConflict { message: String },

    /// 500 - details logged, not exposed
    Internal {
        message: String,
        internal: Option<String>,
    },

    /// A model failure that has not been through translation yet
    Model(ModelError),
}

impl ApiError {
    // ============================================================================
    // Constructors
    // ============================================================================

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            message: message.into(),
        }
    }

    pub fn not_acceptable(message: impl Into<String>) -> Self {
        Self::NotAcceptable {
            message: message.into(),
        }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::NotImplemented {
            message: message.into(),
        }
    }

    pub fn unsupported_media_type(message: impl Into<String>) -> Self {
        Self::UnsupportedMediaType {
            message: message.into(),
        }
    }

    /// Create a 422 error without per-path details
    ///
    /// # Example
    /// ```rust,ignore
    /// return Err(ApiError::unprocessable("The request body must contain at least one document"));
    /// ```
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::UnprocessableEntity {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    /// Create a 422 error carrying per-path entries
    pub fn unprocessable_with(message: impl Into<String>, errors: Vec<ErrorEntry>) -> Self {
        Self::UnprocessableEntity {
            message: message.into(),
            errors,
        }
    }

    pub fn lock_conflict(message: impl Into<String>) -> Self {
        Self::LockConflict {
            message: message.into(),
        }
    }

    /// Create a 500 error; `internal` is logged but never sent
    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    // ============================================================================
    // Accessors
    // ============================================================================

    /// HTTP status code for this error
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            Self::NotAcceptable { .. } => StatusCode::NOT_ACCEPTABLE,
            Self::NotImplemented { .. } => StatusCode::NOT_IMPLEMENTED,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::UnprocessableEntity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::LockConflict { .. } => StatusCode::CONFLICT,
            Self::Internal { .. } | Self::Model(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Name reported in the `name` field of the error body
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "BadRequest",
            Self::Forbidden { .. } => "Forbidden",
            Self::NotFound { .. } => "NotFound",
            Self::MethodNotAllowed { .. } => "MethodNotAllowed",
            Self::NotAcceptable { .. } => "NotAcceptable",
            Self::NotImplemented { .. } => "NotImplemented",
            Self::UnsupportedMediaType { .. } => "UnsupportedMediaType",
            Self::UnprocessableEntity { .. } => "UnprocessableEntity",
            Self::LockConflict { .. } => "LockConflict",
            Self::Internal { .. } | Self::Model(_) => "InternalServerError",
        }
    }

    /// The user-facing message (sanitized)
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::BadRequest { message }
            | Self::Forbidden { message }
            | Self::NotFound { message }
            | Self::MethodNotAllowed { message }
            | Self::NotAcceptable { message }
            | Self::NotImplemented { message }
            | Self::UnsupportedMediaType { message }
            | Self::UnprocessableEntity { message, .. }
            | Self::LockConflict { message }
            | Self::Internal { message, .. } => message.clone(),
            Self::Model(_) => "An internal server error occurred".to_string(),
        }
    }

    /// Normalize into the list of plain entries written as the response body.
    ///
    /// Errors with per-path details expand to one entry per path; everything else becomes
    /// a single entry built from the name and message.
    #[must_use]
    pub fn entries(&self) -> Vec<ErrorEntry> {
        match self {
            Self::UnprocessableEntity { errors, .. } if !errors.is_empty() => errors.clone(),
            _ => vec![ErrorEntry::new(self.name(), self.user_message())],
        }
    }

    /// Log internal error details (not sent to user)
    pub(crate) fn log_internal(&self) {
        match self {
            Self::Internal {
                internal: Some(details),
                message,
            } => {
                tracing::error!(details = %details, message = %message, "Internal error occurred");
            }
            Self::Model(err) => {
                tracing::error!(error = ?err, "Untranslated model error");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "API error"
                );
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();
        (self.status_code(), Json(self.entries())).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Model(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ModelError> for ApiError {
    fn from(err: ModelError) -> Self {
        Self::Model(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DbErr;
    use serde_json::json;

    #[test]
    fn test_all_status_codes() {
        let test_cases = vec![
            (ApiError::bad_request("x"), StatusCode::BAD_REQUEST),
            (ApiError::forbidden("x"), StatusCode::FORBIDDEN),
            (ApiError::not_found("x"), StatusCode::NOT_FOUND),
            (ApiError::method_not_allowed("x"), StatusCode::METHOD_NOT_ALLOWED),
            (ApiError::not_acceptable("x"), StatusCode::NOT_ACCEPTABLE),
            (ApiError::not_implemented("x"), StatusCode::NOT_IMPLEMENTED),
            (
                ApiError::unsupported_media_type("x"),
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ),
            (ApiError::unprocessable("x"), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::lock_conflict("x"), StatusCode::CONFLICT),
            (ApiError::internal("x", None), StatusCode::INTERNAL_SERVER_ERROR),
            (
                ApiError::Model(ModelError::Database(DbErr::Custom("boom".into()))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected_status) in test_cases {
            assert_eq!(err.status_code(), expected_status);
        }
    }

    #[test]
    fn test_model_error_message_is_sanitized() {
        let err = ApiError::from(ModelError::Database(DbErr::Custom(
            "connection string postgres://secret".into(),
        )));
        assert!(!err.user_message().contains("secret"));
        assert_eq!(err.entries()[0].name, "InternalServerError");
    }

    #[test]
    fn test_entries_without_details() {
        let entries = ApiError::forbidden("Hints are not enabled for this resource").entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Forbidden");
        assert_eq!(entries[0].message, "Hints are not enabled for this resource");
    }

    #[test]
    fn test_entries_with_details() {
        let err = ApiError::unprocessable_with(
            "Validation failed",
            vec![
                ErrorEntry::new("ValidatorError", "Path `name` is required.")
                    .with_path("name")
                    .with_type("required"),
                ErrorEntry::new("ValidatorError", "Path `age` is invalid.").with_path("age"),
            ],
        );
        let entries = err.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path.as_deref(), Some("name"));
    }

    #[test]
    fn test_entry_serialization_skips_missing_fields() {
        let entry = ErrorEntry::new("ValidatorError", "Path `name` (Radish) must be unique.")
            .with_path("name")
            .with_type("unique")
            .with_value(json!("Radish"));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            json!({
                "message": "Path `name` (Radish) must be unique.",
                "name": "ValidatorError",
                "path": "name",
                "type": "unique",
                "value": "Radish"
            })
        );
    }

    #[test]
    fn test_display_trait() {
        let err = ApiError::bad_request("Test error");
        assert_eq!(format!("{err}"), "Test error");
    }
}
