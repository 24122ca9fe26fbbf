//! Error types for tabgate
//!
//! Every client-facing failure carries a human readable `message`/`action`
//! pair and a stable `error_location_code`. The HTTP layer turns an
//! [`EngineError`] into an [`ErrorBody`] with fresh `error_id`.

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Details shared by every client error variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetails {
    pub message: String,
    pub action: String,
    pub error_location_code: String,
    /// Input field the error refers to, when there is one
    pub key: Option<String>,
}

impl ErrorDetails {
    pub fn new(
        message: impl Into<String>,
        action: impl Into<String>,
        error_location_code: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            action: action.into(),
            error_location_code: error_location_code.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.error_location_code)
    }
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(ErrorDetails),

    #[error("Forbidden: {0}")]
    Forbidden(ErrorDetails),

    #[error("Not found: {0}")]
    NotFound(ErrorDetails),

    #[error("Too many requests: {0}")]
    TooManyRequests(ErrorDetails),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(ErrorDetails),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn validation(
        message: impl Into<String>,
        action: impl Into<String>,
        error_location_code: impl Into<String>,
    ) -> Self {
        Self::Validation(ErrorDetails::new(message, action, error_location_code))
    }

    pub fn validation_key(
        key: &str,
        message: impl Into<String>,
        error_location_code: impl Into<String>,
    ) -> Self {
        Self::Validation(
            ErrorDetails::new(
                message,
                format!("Adjust the \"{}\" field and try again.", key),
                error_location_code,
            )
            .with_key(key),
        )
    }

    pub fn not_found(
        message: impl Into<String>,
        action: impl Into<String>,
        error_location_code: impl Into<String>,
    ) -> Self {
        Self::NotFound(ErrorDetails::new(message, action, error_location_code))
    }

    pub fn forbidden(
        message: impl Into<String>,
        action: impl Into<String>,
        error_location_code: impl Into<String>,
    ) -> Self {
        Self::Forbidden(ErrorDetails::new(message, action, error_location_code))
    }

    pub fn unprocessable(
        message: impl Into<String>,
        action: impl Into<String>,
        error_location_code: impl Into<String>,
    ) -> Self {
        Self::UnprocessableEntity(ErrorDetails::new(message, action, error_location_code))
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::UnprocessableEntity(_) => 422,
            Self::TooManyRequests(_) => 429,
            Self::Internal(_) => 500,
        }
    }

    /// Error name as exposed to clients
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Forbidden(_) => "ForbiddenError",
            Self::NotFound(_) => "NotFoundError",
            Self::UnprocessableEntity(_) => "UnprocessableEntityError",
            Self::TooManyRequests(_) => "TooManyRequestsError",
            Self::Internal(_) => "InternalServerError",
        }
    }

    /// Client details, `None` for internal errors
    pub fn details(&self) -> Option<&ErrorDetails> {
        match self {
            Self::Validation(d)
            | Self::Forbidden(d)
            | Self::NotFound(d)
            | Self::TooManyRequests(d)
            | Self::UnprocessableEntity(d) => Some(d),
            Self::Internal(_) => None,
        }
    }

    /// Stable location code, used by tests and support tooling
    pub fn error_location_code(&self) -> &str {
        match self.details() {
            Some(d) => &d.error_location_code,
            None => "INTERNAL:UNEXPECTED",
        }
    }

    /// Build the wire body for this error
    pub fn to_body(&self, request_id: Uuid) -> ErrorBody {
        let (message, action, code, key) = match self.details() {
            Some(d) => (
                d.message.clone(),
                d.action.clone(),
                d.error_location_code.clone(),
                d.key.clone(),
            ),
            None => (
                "An unexpected error occurred.".to_string(),
                "Report the error_id to support.".to_string(),
                "INTERNAL:UNEXPECTED".to_string(),
                None,
            ),
        };

        ErrorBody {
            name: self.name().to_string(),
            message,
            action,
            status_code: self.status_code(),
            error_id: Uuid::new_v4(),
            request_id,
            error_location_code: code,
            key,
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Internal(format!("Database error: {}", e))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Internal(format!("JSON error: {}", e))
    }
}

/// Wire shape of every error response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub name: String,
    pub message: String,
    pub action: String,
    pub status_code: u16,
    pub error_id: Uuid,
    pub request_id: Uuid,
    pub error_location_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}
