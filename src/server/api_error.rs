//! Standardized API error responses for all gate endpoints.
//!
//! All error responses follow this JSON structure:
//!
//! ```json
//! {
//!   "error": {
//!     "code": "LICENSE_ALREADY_USED",
//!     "message": "License has already been used",
//!     "details": null
//!   }
//! }
//! ```
//!
//! The `details` field is optional and may contain additional context.
//! Infrastructure failures always carry the generic default message; the
//! underlying detail is logged server-side only.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::challenge::ChallengeError;
use crate::credential::CredentialError;
use crate::errors::GateError;
use crate::license::LicenseStateError;
use crate::signature::SignatureError;
use crate::validation::{ValidationError, ValidationKind};

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // === Validation Errors (400) ===
    /// Request payload is invalid or malformed
    InvalidRequest,
    /// A required field is missing
    MissingField,
    /// A field value is invalid
    InvalidField,
    /// Client version is not SemVer
    InvalidVersionFormat,
    /// `X-Signature` is not a hex SHA-256 digest
    InvalidSignatureFormat,
    /// No client identity could be derived from the request
    MissingClientAddress,

    // === Authentication Errors (401) ===
    /// No bearer credential provided
    MissingToken,

    // === Forbidden (403) ===
    /// Application identity header rejected
    ClientRejected,
    HandshakeMissing,
    HandshakeNotFound,
    HandshakeExpired,
    HandshakePurposeMismatch,
    HandshakeInvalid,
    SignatureMissing,
    SignatureMismatch,
    /// Client build checksum does not match the release
    IntegrityFailure,
    LicenseNotFound,
    LicenseUnassigned,
    LicenseAlreadyUsed,
    DuplicateSubscription,
    InvalidToken,
    TokenExpired,
    HardwareMismatch,

    // === Resource Errors (404/409) ===
    ProductNotFound,
    /// Client version is newer than the release
    VersionAhead,

    // === Server Errors (5xx) ===
    ConfigError,
    DatabaseError,
    InternalError,
}

impl ErrorCode {
    /// Returns the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            ErrorCode::InvalidRequest
            | ErrorCode::MissingField
            | ErrorCode::InvalidField
            | ErrorCode::InvalidVersionFormat
            | ErrorCode::InvalidSignatureFormat
            | ErrorCode::MissingClientAddress => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            ErrorCode::MissingToken => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            ErrorCode::ClientRejected
            | ErrorCode::HandshakeMissing
            | ErrorCode::HandshakeNotFound
            | ErrorCode::HandshakeExpired
            | ErrorCode::HandshakePurposeMismatch
            | ErrorCode::HandshakeInvalid
            | ErrorCode::SignatureMissing
            | ErrorCode::SignatureMismatch
            | ErrorCode::IntegrityFailure
            | ErrorCode::LicenseNotFound
            | ErrorCode::LicenseUnassigned
            | ErrorCode::LicenseAlreadyUsed
            | ErrorCode::DuplicateSubscription
            | ErrorCode::InvalidToken
            | ErrorCode::TokenExpired
            | ErrorCode::HardwareMismatch => StatusCode::FORBIDDEN,

            // 404 Not Found
            ErrorCode::ProductNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            ErrorCode::VersionAhead => StatusCode::CONFLICT,

            // 500 Internal Server Error
            ErrorCode::ConfigError | ErrorCode::DatabaseError | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns a default human-readable message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "Request payload is invalid",
            ErrorCode::MissingField => "A required field is missing",
            ErrorCode::InvalidField => "A field value is invalid",
            ErrorCode::InvalidVersionFormat => "Invalid version format",
            ErrorCode::InvalidSignatureFormat => "Invalid signature format",
            ErrorCode::MissingClientAddress => "Client address could not be determined",
            ErrorCode::MissingToken => "Authorization token is required",
            ErrorCode::ClientRejected => "Forbidden",
            ErrorCode::HandshakeMissing => "Handshake token is required",
            ErrorCode::HandshakeNotFound => "No active handshake session found",
            ErrorCode::HandshakeExpired => "Handshake session has expired",
            ErrorCode::HandshakePurposeMismatch => "Handshake purpose mismatch",
            ErrorCode::HandshakeInvalid => "Invalid handshake token",
            ErrorCode::SignatureMissing => "Missing request signature",
            ErrorCode::SignatureMismatch => "Invalid request signature",
            ErrorCode::IntegrityFailure => "Client integrity check failed",
            ErrorCode::LicenseNotFound => "Invalid license",
            ErrorCode::LicenseUnassigned => "License is not assigned to a user",
            ErrorCode::LicenseAlreadyUsed => "License has already been used",
            ErrorCode::DuplicateSubscription => {
                "You already have an active subscription for this product"
            }
            ErrorCode::InvalidToken => "Invalid session token",
            ErrorCode::TokenExpired => "Session token has expired",
            ErrorCode::HardwareMismatch => "Hardware binding violated",
            ErrorCode::ProductNotFound => "Product not found",
            ErrorCode::VersionAhead => "Client version is newer than the latest release",
            ErrorCode::ConfigError => "Server configuration error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::InternalError => "An unexpected error occurred",
        }
    }
}

/// The inner error object containing code, message, and optional details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details (field name, constraint violated, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Standardized API error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ErrorBody,
}

impl ApiError {
    /// Creates a new API error with the default message for `code`.
    pub fn new(code: ErrorCode) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: code.default_message().to_string(),
                details: None,
            },
        }
    }

    /// Creates a new API error with a custom message.
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    /// Creates a new API error with a custom message and details.
    pub fn with_details(
        code: ErrorCode,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ErrorBody {
                code,
                message: message.into(),
                details: Some(details),
            },
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.error.code.status_code()
    }

    pub fn code(&self) -> ErrorCode {
        self.error.code
    }

    /// Invalid field error with field details.
    pub fn invalid_field(field: &str, reason: &str) -> Self {
        Self::with_details(
            ErrorCode::InvalidField,
            format!("Invalid value for '{}': {}", field, reason),
            serde_json::json!({ "field": field }),
        )
    }

    /// Missing required field error.
    pub fn missing_field(field: &str) -> Self {
        Self::with_details(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
            serde_json::json!({ "field": field }),
        )
    }

    /// Internal server error.
    pub fn internal_error() -> Self {
        Self::new(ErrorCode::InternalError)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(self)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}",
            self.error.code.default_message(),
            self.error.message
        )
    }
}

impl std::error::Error for ApiError {}

// === Conversions from gate error types ===

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err.kind {
            ValidationKind::Missing => ApiError::missing_field(&err.field),
            ValidationKind::Invalid => ApiError::invalid_field(&err.field, &err.message),
        }
    }
}

impl From<ChallengeError> for ApiError {
    fn from(err: ChallengeError) -> Self {
        ApiError::new(match err {
            ChallengeError::Missing => ErrorCode::HandshakeMissing,
            ChallengeError::NotFound => ErrorCode::HandshakeNotFound,
            ChallengeError::Expired => ErrorCode::HandshakeExpired,
            ChallengeError::PurposeMismatch => ErrorCode::HandshakePurposeMismatch,
            ChallengeError::Invalid => ErrorCode::HandshakeInvalid,
        })
    }
}

impl From<SignatureError> for ApiError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::MissingHeader => ApiError::new(ErrorCode::SignatureMissing),
            SignatureError::EmptyBody => {
                ApiError::with_message(ErrorCode::InvalidRequest, "Request body is empty")
            }
            SignatureError::MissingSecret => {
                error!("request signature check failed: shared secret is not configured");
                ApiError::new(ErrorCode::ConfigError)
            }
            SignatureError::InvalidEncoding => ApiError::new(ErrorCode::InvalidSignatureFormat),
            SignatureError::Mismatch => ApiError::new(ErrorCode::SignatureMismatch),
        }
    }
}

impl From<LicenseStateError> for ApiError {
    fn from(err: LicenseStateError) -> Self {
        ApiError::new(match err {
            LicenseStateError::NotFound => ErrorCode::LicenseNotFound,
            LicenseStateError::Unassigned => ErrorCode::LicenseUnassigned,
            LicenseStateError::AlreadyUsed => ErrorCode::LicenseAlreadyUsed,
            LicenseStateError::DuplicateSubscription => ErrorCode::DuplicateSubscription,
        })
    }
}

impl From<CredentialError> for ApiError {
    fn from(err: CredentialError) -> Self {
        ApiError::new(match err {
            CredentialError::Missing => ErrorCode::MissingToken,
            CredentialError::Expired => ErrorCode::TokenExpired,
            CredentialError::Invalid => ErrorCode::InvalidToken,
            CredentialError::HardwareMismatch => ErrorCode::HardwareMismatch,
        })
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Validation(e) => e.into(),
            GateError::Challenge(e) => e.into(),
            GateError::Signature(e) => e.into(),
            GateError::LicenseState(e) => e.into(),
            GateError::Credential(e) => e.into(),
            GateError::ProductNotFound(_) => ApiError::new(ErrorCode::ProductNotFound),
            GateError::Config(detail) => {
                error!("configuration error: {detail}");
                ApiError::new(ErrorCode::ConfigError)
            }
            GateError::Storage(detail) => {
                error!("storage error: {detail}");
                ApiError::new(ErrorCode::DatabaseError)
            }
            GateError::Internal(detail) => {
                error!("internal error: {detail}");
                ApiError::internal_error()
            }
        }
    }
}
