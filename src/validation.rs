//! Request validation utilities.
//!
//! These run before any handshake or license state is touched, so a
//! malformed request is always rejected without side effects.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Upper bound for any identifier accepted from a client.
pub const MAX_IDENTIFIER_LEN: usize = 128;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").expect("static pattern"));

static CHECKSUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+/=_-]{1,256}$").expect("static pattern"));

/// Whether the field was absent or present with a bad value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Missing,
    Invalid,
}

/// Validation error type.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub kind: ValidationKind,
}

impl ValidationError {
    pub fn missing(field: &str) -> Self {
        Self {
            field: field.to_string(),
            message: "is required".to_string(),
            kind: ValidationKind::Missing,
        }
    }

    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
            kind: ValidationKind::Invalid,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Unwrap an optional request field, rejecting absent or blank values.
///
/// # Example
/// ```
/// use loadergate::validation::require;
///
/// assert_eq!(require(Some("1.0.0"), "version").unwrap(), "1.0.0");
/// assert!(require(None, "version").is_err());
/// assert!(require(Some("  "), "version").is_err());
/// ```
pub fn require<'a>(value: Option<&'a str>, field_name: &str) -> ValidationResult<&'a str> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ValidationError::missing(field_name)),
    }
}

/// Validate string length is within bounds.
///
/// # Example
/// ```
/// use loadergate::validation::validate_length;
///
/// assert!(validate_length("hello", 1, 10, "name").is_ok());
/// assert!(validate_length("", 1, 10, "name").is_err());
/// assert!(validate_length("a".repeat(100).as_str(), 1, 10, "name").is_err());
/// ```
pub fn validate_length(
    value: &str,
    min: usize,
    max: usize,
    field_name: &str,
) -> ValidationResult<()> {
    let len = value.len();
    if len < min {
        Err(ValidationError::invalid(
            field_name,
            format!("must be at least {} characters", min),
        ))
    } else if len > max {
        Err(ValidationError::invalid(
            field_name,
            format!("must be at most {} characters", max),
        ))
    } else {
        Ok(())
    }
}

/// Validate a license key.
///
/// Keys are opaque to the gate: 1-128 ASCII alphanumerics, `-` or `_`,
/// starting with an alphanumeric.
///
/// # Example
/// ```
/// use loadergate::validation::validate_license_key;
///
/// assert!(validate_license_key("L1", "license").is_ok());
/// assert!(validate_license_key("ABCD-EFGH-IJKL", "license").is_ok());
/// assert!(validate_license_key("bad key", "license").is_err());
/// ```
pub fn validate_license_key(value: &str, field_name: &str) -> ValidationResult<()> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            field_name,
            "invalid license key format (1-128 characters: letters, digits, '-', '_')",
        ))
    }
}

/// Validate a hardware id as supplied by the client.
///
/// # Example
/// ```
/// use loadergate::validation::validate_hardware_id;
///
/// assert!(validate_hardware_id("HW-1", "hwid").is_ok());
/// assert!(validate_hardware_id("", "hwid").is_err());
/// ```
pub fn validate_hardware_id(value: &str, field_name: &str) -> ValidationResult<()> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            field_name,
            "invalid hardware ID format (1-128 characters: letters, digits, '-', '_')",
        ))
    }
}

/// Validate a client build checksum (hex or base64 digest text).
pub fn validate_checksum(value: &str, field_name: &str) -> ValidationResult<()> {
    if CHECKSUM_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::invalid(
            field_name,
            "invalid checksum format (expected hex or base64 digest)",
        ))
    }
}
