//! Crate-wide error type.
//!
//! Each gate component owns a precise error enum; [`GateError`] folds them
//! into the categories the HTTP layer maps to status codes. Infrastructure
//! variants carry operator detail that is logged but never sent to clients.

use crate::challenge::ChallengeError;
use crate::credential::CredentialError;
use crate::license::LicenseStateError;
use crate::signature::SignatureError;
use crate::validation::ValidationError;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Malformed or missing request input.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Handshake secret missing, expired, misused or wrong.
    #[error("handshake rejected: {0}")]
    Challenge(#[from] ChallengeError),

    /// Request body signature missing, malformed or wrong.
    #[error("signature rejected: {0}")]
    Signature(#[from] SignatureError),

    /// License cannot make the fresh -> used transition.
    #[error("license rejected: {0}")]
    LicenseState(#[from] LicenseStateError),

    /// Session credential expired, forged or presented from another device.
    #[error("credential rejected: {0}")]
    Credential(#[from] CredentialError),

    /// The product a request refers to does not exist.
    #[error("unknown product: {0}")]
    ProductNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type GateResult<T> = Result<T, GateError>;
