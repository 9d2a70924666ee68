//! Request body signatures.
//!
//! Wire contract: `X-Signature = hex(SHA-256(raw_body ‖ shared_secret))`,
//! computed over the exact bytes sent on the wire. The server never
//! re-serializes the body before checking it. Either hex case is accepted.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Length of a SHA-256 digest in bytes.
pub const DIGEST_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signature header is missing")]
    MissingHeader,
    #[error("request body is empty")]
    EmptyBody,
    #[error("shared secret is not configured")]
    MissingSecret,
    #[error("signature is not a hex-encoded SHA-256 digest")]
    InvalidEncoding,
    #[error("signature does not match request body")]
    Mismatch,
}

fn digest(body: &[u8], secret: &str) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}

/// Compute the lowercase hex signature for `body`.
///
/// # Example
/// ```
/// use loadergate::signature::{compute_signature, verify};
///
/// let sig = compute_signature(br#"{"license":"L1"}"#, "s3cret");
/// assert_eq!(sig.len(), 64);
/// assert!(verify(br#"{"license":"L1"}"#, &sig, "s3cret"));
/// ```
pub fn compute_signature(body: &[u8], secret: &str) -> String {
    hex::encode(digest(body, secret))
}

/// True iff `signature_hex` is the digest of exactly `body ‖ secret`.
///
/// The byte comparison is constant-time; malformed hex is simply `false`.
pub fn verify(body: &[u8], signature_hex: &str, secret: &str) -> bool {
    match decode_signature(signature_hex) {
        Ok(presented) => matches_digest(body, &presented, secret),
        Err(_) => false,
    }
}

fn decode_signature(signature_hex: &str) -> Result<[u8; DIGEST_SIZE], SignatureError> {
    let bytes = hex::decode(signature_hex.trim()).map_err(|_| SignatureError::InvalidEncoding)?;
    bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidEncoding)
}

fn matches_digest(body: &[u8], presented: &[u8; DIGEST_SIZE], secret: &str) -> bool {
    let expected = digest(body, secret);
    bool::from(expected[..].ct_eq(&presented[..]))
}

/// Checks request signatures against the configured shared secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
}

impl SignatureVerifier {
    /// An empty secret counts as unconfigured.
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    /// Check `header` against `body`.
    ///
    /// Rejections are ordered: missing header, empty body, missing secret,
    /// malformed hex, digest mismatch.
    pub fn check(&self, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(SignatureError::MissingHeader)?;

        if body.is_empty() {
            return Err(SignatureError::EmptyBody);
        }

        let secret = self.secret.as_deref().ok_or(SignatureError::MissingSecret)?;
        let presented = decode_signature(header)?;

        if matches_digest(body, &presented, secret) {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("configured", &self.is_configured())
            .finish()
    }
}
