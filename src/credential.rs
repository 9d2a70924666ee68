//! Hardware-bound session credentials.
//!
//! Credentials are HS256 JWTs carrying `{userId, activationId, hwid}`. They
//! are never stored server-side: validity is the signature plus expiry,
//! and protected operations additionally compare the embedded `hwid` with
//! the one presented in the request.

use std::sync::Arc;

use chrono::Duration;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::{resolve_secret, CredentialConfig};
use crate::errors::{GateError, GateResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("authorization token is missing")]
    Missing,
    #[error("session token has expired")]
    Expired,
    #[error("session token is invalid")]
    Invalid,
    #[error("hardware binding violated")]
    HardwareMismatch,
}

/// Claims embedded in a session credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    #[serde(rename = "userId")]
    pub user_id: Option<i64>,
    #[serde(rename = "activationId")]
    pub activation_id: i64,
    pub hwid: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// The presented `hwid` must be the one the credential was minted for.
pub fn check_hardware_binding(
    claims: &SessionClaims,
    presented_hwid: &str,
) -> Result<(), CredentialError> {
    if claims.hwid == presented_hwid {
        Ok(())
    } else {
        Err(CredentialError::HardwareMismatch)
    }
}

/// Mints and verifies session credentials.
#[derive(Clone)]
pub struct CredentialIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    validity: Duration,
    clock: Arc<dyn Clock>,
}

impl CredentialIssuer {
    pub fn from_config(config: &CredentialConfig, clock: Arc<dyn Clock>) -> GateResult<Self> {
        let secret = resolve_secret(&config.jwt_secret, "credential.jwt_secret")?;
        if secret.is_empty() {
            return Err(GateError::Config(
                "credential.jwt_secret is required".to_string(),
            ));
        }
        if config.validity_days <= 0 {
            return Err(GateError::Config(
                "credential.validity_days must be greater than 0".to_string(),
            ));
        }

        // Expiry is checked against the injected clock, not the system time.
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(&[&config.audience]);
        validation.validate_exp = false;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            validity: Duration::days(config.validity_days),
            clock,
        })
    }

    /// Mint a credential for a committed activation.
    pub fn issue(&self, user_id: Option<i64>, activation_id: i64, hwid: &str) -> GateResult<String> {
        let now = self.clock.now();
        let claims = SessionClaims {
            user_id,
            activation_id,
            hwid: hwid.to_string(),
            iat: now.timestamp(),
            exp: (now + self.validity).timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| GateError::Internal(format!("failed to sign session token: {e}")))
    }

    /// Verify signature, issuer, audience and expiry.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, CredentialError> {
        let data = decode::<SessionClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => CredentialError::Expired,
                _ => CredentialError::Invalid,
            })?;

        if self.clock.now().timestamp() >= data.claims.exp {
            return Err(CredentialError::Expired);
        }

        Ok(data.claims)
    }

    /// Verify `token` and its binding to `presented_hwid`.
    pub fn verify_bound(
        &self,
        token: &str,
        presented_hwid: &str,
    ) -> Result<SessionClaims, CredentialError> {
        let claims = self.verify(token)?;
        check_hardware_binding(&claims, presented_hwid)?;
        Ok(claims)
    }
}

impl std::fmt::Debug for CredentialIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialIssuer")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("validity_days", &self.validity.num_days())
            .finish()
    }
}
