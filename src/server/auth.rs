//! Bearer session credentials for protected routes.
//!
//! # Usage
//!
//! ```rust,ignore
//! use loadergate::server::auth::SessionCredential;
//!
//! async fn protected_handler(session: SessionCredential) -> impl IntoResponse {
//!     format!("activation {}", session.claims.activation_id)
//! }
//! ```
//!
//! A missing or non-Bearer `Authorization` header is a 401. A credential
//! that is forged, for another audience or expired is a 403. The hardware
//! binding is checked by the handler, which is the one that knows the
//! `hwid` presented with the request.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use crate::credential::{CredentialError, SessionClaims};
use crate::server::api_error::ApiError;
use crate::server::handlers::AppState;

/// A verified (signature, issuer, audience, expiry) session credential.
#[derive(Debug, Clone)]
pub struct SessionCredential {
    pub claims: SessionClaims,
}

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, CredentialError> {
    let header = headers
        .get(AUTHORIZATION)
        .ok_or(CredentialError::Missing)?
        .to_str()
        .map_err(|_| CredentialError::Missing)?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(CredentialError::Missing)
}

#[async_trait]
impl FromRequestParts<AppState> for SessionCredential {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let claims = state.credentials.verify(token)?;
        Ok(SessionCredential { claims })
    }
}
