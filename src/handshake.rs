//! Purpose-scoped handshake protocol on top of the [`ChallengeStore`].
//!
//! Hashing is deliberately slow, so both issuing and validating run on the
//! blocking thread pool instead of stalling the async runtime.

use std::str::FromStr;
use std::sync::Arc;

use tracing::warn;

use crate::challenge::{ChallengeError, ChallengeStore, ConsumeOutcome, Purpose};
use crate::errors::{GateError, GateResult};
use crate::validation::ValidationError;

/// What the client intends to do with the handshake it asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Sync,
    Activate,
}

impl Intent {
    pub fn purpose(&self) -> Purpose {
        match self {
            Intent::Sync => Purpose::AwaitingSync,
            Intent::Activate => Purpose::AwaitingActivation,
        }
    }
}

impl FromStr for Intent {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(Intent::Sync),
            "activate" => Ok(Intent::Activate),
            _ => Err(ValidationError::invalid(
                "intent",
                "must be one of: sync, activate",
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Handshake {
    store: Arc<ChallengeStore>,
}

impl Handshake {
    pub fn new(store: Arc<ChallengeStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<ChallengeStore> {
        &self.store
    }

    /// Issue a challenge for `client_key` and return its plaintext secret.
    pub async fn issue(&self, client_key: &str, purpose: Purpose) -> GateResult<String> {
        let store = Arc::clone(&self.store);
        let key = client_key.to_string();

        tokio::task::spawn_blocking(move || store.issue(&key, purpose))
            .await
            .map_err(|e| GateError::Internal(format!("handshake issue task failed: {e}")))?
    }

    /// Consume the challenge for `client_key`, requiring `purpose`.
    ///
    /// A missing token is rejected without touching the store.
    pub async fn validate(
        &self,
        client_key: &str,
        purpose: Purpose,
        token: Option<&str>,
    ) -> GateResult<()> {
        let token = match token.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => return Err(ChallengeError::Missing.into()),
        };

        let store = Arc::clone(&self.store);
        let key = client_key.to_string();

        let outcome = tokio::task::spawn_blocking(move || store.consume(&key, purpose, &token))
            .await
            .map_err(|e| GateError::Internal(format!("handshake validate task failed: {e}")))??;

        if outcome == ConsumeOutcome::PurposeMismatch {
            warn!(
                client = %client_key,
                expected = %purpose,
                "handshake presented for the wrong purpose"
            );
        }

        outcome.into_result().map_err(GateError::from)
    }
}
