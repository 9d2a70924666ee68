//! Short-lived, single-use handshake secrets.
//!
//! The store keeps one live challenge per client key. Only a slow, salted
//! Argon2id hash of the secret is retained; the plaintext is handed to the
//! caller once by [`ChallengeStore::issue`] and never stored.
//!
//! # Concurrency
//!
//! Entries live in a `DashMap`. [`ChallengeStore::consume`] removes the entry
//! atomically *before* classifying it, so two concurrent callers can never
//! both observe the same challenge: one gets the entry, the other gets
//! `NotFound`. Every outcome except `NotFound` therefore deletes the
//! challenge, including a wrong guess.
//!
//! # Bounds
//!
//! Expiry is checked lazily on access. Memory is bounded by `max_entries`:
//! issuing for a new client at capacity first purges expired entries and
//! then evicts the oldest one. [`ChallengeStore::purge_expired`] can also be
//! driven from a periodic sweep.

use std::fmt;
use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::TryRngCore;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::errors::{GateError, GateResult};

/// Size of the random handshake secret in bytes (128 bits).
pub const SECRET_SIZE: usize = 16;

/// Size of the per-hash salt in bytes.
pub const SALT_SIZE: usize = 16;

/// The next action a handshake authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Purpose {
    AwaitingSync,
    AwaitingActivation,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::AwaitingSync => "awaiting-sync",
            Purpose::AwaitingActivation => "awaiting-activation",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a handshake secret was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ChallengeError {
    #[error("handshake token is missing")]
    Missing,
    #[error("no active handshake session found")]
    NotFound,
    #[error("handshake session has expired")]
    Expired,
    #[error("handshake purpose mismatch")]
    PurposeMismatch,
    #[error("handshake token is invalid")]
    Invalid,
}

/// Result of presenting a secret to [`ChallengeStore::consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    Accepted,
    Expired,
    NotFound,
    PurposeMismatch,
    Invalid,
}

impl ConsumeOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ConsumeOutcome::Accepted)
    }

    pub fn into_result(self) -> Result<(), ChallengeError> {
        match self {
            ConsumeOutcome::Accepted => Ok(()),
            ConsumeOutcome::Expired => Err(ChallengeError::Expired),
            ConsumeOutcome::NotFound => Err(ChallengeError::NotFound),
            ConsumeOutcome::PurposeMismatch => Err(ChallengeError::PurposeMismatch),
            ConsumeOutcome::Invalid => Err(ChallengeError::Invalid),
        }
    }
}

/// Argon2id work factor for handshake hashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCost {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Time cost (iterations).
    pub iterations: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        // OWASP Argon2id baseline: 19 MiB, 2 passes, 1 lane
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl HashCost {
    /// Cheapest parameters argon2 accepts. Tests only.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }
}

/// Slow salted one-way hashing of handshake secrets.
#[derive(Clone)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl SecretHasher {
    pub fn new(cost: HashCost) -> GateResult<Self> {
        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| GateError::Config(format!("invalid handshake hash cost: {e}")))?;

        Ok(Self {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }

    /// Hash `secret` with a fresh random salt, returning a PHC string.
    pub fn hash(&self, secret: &str) -> GateResult<String> {
        let mut salt_bytes = [0u8; SALT_SIZE];
        OsRng
            .try_fill_bytes(&mut salt_bytes)
            .map_err(|e| GateError::Internal(format!("OS random source failed: {e}")))?;
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| GateError::Internal(format!("salt encoding failed: {e}")))?;

        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| GateError::Internal(format!("handshake hashing failed: {e}")))
    }

    /// Check `candidate` against a PHC string produced by [`SecretHasher::hash`].
    pub fn verify(&self, candidate: &str, phc: &str) -> GateResult<bool> {
        let parsed = PasswordHash::new(phc)
            .map_err(|e| GateError::Internal(format!("stored handshake hash is corrupt: {e}")))?;

        match self.argon2.verify_password(candidate.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(GateError::Internal(format!(
                "handshake verification failed: {e}"
            ))),
        }
    }
}

impl fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretHasher").finish_non_exhaustive()
    }
}

/// Store tuning.
#[derive(Debug, Clone)]
pub struct ChallengeSettings {
    /// Lifetime of an issued challenge.
    pub ttl: Duration,
    /// Maximum number of live challenges.
    pub max_entries: usize,
    /// Argon2id work factor.
    pub cost: HashCost,
}

impl Default for ChallengeSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::seconds(60),
            max_entries: 10_000,
            cost: HashCost::default(),
        }
    }
}

#[derive(Clone)]
struct Challenge {
    secret_hash: String,
    purpose: Purpose,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Concurrent store of live handshake challenges keyed by client identity.
pub struct ChallengeStore {
    entries: DashMap<String, Challenge>,
    hasher: SecretHasher,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_entries: usize,
}

impl ChallengeStore {
    pub fn new(settings: ChallengeSettings, clock: Arc<dyn Clock>) -> GateResult<Self> {
        if settings.max_entries == 0 {
            return Err(GateError::Config(
                "handshake.max_entries must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            entries: DashMap::with_capacity(settings.max_entries.min(1024)),
            hasher: SecretHasher::new(settings.cost)?,
            clock,
            ttl: settings.ttl,
            max_entries: settings.max_entries,
        })
    }

    /// Issue a new challenge for `client_key`, replacing any live one.
    ///
    /// Returns the plaintext secret (hex, 128 bits). It is not retained.
    pub fn issue(&self, client_key: &str, purpose: Purpose) -> GateResult<String> {
        let mut secret_bytes = [0u8; SECRET_SIZE];
        OsRng
            .try_fill_bytes(&mut secret_bytes)
            .map_err(|e| GateError::Internal(format!("OS random source failed: {e}")))?;
        let secret = hex::encode(secret_bytes);

        let secret_hash = self.hasher.hash(&secret)?;
        let issued_at = self.clock.now();

        self.make_room(client_key);
        self.entries.insert(
            client_key.to_string(),
            Challenge {
                secret_hash,
                purpose,
                issued_at,
                expires_at: issued_at + self.ttl,
            },
        );

        debug!(purpose = %purpose, "handshake challenge issued");
        Ok(secret)
    }

    /// Present `candidate` for the challenge held under `client_key`.
    ///
    /// The challenge is removed before it is inspected, so at most one
    /// caller can ever be `Accepted` for it.
    pub fn consume(
        &self,
        client_key: &str,
        purpose: Purpose,
        candidate: &str,
    ) -> GateResult<ConsumeOutcome> {
        let Some((_, challenge)) = self.entries.remove(client_key) else {
            return Ok(ConsumeOutcome::NotFound);
        };

        if self.clock.now() > challenge.expires_at {
            return Ok(ConsumeOutcome::Expired);
        }

        if challenge.purpose != purpose {
            return Ok(ConsumeOutcome::PurposeMismatch);
        }

        match self.hasher.verify(candidate, &challenge.secret_hash) {
            Ok(true) => Ok(ConsumeOutcome::Accepted),
            Ok(false) => Ok(ConsumeOutcome::Invalid),
            Err(e) => {
                error!("handshake verification error: {e}");
                Err(e)
            }
        }
    }

    /// Drop every expired challenge. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, challenge| challenge.expires_at >= now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of live (possibly expired, not yet swept) challenges.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Make space for a challenge for `client_key` when at capacity.
    fn make_room(&self, client_key: &str) {
        if self.entries.contains_key(client_key) || self.entries.len() < self.max_entries {
            return;
        }

        self.purge_expired();

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().issued_at)
                .map(|entry| entry.key().clone());

            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    debug!("evicted oldest handshake challenge at capacity");
                }
                None => break,
            }
        }
    }
}

impl fmt::Debug for ChallengeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("live", &self.entries.len())
            .field("ttl_secs", &self.ttl.num_seconds())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}
