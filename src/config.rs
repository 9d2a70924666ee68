//! Configuration for the gate server.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `GATE_SERVER_HOST` / `GATE_SERVER_PORT` (or `PORT`) - Bind address
//! - `GATE_TRUST_PROXY` - Derive client identity from forwarding headers
//! - `GATE_PROXY_HOPS` - Number of trusted proxies in front of the server
//! - `GATE_DATABASE_TYPE` - `sqlite` or `postgres`
//! - `GATE_DATABASE_URL` - Connection URL (routed by scheme)
//! - `GATE_DATABASE_AUTO_MIGRATE` - Create tables on startup
//! - `GATE_LOG_LEVEL` - trace, debug, info, warn, error
//! - `GATE_HANDSHAKE_TTL_SECS` - Handshake lifetime
//! - `GATE_SHARED_SECRET` (or `API_SHARED_SECRET`) - Request signature secret
//! - `GATE_CLIENT_USER_AGENT` - Required client User-Agent
//! - `GATE_JWT_SECRET` (or `JWT_SECRET`) - Session credential signing key
//! - `GATE_LOADER_PRODUCT` - Product row holding the loader release
//!
//! Secret values may be written as `env:VAR_NAME` to read them from another
//! environment variable at startup.

use config::Config;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use chrono::Duration;

use crate::challenge::{ChallengeSettings, HashCost};
use crate::errors::{GateError, GateResult};
use crate::license::ActivationPolicy;

/// Upper bound applied to `handshake.ttl_secs`.
const MAX_HANDSHAKE_TTL_SECS: u64 = 86_400;

/// Global configuration singleton.
static CONFIG: OnceLock<GateConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub handshake: HandshakeConfig,
    pub signature: SignatureConfig,
    pub client: ClientConfig,
    pub credential: CredentialConfig,
    pub loader: LoaderConfig,
    pub activation: ActivationConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Take the client identity from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that appends to those headers.
    pub trust_proxy: bool,
    /// Number of trusted proxies in front of the server. The client is the
    /// `X-Forwarded-For` entry this many positions from the right.
    pub proxy_hops: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            trust_proxy: false,
            proxy_hops: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    pub sqlite_url: String,
    pub postgres_url: String,
    /// Create missing tables on startup
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://loadergate.db?mode=rwc".to_string(),
            postgres_url: "postgres://localhost/loadergate".to_string(),
            auto_migrate: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Handshake challenge store tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// Interval of the expired-entry sweep (0 disables it)
    pub sweep_interval_secs: u64,
    pub hash_memory_kib: u32,
    pub hash_iterations: u32,
    pub hash_parallelism: u32,
    /// Sync must present an `awaiting-sync` handshake
    pub require_for_sync: bool,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        let cost = HashCost::default();
        Self {
            ttl_secs: 60,
            max_entries: 10_000,
            sweep_interval_secs: 30,
            hash_memory_kib: cost.memory_kib,
            hash_iterations: cost.iterations,
            hash_parallelism: cost.parallelism,
            require_for_sync: true,
        }
    }
}

impl HandshakeConfig {
    pub fn challenge_settings(&self) -> ChallengeSettings {
        ChallengeSettings {
            ttl: Duration::seconds(self.ttl_secs.min(MAX_HANDSHAKE_TTL_SECS) as i64),
            max_entries: self.max_entries,
            cost: HashCost {
                memory_kib: self.hash_memory_kib,
                iterations: self.hash_iterations,
                parallelism: self.hash_parallelism,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SignatureConfig {
    /// Shared secret for `X-Signature` (use `env:VAR_NAME` to indirect)
    pub shared_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Required `User-Agent` on mutating requests (empty disables the check)
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: "MyLoader".to_string(),
        }
    }
}

/// Session credential settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// HS256 signing key (use `env:VAR_NAME` to indirect)
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub validity_days: i64,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: "loadergate".to_string(),
            audience: "loader-client".to_string(),
            validity_days: 14,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Name of the product row that describes the loader release
    pub product_name: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            product_name: "loader".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub require_assigned_user: bool,
    pub reject_duplicate_subscription: bool,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            require_assigned_user: true,
            reject_duplicate_subscription: true,
        }
    }
}

impl ActivationConfig {
    pub fn policy(&self) -> ActivationPolicy {
        ActivationPolicy {
            require_assigned_user: self.require_assigned_user,
            reject_duplicate_subscription: self.reject_duplicate_subscription,
        }
    }
}

/// Per-client-IP limits for public endpoints (`rate-limiting` feature).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// version-check requests per minute
    pub version_check_rpm: u32,
    /// activate requests per hour
    pub activate_per_hour: u32,
    /// sync requests per minute
    pub sync_rpm: u32,
    /// Allowed burst above the steady rate
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            version_check_rpm: 7,
            activate_per_hour: 10,
            sync_rpm: 30,
            burst_size: 5,
        }
    }
}

fn config_error(e: config::ConfigError) -> GateError {
    GateError::Config(e.to_string())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

/// Resolve a secret value, following an `env:VAR_NAME` indirection.
pub fn resolve_secret(value: &str, field: &str) -> GateResult<String> {
    match value.strip_prefix("env:") {
        Some(var) => env::var(var).map_err(|_| {
            GateError::Config(format!(
                "environment variable '{var}' not found for {field}"
            ))
        }),
        None => Ok(value.to_string()),
    }
}

impl GateConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    pub fn load() -> GateResult<Self> {
        let defaults = GateConfig::default();

        let builder = Config::builder()
            .set_default("server.host", defaults.server.host)
            .map_err(config_error)?
            .set_default("server.port", i64::from(defaults.server.port))
            .map_err(config_error)?
            .set_default("server.trust_proxy", defaults.server.trust_proxy)
            .map_err(config_error)?
            .set_default("server.proxy_hops", defaults.server.proxy_hops as i64)
            .map_err(config_error)?
            .set_default("database.db_type", defaults.database.db_type)
            .map_err(config_error)?
            .set_default("database.sqlite_url", defaults.database.sqlite_url)
            .map_err(config_error)?
            .set_default("database.postgres_url", defaults.database.postgres_url)
            .map_err(config_error)?
            .set_default("database.auto_migrate", defaults.database.auto_migrate)
            .map_err(config_error)?
            .set_default("logging.level", defaults.logging.level)
            .map_err(config_error)?
            .set_default("client.user_agent", defaults.client.user_agent)
            .map_err(config_error)?
            .set_default("loader.product_name", defaults.loader.product_name)
            .map_err(config_error)?
            // Load from config.toml (optional)
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables
            .set_override_option("server.host", env::var("GATE_SERVER_HOST").ok())
            .map_err(config_error)?
            .set_override_option(
                "server.port",
                env_parsed::<i64>("GATE_SERVER_PORT").or_else(|| env_parsed::<i64>("PORT")),
            )
            .map_err(config_error)?
            .set_override_option("server.trust_proxy", env_parsed::<bool>("GATE_TRUST_PROXY"))
            .map_err(config_error)?
            .set_override_option("server.proxy_hops", env_parsed::<i64>("GATE_PROXY_HOPS"))
            .map_err(config_error)?
            .set_override_option("database.db_type", env::var("GATE_DATABASE_TYPE").ok())
            .map_err(config_error)?
            .set_override_option(
                "database.sqlite_url",
                env::var("GATE_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(config_error)?
            .set_override_option(
                "database.postgres_url",
                env::var("GATE_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("postgres")),
            )
            .map_err(config_error)?
            .set_override_option(
                "database.auto_migrate",
                env_parsed::<bool>("GATE_DATABASE_AUTO_MIGRATE"),
            )
            .map_err(config_error)?
            .set_override_option("logging.level", env::var("GATE_LOG_LEVEL").ok())
            .map_err(config_error)?
            .set_override_option(
                "handshake.ttl_secs",
                env_parsed::<i64>("GATE_HANDSHAKE_TTL_SECS"),
            )
            .map_err(config_error)?
            .set_override_option(
                "signature.shared_secret",
                env::var("GATE_SHARED_SECRET")
                    .or_else(|_| env::var("API_SHARED_SECRET"))
                    .ok(),
            )
            .map_err(config_error)?
            .set_override_option("client.user_agent", env::var("GATE_CLIENT_USER_AGENT").ok())
            .map_err(config_error)?
            .set_override_option(
                "credential.jwt_secret",
                env::var("GATE_JWT_SECRET")
                    .or_else(|_| env::var("JWT_SECRET"))
                    .ok(),
            )
            .map_err(config_error)?
            .set_override_option("loader.product_name", env::var("GATE_LOADER_PRODUCT").ok())
            .map_err(config_error)?;

        let settings = builder
            .build()
            .map_err(|e| GateError::Config(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| GateError::Config(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> GateResult<()> {
        if self.server.port == 0 {
            return Err(GateError::Config(
                "server.port must be greater than 0".to_string(),
            ));
        }
        if self.server.trust_proxy && self.server.proxy_hops == 0 {
            return Err(GateError::Config(
                "server.proxy_hops must be at least 1 when server.trust_proxy is set".to_string(),
            ));
        }

        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(GateError::Config(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(GateError::Config(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        if self.handshake.ttl_secs == 0 {
            return Err(GateError::Config(
                "handshake.ttl_secs must be greater than 0".to_string(),
            ));
        }
        if self.handshake.max_entries == 0 {
            return Err(GateError::Config(
                "handshake.max_entries must be greater than 0".to_string(),
            ));
        }
        // Argon2 rejects these at construction; fail at startup instead.
        crate::challenge::SecretHasher::new(self.handshake.challenge_settings().cost)?;

        if self.credential.validity_days <= 0 {
            return Err(GateError::Config(
                "credential.validity_days must be greater than 0".to_string(),
            ));
        }
        if self.credential.jwt_secret.is_empty() {
            return Err(GateError::Config(
                "credential.jwt_secret is required (set GATE_JWT_SECRET)".to_string(),
            ));
        }

        if self.loader.product_name.is_empty() {
            return Err(GateError::Config(
                "loader.product_name cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// The resolved shared secret, `None` when unset.
    pub fn shared_secret(&self) -> GateResult<Option<String>> {
        let secret = resolve_secret(&self.signature.shared_secret, "signature.shared_secret")?;
        Ok(Some(secret).filter(|s| !s.is_empty()))
    }

    /// Active connection URL for the configured backend.
    pub fn database_url(&self) -> &str {
        match self.database.db_type.as_str() {
            "postgres" => &self.database.postgres_url,
            _ => &self.database.sqlite_url,
        }
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
/// Returns an error if configuration loading or validation fails.
pub fn get_config() -> GateResult<&'static GateConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = GateConfig::load()?;
    config.validate()?;

    // Another thread may have won the race; either value is equivalent.
    let _ = CONFIG.set(config);

    CONFIG
        .get()
        .ok_or_else(|| GateError::Config("configuration was not initialized".to_string()))
}

/// Initialize configuration explicitly.
///
/// Call this early in your application to catch configuration errors.
pub fn init_config() -> GateResult<&'static GateConfig> {
    get_config()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GateConfig {
        let mut config = GateConfig::default();
        config.credential.jwt_secret = "jwt".to_string();
        config
    }

    #[test]
    fn defaults() {
        let config = GateConfig::default();
        assert_eq!(config.server.port, 4000);
        assert!(!config.server.trust_proxy);
        assert_eq!(config.server.proxy_hops, 1);
        assert_eq!(config.handshake.ttl_secs, 60);
        assert_eq!(config.credential.validity_days, 14);
        assert_eq!(config.client.user_agent, "MyLoader");
        assert_eq!(config.rate_limit.activate_per_hour, 10);
        assert!(config.activation.policy().require_assigned_user);
    }

    #[test]
    fn missing_jwt_secret_fails_validation() {
        assert!(GateConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn empty_shared_secret_is_allowed() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert_eq!(config.shared_secret().unwrap(), None);
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = valid();
        config.database.db_type = "mysql".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.handshake.ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.handshake.hash_parallelism = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.server.trust_proxy = true;
        config.server.proxy_hops = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn challenge_settings_follow_config() {
        let mut config = valid();
        config.handshake.ttl_secs = 90;
        let settings = config.handshake.challenge_settings();
        assert_eq!(settings.ttl, Duration::seconds(90));
        assert_eq!(settings.max_entries, 10_000);
    }

    #[test]
    fn literal_secret_resolves_to_itself() {
        assert_eq!(resolve_secret("plain", "x").unwrap(), "plain");
        assert!(resolve_secret("env:LOADERGATE_SURELY_UNSET_VAR", "x").is_err());
    }
}
