//! Per-IP rate limiting for the public gate endpoints.
//!
//! # Configuration
//!
//! ```toml
//! [rate_limit]
//! enabled = true
//! version_check_rpm = 7    # ~100 per 15 minutes
//! activate_per_hour = 10
//! sync_rpm = 30
//! burst_size = 5
//! ```
//!
//! Limits are keyed by the same client IP as handshakes: forwarding headers
//! count only under `server.trust_proxy`, and then only the entry
//! `server.proxy_hops` from the right. `client_address_middleware` rewrites
//! the peer address to that IP so `PeerIpKeyExtractor` sees it. Rejected
//! requests get a 429 with `Retry-After`. The server must be started with
//! `.into_make_service_with_connect_info::<SocketAddr>()`.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use governor::middleware::NoOpMiddleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::governor::GovernorConfigBuilder;

pub use tower_governor::key_extractor::PeerIpKeyExtractor;
pub use tower_governor::GovernorLayer;

use crate::config::RateLimitConfig;
use crate::errors::{GateError, GateResult};
use crate::server::client_ip::ClientIpSource;

const MINUTE_MS: u64 = 60_000;
const HOUR_MS: u64 = 3_600_000;

/// Endpoint groups with their own limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitType {
    /// `GET /api/v1/public/version-check`
    VersionCheck,
    /// `POST /api/v1/public/activate`
    Activate,
    /// `POST /api/v1/secure/sync`
    Sync,
}

/// Milliseconds between replenished permits for `limit_type`.
pub fn replenish_interval_ms(config: &RateLimitConfig, limit_type: RateLimitType) -> u64 {
    let (count, window) = match limit_type {
        RateLimitType::VersionCheck => (config.version_check_rpm, MINUTE_MS),
        RateLimitType::Activate => (config.activate_per_hour, HOUR_MS),
        RateLimitType::Sync => (config.sync_rpm, MINUTE_MS),
    };

    if count == 0 {
        window
    } else {
        (window / u64::from(count)).max(1)
    }
}

/// Create a rate limiting layer for the given endpoint group.
pub fn create_rate_limiter(
    config: &RateLimitConfig,
    limit_type: RateLimitType,
) -> GateResult<GovernorLayer<PeerIpKeyExtractor, NoOpMiddleware>> {
    let governor_config = GovernorConfigBuilder::default()
        .per_millisecond(replenish_interval_ms(config, limit_type))
        .burst_size(config.burst_size.max(1))
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .ok_or_else(|| {
            GateError::Config(format!("invalid rate limit settings for {limit_type:?}"))
        })?;

    Ok(GovernorLayer {
        config: Arc::new(governor_config),
    })
}

/// Replace the peer address with the resolved client IP.
///
/// Must wrap the governor layers. Requests with no resolvable IP pass
/// through untouched and are rejected by the limiter.
pub async fn client_address_middleware(
    State(source): State<ClientIpSource>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(ip) = source.resolve(request.headers(), request.extensions()) {
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(ip, 0)));
    }
    next.run(request).await
}
