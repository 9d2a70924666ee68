use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::config::GateConfig;
use crate::errors::GateResult;
use crate::server::handlers::{
    activate_handler, health_handler, sync_handler, version_check_handler, AppState,
};
use crate::server::logging::request_logging_middleware;

#[cfg(feature = "rate-limiting")]
use crate::server::client_ip::ClientIpSource;
#[cfg(feature = "rate-limiting")]
use crate::server::rate_limit::{client_address_middleware, create_rate_limiter, RateLimitType};

pub const VERSION_CHECK_PATH: &str = "/api/v1/public/version-check";
pub const ACTIVATE_PATH: &str = "/api/v1/public/activate";
pub const SYNC_PATH: &str = "/api/v1/secure/sync";
pub const HEALTH_PATH: &str = "/health";

/// Build the application router.
///
/// # Routes
///
/// - `GET /api/v1/public/version-check` - Version gate, issues a handshake
/// - `POST /api/v1/public/activate` - Signed one-time license activation
/// - `POST /api/v1/secure/sync` - Subscription listing for a session
/// - `GET /health` - Liveness and database status
///
/// With the `rate-limiting` feature and `rate_limit.enabled`, each gate
/// route carries its own per-IP limit, keyed by the same client IP as the
/// handshake store. Every route goes through the request logging middleware.
pub fn build_router(state: AppState, config: &GateConfig) -> GateResult<Router> {
    let version_check =
        Router::<AppState>::new().route(VERSION_CHECK_PATH, get(version_check_handler));
    let activate = Router::<AppState>::new().route(ACTIVATE_PATH, post(activate_handler));
    let sync = Router::<AppState>::new().route(SYNC_PATH, post(sync_handler));

    #[cfg(feature = "rate-limiting")]
    let gated = if config.rate_limit.enabled {
        let limits = &config.rate_limit;
        Router::<AppState>::new()
            .merge(version_check.route_layer(create_rate_limiter(limits, RateLimitType::VersionCheck)?))
            .merge(activate.route_layer(create_rate_limiter(limits, RateLimitType::Activate)?))
            .merge(sync.route_layer(create_rate_limiter(limits, RateLimitType::Sync)?))
            .layer(middleware::from_fn_with_state(
                ClientIpSource::from_config(&config.server),
                client_address_middleware,
            ))
    } else {
        version_check.merge(activate).merge(sync)
    };

    #[cfg(not(feature = "rate-limiting"))]
    let gated = {
        let _ = config;
        version_check.merge(activate).merge(sync)
    };

    let router = Router::<AppState>::new()
        .merge(gated)
        .route(HEALTH_PATH, get(health_handler))
        .layer(middleware::from_fn(request_logging_middleware))
        .with_state(state);

    Ok(router)
}
