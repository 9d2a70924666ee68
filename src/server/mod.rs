//! Server-side components.
//!
//! This module contains:
//! - `database`    → DB abstraction over SQLite/Postgres, activation transaction
//! - `handlers`    → Axum HTTP handlers and shared `AppState`
//! - `auth`        → Bearer session credential extractor
//! - `client_ip`   → Client identity extraction
//! - `api_error`   → JSON error envelope
//! - `logging`     → Request logging middleware and gate audit events
//! - `routes`      → Router builder
//! - `rate_limit`  → Rate limiting layers (requires `rate-limiting` feature)

pub mod api_error;
pub mod auth;
pub mod client_ip;
pub mod database;
pub mod handlers;
pub mod logging;
pub mod routes;

#[cfg(feature = "rate-limiting")]
pub mod rate_limit;

pub use api_error::{ApiError, ErrorCode};
pub use auth::SessionCredential;
pub use client_ip::ClientKey;
pub use database::Database;
pub use handlers::{
    activate_handler, health_handler, sync_handler, version_check_handler, AppState,
};
pub use logging::{log_gate_event, GateEvent};
pub use routes::build_router;

#[cfg(feature = "rate-limiting")]
pub use rate_limit::{client_address_middleware, create_rate_limiter, RateLimitType};
