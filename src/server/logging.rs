//! Request logging middleware and gate audit events.
//!
//! This module provides structured logging for all API requests including:
//! - Unique request ID tracking
//! - Request timing
//! - Method, path, and status logging
//! - Request ID propagation in response headers
//!
//! Gate decisions (handshakes, signature rejections, activations) are
//! logged through [`log_gate_event`]. Secrets never appear in these events.

use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Gate audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateEvent {
    /// A handshake challenge was issued after a passing version check
    HandshakeIssued,
    /// A presented handshake was missing, expired, misused or wrong
    HandshakeRejected,
    /// Request body signature failed
    SignatureRejected,
    /// Client was told to update
    UpdateRequired,
    /// Client build checksum mismatched the release
    IntegrityFailure,
    /// License moved from fresh to used
    Activated,
    /// Activation was refused by the license guard chain
    ActivationRejected,
    /// Subscriptions listed for a session
    Synced,
}

impl std::fmt::Display for GateEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GateEvent::HandshakeIssued => "handshake_issued",
            GateEvent::HandshakeRejected => "handshake_rejected",
            GateEvent::SignatureRejected => "signature_rejected",
            GateEvent::UpdateRequired => "update_required",
            GateEvent::IntegrityFailure => "integrity_failure",
            GateEvent::Activated => "activated",
            GateEvent::ActivationRejected => "activation_rejected",
            GateEvent::Synced => "synced",
        };
        write!(f, "{}", s)
    }
}

impl GateEvent {
    fn is_rejection(&self) -> bool {
        matches!(
            self,
            GateEvent::HandshakeRejected
                | GateEvent::SignatureRejected
                | GateEvent::IntegrityFailure
                | GateEvent::ActivationRejected
        )
    }
}

/// Log a gate audit event.
///
/// * `event` - The type of gate event
/// * `subject` - Client key, license key or activation id the event is about
/// * `details` - Optional additional details about the event
pub fn log_gate_event(event: GateEvent, subject: &str, details: Option<&str>) {
    let span = info_span!(
        "gate_event",
        event = %event,
        subject = %subject,
    );
    let _enter = span.enter();

    if event.is_rejection() {
        if let Some(d) = details {
            warn!(reason = %d, "Gate event occurred");
        } else {
            warn!("Gate event occurred");
        }
    } else if let Some(d) = details {
        info!(details = %d, "Gate event occurred");
    } else {
        info!("Gate event occurred");
    }
}

/// Header name for the request ID.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Generate a new unique request ID.
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Logging middleware that tracks request timing and generates request IDs.
///
/// This middleware:
/// 1. Generates a unique request ID for each incoming request
/// 2. Creates a tracing span with the request ID
/// 3. Logs the request method and path
/// 4. Measures and logs the response time
/// 5. Adds the request ID to the response headers
pub async fn request_logging_middleware(request: Request, next: Next) -> Response<Body> {
    let request_id = generate_request_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let start = Instant::now();

    let response = async move {
        info!("Started processing request");
        next.run(request).await
    }
    .instrument(span.clone())
    .await;

    let duration = start.elapsed();
    let status = response.status();

    let _enter = span.enter();
    info!(
        status = %status.as_u16(),
        duration_ms = %duration.as_millis(),
        "Request completed"
    );

    let (mut parts, body) = response.into_parts();
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        parts.headers.insert(REQUEST_ID_HEADER, header_value);
    }

    Response::from_parts(parts, body)
}

/// Health check response structure.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthResponse {
    /// Service status ("healthy" or "degraded")
    pub status: String,
    pub service: String,
    pub version: String,
    pub database: DatabaseHealth,
}

/// Database health status.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseHealth {
    pub connected: bool,
    /// Database type (sqlite or postgres)
    pub db_type: String,
}

impl HealthResponse {
    pub fn new(db_connected: bool, db_type: &str) -> Self {
        Self {
            status: if db_connected { "healthy" } else { "degraded" }.to_string(),
            service: "loadergate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            database: DatabaseHealth {
                connected: db_connected,
                db_type: db_type.to_string(),
            },
        }
    }
}
