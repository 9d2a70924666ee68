//! Client identity for handshake bookkeeping.
//!
//! Handshake challenges are keyed by client IP. By default that is the
//! socket peer address. Behind reverse proxies (`server.trust_proxy`) the
//! `X-Forwarded-For` entry `server.proxy_hops` positions from the right is
//! used: the entries to its right were appended by trusted proxies, the
//! ones to its left were written by the client and are ignored. If that
//! entry is unusable, `X-Real-IP` and then the peer address are tried.

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{request::Parts, Extensions, HeaderMap},
};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::config::ServerConfig;
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::handlers::AppState;

/// The identity a handshake challenge is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientKey(pub String);

impl ClientKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClientKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How the client IP is derived from a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIpSource {
    pub trust_proxy: bool,
    pub proxy_hops: usize,
}

impl ClientIpSource {
    /// Peer address only.
    pub fn direct() -> Self {
        Self {
            trust_proxy: false,
            proxy_hops: 0,
        }
    }

    /// Behind `proxy_hops` trusted proxies.
    pub fn behind_proxies(proxy_hops: usize) -> Self {
        Self {
            trust_proxy: true,
            proxy_hops: proxy_hops.max(1),
        }
    }

    pub fn from_config(server: &ServerConfig) -> Self {
        if server.trust_proxy {
            Self::behind_proxies(server.proxy_hops)
        } else {
            Self::direct()
        }
    }

    /// Resolve the client IP from request headers and extensions.
    pub fn resolve(&self, headers: &HeaderMap, extensions: &Extensions) -> Option<IpAddr> {
        if self.trust_proxy {
            if let Some(ip) = forwarded_ip(headers, self.proxy_hops) {
                return Some(ip);
            }
        }

        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|connect_info| connect_info.0.ip())
    }
}

/// Client IP from forwarding headers, if present and parseable.
fn forwarded_ip(headers: &HeaderMap, proxy_hops: usize) -> Option<IpAddr> {
    // Repeated headers form one list, in order.
    let chain: Vec<&str> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .collect();

    if !chain.is_empty() {
        let index = chain.len().saturating_sub(proxy_hops);
        if let Ok(ip) = IpAddr::from_str(chain[index]) {
            return Some(ip);
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| IpAddr::from_str(value.trim()).ok())
}

/// Resolve the client IP from request parts.
pub fn extract_client_ip(parts: &Parts, source: ClientIpSource) -> Option<IpAddr> {
    source.resolve(&parts.headers, &parts.extensions)
}

#[async_trait]
impl FromRequestParts<AppState> for ClientKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        extract_client_ip(parts, state.settings.client_ip)
            .map(|ip| ClientKey(ip.to_string()))
            .ok_or_else(|| ApiError::new(ErrorCode::MissingClientAddress))
    }
}
