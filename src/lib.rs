//! loadergate - version gate, handshake and one-time license activation
//! for distributed loader clients.
//!
//! A client first proves it runs the current, unmodified build
//! ([`version_gate`]), receives a short-lived purpose-scoped secret
//! ([`handshake`], backed by [`challenge`]), and then sends a signed
//! activation request ([`signature`]). The license makes its single
//! `fresh -> used` transition under a row lock ([`license`],
//! `server::database`) and the client gets a hardware-bound session
//! credential ([`credential`]).
//!
//! # Features
//!
//! - `server` - HTTP handlers, routes and the database layer. Enabled by default.
//! - `sqlite` - SQLite database backend. Enabled by default.
//! - `postgres` - PostgreSQL database backend.
//! - `rate-limiting` - Per-IP rate limit layers for the public endpoints.
//!
//! # Example
//!
//! ```toml
//! # Use defaults (server + sqlite)
//! loadergate = "0.1"
//!
//! # Core components only (no HTTP, no database)
//! loadergate = { version = "0.1", default-features = false }
//!
//! # Server with PostgreSQL
//! loadergate = { version = "0.1", features = ["server", "postgres"] }
//! ```

// Core modules (always available)
pub mod challenge;
pub mod clock;
pub mod config;
pub mod credential;
pub mod errors;
pub mod handshake;
pub mod license;
pub mod signature;
pub mod validation;
pub mod version_gate;

// Server-related modules (requires "server" feature)
#[cfg(feature = "server")]
#[path = "server/mod.rs"]
pub mod server;
