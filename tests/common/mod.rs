#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode},
    Router,
};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tower::ServiceExt;

use loadergate::clock::ManualClock;
use loadergate::config::GateConfig;
use loadergate::server::{build_router, AppState, Database};
use loadergate::signature::compute_signature;

pub const SHARED_SECRET: &str = "test-shared-secret";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const CLIENT_IP: &str = "203.0.113.10";
pub const USER_AGENT: &str = "MyLoader";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

/// Defaults with cheap hashing and known secrets.
///
/// Requests carry no peer address under `oneshot`, so the client IP comes
/// from `X-Forwarded-For` as if behind one proxy.
pub fn test_config() -> GateConfig {
    let mut config = GateConfig::default();
    config.server.trust_proxy = true;
    config.server.proxy_hops = 1;
    config.handshake.hash_memory_kib = 8;
    config.handshake.hash_iterations = 1;
    config.handshake.hash_parallelism = 1;
    config.handshake.sweep_interval_secs = 0;
    config.credential.jwt_secret = JWT_SECRET.to_string();
    config.signature.shared_secret = SHARED_SECRET.to_string();
    config.rate_limit.enabled = false;
    config
}

pub async fn seed(pool: &SqlitePool) {
    let statements = [
        "INSERT INTO products (id, name, latest_version, checksum, download_url, patch_note) \
         VALUES (1, 'loader', '1.1.0', 'xyz', 'https://downloads.example/loader-1.1.0.zip', NULL)",
        "INSERT INTO products (id, name, latest_version, checksum, download_url, patch_note) \
         VALUES (2, 'P1', '2.0.0', 'p1sum', NULL, 'Stability fixes')",
        "INSERT INTO licenses (license_key, product_id, user_id, status, duration_days) \
         VALUES ('L1', 2, 42, 'fresh', 30)",
        "INSERT INTO licenses (license_key, product_id, user_id, status, duration_days) \
         VALUES ('L2', 2, 42, 'fresh', 30)",
        "INSERT INTO licenses (license_key, product_id, user_id, status, duration_days) \
         VALUES ('L3', 2, NULL, 'fresh', 30)",
        "INSERT INTO licenses (license_key, product_id, user_id, status, duration_days) \
         VALUES ('L4', 2, 7, 'fresh', 30)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await.unwrap();
    }
}

/// In-memory SQLite with the schema and fixtures.
///
/// A single connection: every pooled connection to `sqlite::memory:` would
/// otherwise open its own empty database.
pub async fn setup_db() -> Arc<Database> {
    setup_memory_db().await.0
}

/// [`setup_db`] plus the raw pool for direct queries.
pub async fn setup_memory_db() -> (Arc<Database>, SqlitePool) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();

    let db = Database::SQLite(pool.clone());
    db.init_schema().await.unwrap();
    seed(&pool).await;

    (Arc::new(db), pool)
}

/// File-backed SQLite in `dir` with a pool of `max_connections`.
pub async fn setup_file_db(dir: &Path, max_connections: u32) -> (Arc<Database>, SqlitePool) {
    let options = SqliteConnectOptions::new()
        .filename(dir.join("gate.db"))
        .create_if_missing(true)
        .busy_timeout(Duration::from_secs(10));
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
        .unwrap();

    let db = Database::SQLite(pool.clone());
    db.init_schema().await.unwrap();
    seed(&pool).await;

    (Arc::new(db), pool)
}

pub struct TestApp {
    pub router: Router,
    pub db: Arc<Database>,
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub state: AppState,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(test_config()).await
}

pub async fn spawn_app_with(config: GateConfig) -> TestApp {
    let (db, pool) = setup_memory_db().await;
    let clock = Arc::new(ManualClock::new(start_time()));
    let state = AppState::with_clock(Arc::clone(&db), &config, clock.clone()).unwrap();
    let router = build_router(state.clone(), &config).unwrap();

    TestApp {
        router,
        db,
        pool,
        clock,
        state,
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-forwarded-for", CLIENT_IP)
        .header("user-agent", USER_AGENT)
        .body(Body::empty())
        .unwrap()
}

/// Replace the `X-Forwarded-For` chain a request arrives with.
pub fn forwarded_for(mut request: Request<Body>, chain: &str) -> Request<Body> {
    request
        .headers_mut()
        .insert("x-forwarded-for", HeaderValue::from_str(chain).unwrap());
    request
}

/// POST with raw bytes and an optional signature header.
pub fn post_raw(uri: &str, body: Vec<u8>, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("x-forwarded-for", CLIENT_IP)
        .header("user-agent", USER_AGENT)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("x-signature", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

/// POST signed with [`SHARED_SECRET`].
pub fn signed_post(uri: &str, body: &Value) -> Request<Body> {
    let bytes = serde_json::to_vec(body).unwrap();
    let signature = compute_signature(&bytes, SHARED_SECRET);
    post_raw(uri, bytes, Some(&signature))
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Pass the version gate and return the handshake for `intent`.
pub async fn handshake(app: &TestApp, intent: &str) -> String {
    let (status, body) = send(
        &app.router,
        get(&format!(
            "/api/v1/public/version-check?version=1.1.0&checksum=xyz&intent={intent}"
        )),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "version check failed: {body}");
    body["handshake_token"].as_str().unwrap().to_string()
}

pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or("")
}
