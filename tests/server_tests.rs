#![cfg(feature = "sqlite")]

mod common;

use axum::http::StatusCode;
use chrono::Duration;
use serde_json::json;

use loadergate::signature::compute_signature;

use common::{
    error_code, forwarded_for, get, handshake, post_raw, send, signed_post, spawn_app,
    spawn_app_with, test_config, TestApp, CLIENT_IP, SHARED_SECRET, USER_AGENT,
};

const VERSION_CHECK: &str = "/api/v1/public/version-check";
const ACTIVATE: &str = "/api/v1/public/activate";
const SYNC: &str = "/api/v1/secure/sync";

fn version_check_uri(version: &str, checksum: &str, intent: &str) -> String {
    format!("{VERSION_CHECK}?version={version}&checksum={checksum}&intent={intent}")
}

/// Full handshake + activation for `license`, returning the session token.
async fn activate(app: &TestApp, license: &str, hwid: &str) -> String {
    let token = handshake(app, "activate").await;
    let (status, body) = send(
        &app.router,
        signed_post(
            ACTIVATE,
            &json!({ "license": license, "hwid": hwid, "handshake_token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "activation failed: {body}");
    body["token"].as_str().unwrap().to_string()
}

fn sync_request(token: Option<&str>, body: serde_json::Value) -> axum::http::Request<axum::body::Body> {
    let mut builder = axum::http::Request::builder()
        .method("POST")
        .uri(SYNC)
        .header("x-forwarded-for", CLIENT_IP)
        .header("user-agent", USER_AGENT)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    builder
        .body(axum::body::Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

async fn license_status(app: &TestApp, key: &str) -> String {
    app.db.get_license_by_key(key).await.unwrap().unwrap().status
}

// === Version gate ===

#[tokio::test]
async fn current_intact_client_gets_a_handshake() {
    let app = spawn_app().await;
    let (status, body) = send(&app.router, get(&version_check_uri("1.1.0", "xyz", "activate"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    let token = body["handshake_token"].as_str().unwrap();
    assert_eq!(token.len(), 32);
    assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(app.state.handshake.store().len(), 1);
}

#[tokio::test]
async fn old_client_is_told_to_update() {
    let app = spawn_app().await;
    let (status, body) = send(&app.router, get(&version_check_uri("1.0.0", "abc", "activate"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "update_required");
    assert_eq!(body["latest_version"], "1.1.0");
    assert_eq!(
        body["download_url"],
        "https://downloads.example/loader-1.1.0.zip"
    );
    assert!(app.state.handshake.store().is_empty());
}

#[tokio::test]
async fn tampered_build_fails_integrity() {
    let app = spawn_app().await;
    let (status, body) = send(&app.router, get(&version_check_uri("1.1.0", "abc", "sync"))).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "INTEGRITY_FAILURE");
}

#[tokio::test]
async fn malformed_and_future_versions() {
    let app = spawn_app().await;

    let (status, body) = send(&app.router, get(&version_check_uri("banana", "xyz", "sync"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_VERSION_FORMAT");

    let (status, body) = send(&app.router, get(&version_check_uri("2.0.0", "xyz", "sync"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "VERSION_AHEAD");
}

#[tokio::test]
async fn version_check_requires_all_parameters() {
    let app = spawn_app().await;

    let (status, body) = send(&app.router, get(&format!("{VERSION_CHECK}?version=1.1.0&checksum=xyz"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "MISSING_FIELD");

    let (status, body) = send(&app.router, get(&version_check_uri("1.1.0", "xyz", "delete"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_FIELD");
}

#[tokio::test]
async fn missing_loader_product_is_404() {
    let mut config = test_config();
    config.loader.product_name = "ghost".to_string();
    let app = spawn_app_with(config).await;

    let (status, body) = send(&app.router, get(&version_check_uri("1.1.0", "xyz", "activate"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "PRODUCT_NOT_FOUND");
}

// === Activation ===

#[tokio::test]
async fn activation_end_to_end() {
    let app = spawn_app().await;
    let token = handshake(&app, "activate").await;

    let (status, body) = send(
        &app.router,
        signed_post(
            ACTIVATE,
            &json!({ "license": "L1", "hwid": "HW-1", "handshake_token": token }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["status"], "success");
    let subscriptions = body["subscriptions"].as_array().unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0]["product_name"], "P1");
    assert_eq!(subscriptions[0]["days_remaining"], 30);

    let claims = app
        .state
        .credentials
        .verify(body["token"].as_str().unwrap())
        .unwrap();
    assert_eq!(claims.user_id, Some(42));
    assert_eq!(claims.hwid, "HW-1");

    let activation_id: i64 = sqlx::query_scalar(
        "SELECT a.id FROM activations a \
         JOIN licenses l ON l.id = a.license_id \
         WHERE l.license_key = 'L1'",
    )
    .fetch_one(&app.pool)
    .await
    .unwrap();
    assert_eq!(claims.activation_id, activation_id);

    assert_eq!(license_status(&app, "L1").await, "used");
    assert!(app.state.handshake.store().is_empty());
}

#[tokio::test]
async fn used_license_cannot_be_activated_again() {
    let app = spawn_app().await;
    activate(&app, "L1", "HW-1").await;

    let token = handshake(&app, "activate").await;
    let (status, body) = send(
        &app.router,
        signed_post(
            ACTIVATE,
            &json!({ "license": "L1", "hwid": "HW-2", "handshake_token": token }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "LICENSE_ALREADY_USED");
    assert_eq!(app.db.count_activations("L1").await.unwrap(), 1);
}

#[tokio::test]
async fn expired_handshake_leaves_license_fresh() {
    let app = spawn_app().await;
    let token = handshake(&app, "activate").await;
    app.clock.advance(Duration::seconds(61));

    let (status, body) = send(
        &app.router,
        signed_post(
            ACTIVATE,
            &json!({ "license": "L1", "hwid": "HW-1", "handshake_token": token }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "HANDSHAKE_EXPIRED");
    assert_eq!(license_status(&app, "L1").await, "fresh");
}

#[tokio::test]
async fn sync_handshake_cannot_activate() {
    let app = spawn_app().await;
    let token = handshake(&app, "sync").await;

    let (status, body) = send(
        &app.router,
        signed_post(
            ACTIVATE,
            &json!({ "license": "L1", "hwid": "HW-1", "handshake_token": token }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "HANDSHAKE_PURPOSE_MISMATCH");
    assert_eq!(license_status(&app, "L1").await, "fresh");
}

#[tokio::test]
async fn wrong_handshake_secret_is_consumed() {
    let app = spawn_app().await;
    let token = handshake(&app, "activate").await;

    let (status, body) = send(
        &app.router,
        signed_post(
            ACTIVATE,
            &json!({ "license": "L1", "hwid": "HW-1", "handshake_token": "00".repeat(16) }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "HANDSHAKE_INVALID");

    // The real secret no longer works either.
    let (status, body) = send(
        &app.router,
        signed_post(
            ACTIVATE,
            &json!({ "license": "L1", "hwid": "HW-1", "handshake_token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "HANDSHAKE_NOT_FOUND");
}

#[tokio::test]
async fn client_written_forwarding_entry_cannot_burn_another_clients_handshake() {
    let app = spawn_app().await;
    let victim = "198.51.100.5";

    let (status, body) = send(
        &app.router,
        forwarded_for(get(&version_check_uri("1.1.0", "xyz", "activate")), victim),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let token = body["handshake_token"].as_str().unwrap().to_string();

    // The proxy appends the attacker's real address after the forged entry.
    let (status, body) = send(
        &app.router,
        forwarded_for(
            signed_post(
                ACTIVATE,
                &json!({ "license": "L1", "hwid": "HW-X", "handshake_token": "00".repeat(16) }),
            ),
            "198.51.100.5, 203.0.113.66",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "HANDSHAKE_NOT_FOUND");
    assert_eq!(app.state.handshake.store().len(), 1);

    let (status, body) = send(
        &app.router,
        forwarded_for(
            signed_post(
                ACTIVATE,
                &json!({ "license": "L1", "hwid": "HW-1", "handshake_token": token }),
            ),
            victim,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(license_status(&app, "L1").await, "used");
}

#[tokio::test]
async fn forwarding_headers_are_ignored_unless_trusted() {
    let mut config = test_config();
    config.server.trust_proxy = false;
    let app = spawn_app_with(config).await;

    // No peer address and an untrusted header: nothing to key a handshake on.
    let (status, body) = send(&app.router, get(&version_check_uri("1.1.0", "xyz", "activate"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "MISSING_CLIENT_ADDRESS");
    assert!(app.state.handshake.store().is_empty());
}

#[tokio::test]
async fn missing_handshake_is_rejected() {
    let app = spawn_app().await;
    let (status, body) = send(
        &app.router,
        signed_post(ACTIVATE, &json!({ "license": "L1", "hwid": "HW-1" })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "HANDSHAKE_MISSING");
}

#[tokio::test]
async fn bad_signature_is_rejected_before_anything_else() {
    let app = spawn_app().await;
    let token = handshake(&app, "activate").await;
    let body = serde_json::to_vec(
        &json!({ "license": "L1", "hwid": "HW-1", "handshake_token": token }),
    )
    .unwrap();

    let wrong = compute_signature(&body, "some-other-secret");
    let (status, json) = send(&app.router, post_raw(ACTIVATE, body.clone(), Some(&wrong))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&json), "SIGNATURE_MISMATCH");

    let (status, json) = send(&app.router, post_raw(ACTIVATE, body.clone(), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&json), "SIGNATURE_MISSING");

    let (status, json) = send(&app.router, post_raw(ACTIVATE, body.clone(), Some("zz-not-hex"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&json), "INVALID_SIGNATURE_FORMAT");

    // The handshake was never touched.
    assert_eq!(app.state.handshake.store().len(), 1);
    assert_eq!(license_status(&app, "L1").await, "fresh");
}

#[tokio::test]
async fn signature_covers_the_exact_bytes() {
    let app = spawn_app().await;
    let token = handshake(&app, "activate").await;
    let body = format!(r#"{{"license":"L1","hwid":"HW-1","handshake_token":"{token}"}}"#);
    let signature = compute_signature(body.as_bytes(), SHARED_SECRET);

    // Same JSON, different whitespace: the signature no longer matches.
    let reformatted = body.replace(',', ", ");
    let (status, json) = send(
        &app.router,
        post_raw(ACTIVATE, reformatted.into_bytes(), Some(&signature)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&json), "SIGNATURE_MISMATCH");

    let (status, _) = send(
        &app.router,
        post_raw(ACTIVATE, body.into_bytes(), Some(&signature)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn unconfigured_shared_secret_is_a_server_error() {
    let mut config = test_config();
    config.signature.shared_secret = String::new();
    let app = spawn_app_with(config).await;

    let (status, body) = send(
        &app.router,
        signed_post(ACTIVATE, &json!({ "license": "L1", "hwid": "HW-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(error_code(&body), "CONFIG_ERROR");
}

#[tokio::test]
async fn foreign_user_agent_is_rejected() {
    let app = spawn_app().await;
    let body = serde_json::to_vec(&json!({ "license": "L1", "hwid": "HW-1" })).unwrap();
    let signature = compute_signature(&body, SHARED_SECRET);

    let request = axum::http::Request::builder()
        .method("POST")
        .uri(ACTIVATE)
        .header("x-forwarded-for", CLIENT_IP)
        .header("user-agent", "curl/8.0")
        .header("x-signature", signature)
        .body(axum::body::Body::from(body))
        .unwrap();

    let (status, json) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&json), "CLIENT_REJECTED");
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let app = spawn_app().await;
    let body = b"{not json".to_vec();
    let signature = compute_signature(&body, SHARED_SECRET);

    let (status, json) = send(&app.router, post_raw(ACTIVATE, body, Some(&signature))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&json), "INVALID_REQUEST");
}

#[tokio::test]
async fn unknown_license_is_forbidden() {
    let app = spawn_app().await;
    let token = handshake(&app, "activate").await;

    let (status, body) = send(
        &app.router,
        signed_post(
            ACTIVATE,
            &json!({ "license": "NOPE", "hwid": "HW-1", "handshake_token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "LICENSE_NOT_FOUND");
}

// === Sync ===

#[tokio::test]
async fn sync_lists_subscriptions() {
    let app = spawn_app().await;
    let session = activate(&app, "L1", "HW-1").await;
    app.clock.advance(Duration::days(10));

    let token = handshake(&app, "sync").await;
    let (status, body) = send(
        &app.router,
        sync_request(
            Some(&session),
            json!({ "hwid": "HW-1", "handshake_token": token }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{body}");
    let subscriptions = body["subscriptions"].as_array().unwrap();
    assert_eq!(subscriptions.len(), 1);
    assert_eq!(subscriptions[0]["days_remaining"], 20);
}

#[tokio::test]
async fn sync_rejects_other_hardware() {
    let app = spawn_app().await;
    let session = activate(&app, "L1", "HW-1").await;
    let token = handshake(&app, "sync").await;

    let (status, body) = send(
        &app.router,
        sync_request(
            Some(&session),
            json!({ "hwid": "HW-2", "handshake_token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "HARDWARE_MISMATCH");
}

#[tokio::test]
async fn sync_requires_a_bearer_credential() {
    let app = spawn_app().await;
    let (status, body) = send(&app.router, sync_request(None, json!({ "hwid": "HW-1" }))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "MISSING_TOKEN");

    let (status, body) = send(
        &app.router,
        sync_request(Some("not.a.jwt"), json!({ "hwid": "HW-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "INVALID_TOKEN");
}

#[tokio::test]
async fn expired_session_is_refused() {
    let app = spawn_app().await;
    let session = activate(&app, "L1", "HW-1").await;
    app.clock.advance(Duration::days(15));

    let token = handshake(&app, "sync").await;
    let (status, body) = send(
        &app.router,
        sync_request(
            Some(&session),
            json!({ "hwid": "HW-1", "handshake_token": token }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "TOKEN_EXPIRED");
}

#[tokio::test]
async fn sync_handshake_can_be_made_optional() {
    let mut config = test_config();
    config.handshake.require_for_sync = false;
    let app = spawn_app_with(config).await;
    let session = activate(&app, "L1", "HW-1").await;

    let (status, body) = send(
        &app.router,
        sync_request(Some(&session), json!({ "hwid": "HW-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

// === Health ===

#[tokio::test]
async fn health_reports_database() {
    let app = spawn_app().await;
    let response = {
        use tower::ServiceExt;
        app.router.clone().oneshot(get("/health")).await.unwrap()
    };
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["database"]["db_type"], "sqlite");
}
