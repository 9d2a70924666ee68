use std::env;

use serial_test::serial;

use loadergate::config::{resolve_secret, GateConfig};

const GATE_VARS: &[&str] = &[
    "GATE_SERVER_PORT",
    "PORT",
    "GATE_TRUST_PROXY",
    "GATE_PROXY_HOPS",
    "GATE_DATABASE_URL",
    "GATE_DATABASE_TYPE",
    "GATE_SHARED_SECRET",
    "API_SHARED_SECRET",
    "GATE_JWT_SECRET",
    "JWT_SECRET",
    "GATE_HANDSHAKE_TTL_SECS",
    "GATE_CLIENT_USER_AGENT",
    "GATE_LOG_LEVEL",
];

fn clear_env() {
    for var in GATE_VARS {
        env::remove_var(var);
    }
}

#[test]
#[serial]
fn load_without_overrides_uses_defaults() {
    clear_env();
    let config = GateConfig::load().unwrap();

    assert_eq!(config.server.port, 4000);
    assert_eq!(config.database.db_type, "sqlite");
    assert_eq!(config.handshake.ttl_secs, 60);
    assert_eq!(config.client.user_agent, "MyLoader");
    assert!(config.credential.jwt_secret.is_empty());
    assert!(!config.server.trust_proxy);
    assert_eq!(config.server.proxy_hops, 1);

    // No JWT secret: the server must refuse to start.
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn environment_overrides_apply() {
    clear_env();
    env::set_var("GATE_SERVER_PORT", "8081");
    env::set_var("GATE_JWT_SECRET", "from-env");
    env::set_var("GATE_SHARED_SECRET", "shared");
    env::set_var("GATE_HANDSHAKE_TTL_SECS", "30");
    env::set_var("GATE_CLIENT_USER_AGENT", "OtherLoader");
    env::set_var("GATE_TRUST_PROXY", "true");
    env::set_var("GATE_PROXY_HOPS", "2");

    let config = GateConfig::load().unwrap();
    clear_env();

    assert_eq!(config.server.port, 8081);
    assert_eq!(config.credential.jwt_secret, "from-env");
    assert_eq!(config.shared_secret().unwrap().as_deref(), Some("shared"));
    assert_eq!(config.handshake.ttl_secs, 30);
    assert_eq!(config.client.user_agent, "OtherLoader");
    assert!(config.server.trust_proxy);
    assert_eq!(config.server.proxy_hops, 2);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn legacy_variable_names_are_honoured() {
    clear_env();
    env::set_var("PORT", "5050");
    env::set_var("JWT_SECRET", "legacy-jwt");
    env::set_var("API_SHARED_SECRET", "legacy-shared");

    let config = GateConfig::load().unwrap();
    clear_env();

    assert_eq!(config.server.port, 5050);
    assert_eq!(config.credential.jwt_secret, "legacy-jwt");
    assert_eq!(
        config.shared_secret().unwrap().as_deref(),
        Some("legacy-shared")
    );
}

#[test]
#[serial]
fn database_url_is_routed_by_scheme() {
    clear_env();
    env::set_var("GATE_DATABASE_TYPE", "postgres");
    env::set_var("GATE_DATABASE_URL", "postgres://gate@localhost/gate");

    let config = GateConfig::load().unwrap();
    clear_env();

    assert_eq!(config.database.db_type, "postgres");
    assert_eq!(config.database_url(), "postgres://gate@localhost/gate");
}

#[test]
#[serial]
fn invalid_log_level_is_rejected() {
    clear_env();
    env::set_var("GATE_LOG_LEVEL", "chatty");
    env::set_var("GATE_JWT_SECRET", "x");

    let config = GateConfig::load().unwrap();
    clear_env();

    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn secrets_can_point_at_other_variables() {
    env::set_var("LOADERGATE_TEST_SECRET", "indirect");
    assert_eq!(
        resolve_secret("env:LOADERGATE_TEST_SECRET", "field").unwrap(),
        "indirect"
    );
    env::remove_var("LOADERGATE_TEST_SECRET");

    assert!(resolve_secret("env:LOADERGATE_TEST_SECRET", "field").is_err());
    assert_eq!(resolve_secret("literal", "field").unwrap(), "literal");
}
