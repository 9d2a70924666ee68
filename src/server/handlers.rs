use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header::USER_AGENT, HeaderMap},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::challenge::{ChallengeStore, Purpose};
use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::credential::{check_hardware_binding, CredentialIssuer};
use crate::errors::{GateError, GateResult};
use crate::handshake::{Handshake, Intent};
use crate::license::{ActivationPolicy, Subscription};
use crate::server::api_error::{ApiError, ErrorCode};
use crate::server::auth::SessionCredential;
use crate::server::client_ip::{ClientIpSource, ClientKey};
use crate::server::database::Database;
use crate::server::logging::{log_gate_event, GateEvent, HealthResponse};
use crate::signature::SignatureVerifier;
use crate::validation::{
    require, validate_checksum, validate_hardware_id, validate_length, validate_license_key,
};
use crate::version_gate::{self, GateOutcome, LoaderRelease};

/// Header carrying the request body signature.
pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Longest version string accepted from a client.
const MAX_VERSION_LEN: usize = 64;

/// Request-independent knobs the handlers consult.
#[derive(Debug, Clone)]
pub struct GateSettings {
    /// Required `User-Agent`; `None` disables the check.
    pub user_agent: Option<String>,
    /// Where the client IP comes from.
    pub client_ip: ClientIpSource,
    /// Product row carrying the loader release.
    pub loader_product: String,
    pub policy: ActivationPolicy,
    pub require_handshake_for_sync: bool,
}

impl GateSettings {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            user_agent: Some(config.client.user_agent.clone()).filter(|ua| !ua.is_empty()),
            client_ip: ClientIpSource::from_config(&config.server),
            loader_product: config.loader.product_name.clone(),
            policy: config.activation.policy(),
            require_handshake_for_sync: config.handshake.require_for_sync,
        }
    }
}

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub handshake: Handshake,
    pub credentials: Arc<CredentialIssuer>,
    pub signatures: SignatureVerifier,
    pub settings: Arc<GateSettings>,
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(db: Arc<Database>, config: &GateConfig) -> GateResult<Self> {
        Self::with_clock(db, config, Arc::new(SystemClock))
    }

    /// Build state around an explicit clock.
    pub fn with_clock(
        db: Arc<Database>,
        config: &GateConfig,
        clock: Arc<dyn Clock>,
    ) -> GateResult<Self> {
        let store = ChallengeStore::new(config.handshake.challenge_settings(), Arc::clone(&clock))?;
        let credentials = CredentialIssuer::from_config(&config.credential, Arc::clone(&clock))?;

        Ok(Self {
            db,
            handshake: Handshake::new(Arc::new(store)),
            credentials: Arc::new(credentials),
            signatures: SignatureVerifier::new(config.shared_secret()?),
            settings: Arc::new(GateSettings::from_config(config)),
            clock,
        })
    }

    fn check_user_agent(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = self.settings.user_agent.as_deref() else {
            return Ok(());
        };

        let presented = headers.get(USER_AGENT).and_then(|v| v.to_str().ok());
        if presented == Some(expected) {
            Ok(())
        } else {
            Err(ApiError::new(ErrorCode::ClientRejected))
        }
    }
}

/// Query string for `GET /api/v1/public/version-check`.
#[derive(Debug, Deserialize)]
pub struct VersionCheckQuery {
    pub version: Option<String>,
    pub checksum: Option<String>,
    pub intent: Option<String>,
}

/// Successful version-check responses.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VersionCheckResponse {
    /// Client is current; a handshake was issued for the declared intent.
    Ok { handshake_token: String },
    /// Client must update before it may continue.
    UpdateRequired {
        latest_version: String,
        download_url: Option<String>,
    },
}

/// Body of `POST /api/v1/public/activate`.
#[derive(Debug, Deserialize)]
pub struct ActivateRequest {
    pub license: Option<String>,
    pub hwid: Option<String>,
    pub handshake_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivateResponse {
    pub status: String,
    pub token: String,
    pub subscriptions: Vec<Subscription>,
}

/// Body of `POST /api/v1/secure/sync`.
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub hwid: Option<String>,
    pub handshake_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SyncResponse {
    pub subscriptions: Vec<Subscription>,
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        ApiError::with_message(ErrorCode::InvalidRequest, format!("Invalid JSON body: {e}"))
    })
}

/// Log a handshake rejection and convert it for the wire.
fn handshake_rejected(client: &ClientKey, err: GateError) -> ApiError {
    if let GateError::Challenge(reason) = &err {
        log_gate_event(
            GateEvent::HandshakeRejected,
            client.as_str(),
            Some(&reason.to_string()),
        );
    }
    err.into()
}

/// Best-effort subscription listing; a failure is logged and yields `[]`.
async fn subscriptions_for(state: &AppState, user_id: Option<i64>) -> Vec<Subscription> {
    let Some(user_id) = user_id else {
        return Vec::new();
    };

    let now = state.clock.now().naive_utc();
    match state.db.list_subscriptions(user_id, now).await {
        Ok(subscriptions) => subscriptions,
        Err(e) => {
            warn!(user_id, "subscription listing failed: {e}");
            Vec::new()
        }
    }
}

/// `GET /api/v1/public/version-check?version&checksum&intent`
///
/// Runs the version/integrity gate against the loader release and, when
/// the client is current and intact, issues a handshake for `intent`.
pub async fn version_check_handler(
    State(state): State<AppState>,
    client: ClientKey,
    Query(query): Query<VersionCheckQuery>,
) -> Result<Json<VersionCheckResponse>, ApiError> {
    let version = require(query.version.as_deref(), "version")?;
    validate_length(version, 1, MAX_VERSION_LEN, "version")?;
    let checksum = require(query.checksum.as_deref(), "checksum")?;
    validate_checksum(checksum, "checksum")?;
    let intent: Intent = require(query.intent.as_deref(), "intent")?.parse()?;

    let product = state
        .db
        .get_product_by_name(&state.settings.loader_product)
        .await?
        .ok_or_else(|| GateError::ProductNotFound(state.settings.loader_product.clone()))?;

    let release = LoaderRelease::new(&product.latest_version, product.checksum, product.download_url)?;

    match version_gate::check(version, checksum, &release) {
        GateOutcome::InvalidVersionFormat => Err(ApiError::new(ErrorCode::InvalidVersionFormat)),
        GateOutcome::AheadOfServer => Err(ApiError::new(ErrorCode::VersionAhead)),
        GateOutcome::UpdateRequired {
            latest_version,
            download_url,
        } => {
            log_gate_event(
                GateEvent::UpdateRequired,
                client.as_str(),
                Some(&format!("{version} -> {latest_version}")),
            );
            Ok(Json(VersionCheckResponse::UpdateRequired {
                latest_version,
                download_url,
            }))
        }
        GateOutcome::IntegrityFailure => {
            log_gate_event(GateEvent::IntegrityFailure, client.as_str(), Some(version));
            Err(ApiError::new(ErrorCode::IntegrityFailure))
        }
        GateOutcome::Proceed => {
            let purpose = intent.purpose();
            let handshake_token = state.handshake.issue(client.as_str(), purpose).await?;
            log_gate_event(GateEvent::HandshakeIssued, client.as_str(), Some(purpose.as_str()));
            Ok(Json(VersionCheckResponse::Ok { handshake_token }))
        }
    }
}

/// `POST /api/v1/public/activate`
///
/// Guard chain, in order: application identity, body signature over the
/// raw bytes, body validation, handshake (`awaiting-activation`), then the
/// license transaction. Nothing before the transaction touches a license.
/// The session credential is minted inside the transaction, so a signing
/// failure rolls the activation back.
pub async fn activate_handler(
    State(state): State<AppState>,
    client: ClientKey,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ActivateResponse>, ApiError> {
    state.check_user_agent(&headers)?;

    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = state.signatures.check(&body, signature) {
        log_gate_event(GateEvent::SignatureRejected, client.as_str(), Some(&e.to_string()));
        return Err(e.into());
    }

    let request: ActivateRequest = parse_body(&body)?;
    let license_key = require(request.license.as_deref(), "license")?;
    validate_license_key(license_key, "license")?;
    let hwid = require(request.hwid.as_deref(), "hwid")?;
    validate_hardware_id(hwid, "hwid")?;

    state
        .handshake
        .validate(
            client.as_str(),
            Purpose::AwaitingActivation,
            request.handshake_token.as_deref(),
        )
        .await
        .map_err(|e| handshake_rejected(&client, e))?;

    let now = state.clock.now().naive_utc();
    let credentials = Arc::clone(&state.credentials);
    let result = state
        .db
        .activate_license_with(license_key, hwid, &state.settings.policy, now, move |record| {
            credentials.issue(record.user_id, record.activation_id, &record.hwid)
        })
        .await;

    let (record, token) = match result {
        Ok(done) => done,
        Err(GateError::LicenseState(reason)) => {
            log_gate_event(
                GateEvent::ActivationRejected,
                license_key,
                Some(&reason.to_string()),
            );
            return Err(reason.into());
        }
        Err(e) => return Err(e.into()),
    };

    log_gate_event(
        GateEvent::Activated,
        &record.license_key,
        Some(&format!("activation_id={}", record.activation_id)),
    );

    let subscriptions = subscriptions_for(&state, record.user_id).await;

    Ok(Json(ActivateResponse {
        status: "success".to_string(),
        token,
        subscriptions,
    }))
}

/// `POST /api/v1/secure/sync`
///
/// Requires a valid bearer credential bound to the presented `hwid`, and
/// (unless disabled) an `awaiting-sync` handshake.
pub async fn sync_handler(
    State(state): State<AppState>,
    client: ClientKey,
    session: SessionCredential,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SyncResponse>, ApiError> {
    state.check_user_agent(&headers)?;

    let request: SyncRequest = parse_body(&body)?;
    let hwid = require(request.hwid.as_deref(), "hwid")?;
    check_hardware_binding(&session.claims, hwid)?;

    if state.settings.require_handshake_for_sync {
        state
            .handshake
            .validate(
                client.as_str(),
                Purpose::AwaitingSync,
                request.handshake_token.as_deref(),
            )
            .await
            .map_err(|e| handshake_rejected(&client, e))?;
    }

    let subscriptions = subscriptions_for(&state, session.claims.user_id).await;
    log_gate_event(
        GateEvent::Synced,
        &session.claims.activation_id.to_string(),
        Some(&format!("{} subscriptions", subscriptions.len())),
    );

    Ok(Json(SyncResponse { subscriptions }))
}

/// `GET /health`
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connected = state.db.ping().await;
    if !connected {
        info!("health check: database unreachable");
    }
    Json(HealthResponse::new(connected, state.db.db_type()))
}
