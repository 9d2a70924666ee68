use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use loadergate::config::{init_config, GateConfig};
use loadergate::errors::{GateError, GateResult};
use loadergate::server::{build_router, AppState, Database};

fn init_tracing(config: &GateConfig) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("loadergate={}", config.logging.level)));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Periodically drop expired handshake challenges.
fn spawn_sweeper(state: &AppState, interval_secs: u64) {
    if interval_secs == 0 {
        return;
    }

    let store = Arc::clone(state.handshake.store());
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                info!(purged, remaining = store.len(), "expired handshakes purged");
            }
        }
    });
}

async fn run() -> GateResult<()> {
    let config = init_config()?;
    init_tracing(config);

    let db = Database::new().await?;
    if config.database.auto_migrate {
        db.init_schema().await?;
    }

    if config.shared_secret()?.is_none() {
        warn!("signature.shared_secret is not set; activation requests will be refused");
    }

    let state = AppState::new(db, config)?;
    spawn_sweeper(&state, config.handshake.sweep_interval_secs);

    let app = build_router(state, config)?;

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| GateError::Internal(format!("failed to bind {addr}: {e}")))?;

    info!(%addr, db_type = config.database.db_type.as_str(), "loadergate listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| GateError::Internal(format!("server error: {e}")))
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Tracing may not be initialized if config loading failed.
            error!("{e}");
            eprintln!("loadergate_server: {e}");
            ExitCode::FAILURE
        }
    }
}
