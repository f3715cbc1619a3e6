//! Relay Server - Main Entry Point
//!
//! Wires the session engine bridge, Redis auth store and webhook dispatcher
//! into the connection registry, restores stored connections and serves the
//! HTTP API until Ctrl-C or SIGTERM.

use anyhow::{Context, Result};
use fred::prelude::ClientLike;
use std::sync::Arc;
use tracing::{info, warn};

use relay_server::{
    api,
    config::Config,
    connection::ConnectionDeps,
    db,
    registry::ConnectionRegistry,
    session::{BridgeEngine, RedisAuthStateStore},
    webhooks::{HttpTransport, TokioClock, WebhookDispatcher},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %serde_json::to_string(&config.status())?,
        "Starting Relay Server"
    );
    if !config.has_api_key() {
        warn!("API_KEY not set, the HTTP API is unauthenticated");
    }

    // Initialize Redis
    let redis = db::create_redis_client(&config.redis_url).await?;

    // Webhook delivery
    let transport = HttpTransport::new(config.webhook_timeout)
        .context("Failed to build webhook HTTP client")?;
    let dispatcher = WebhookDispatcher::new(
        Arc::new(transport),
        Arc::new(TokioClock),
        config.retry_policy,
    );

    // Session engine
    let engine = BridgeEngine::new(config.engine_url.clone())
        .context("Failed to build session engine bridge")?;
    info!(url = %config.engine_url, "Session engine bridge configured");

    let deps = ConnectionDeps {
        engine: Arc::new(engine),
        auth_store: Arc::new(RedisAuthStateStore::new(
            redis.clone(),
            config.redis_key_prefix.clone(),
        )),
        sinks: Arc::new(dispatcher),
        jid_filter: config.jid_filter,
        client_version: config.client_version.clone(),
    };
    let registry = ConnectionRegistry::new(deps);

    // Restore connections persisted by a previous run
    match registry.reconnect_all().await {
        Ok(restored) => info!(restored, "Stored connections restored"),
        Err(e) => warn!(error = %e, "Failed to restore stored connections"),
    }

    // Build router
    let state = api::AppState::new(registry.clone(), config.clone());
    let app = api::create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(address = %config.bind_address, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    registry.shutdown().await;
    if let Err(e) = redis.quit().await {
        warn!(error = %e, "Failed to close Redis connection");
    }

    info!("Server shutdown complete");

    Ok(())
}

/// Resolve on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Received shutdown signal, cleaning up...");
}
