//! Process wiring shared by the service binaries.

use crate::api::OAuthAppState;
use crate::config::{GatewayConfig, Secrets};
use crate::credentials::SqliteCredentialStore;
use crate::gateway::Gateway;
use crate::oauth::{run_state_cleanup, CsrfStates, HttpTokenEndpoint, OAuthProviderConfig};
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Interval of the CSRF state sweep.
const STATE_CLEANUP_INTERVAL_SECS: u64 = 300;

/// Initialize the tracing subscriber; `RUST_LOG` overrides `default_filter`.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.to_string().into()),
        )
        .init();
}

/// Load configuration from `APIGATE_CONFIG` (if set) and apply env overrides.
pub fn load_configuration() -> Result<GatewayConfig> {
    let mut config = match std::env::var("APIGATE_CONFIG") {
        Ok(path) => crate::config::load_config(&path)?,
        Err(_) => GatewayConfig::default(),
    };
    crate::config::apply_env_overrides(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Open storage, build the gateway and start background maintenance.
pub fn build_oauth_state(config: &GatewayConfig, secrets: &Secrets) -> Result<OAuthAppState> {
    let store = Arc::new(
        SqliteCredentialStore::open(&config.storage.database_path, &secrets.encryption_key)
            .context("Failed to initialize credential store")?,
    );
    info!(path = %config.storage.database_path.display(), "Credential store initialized");

    let provider = OAuthProviderConfig::from_config(&config.oauth, secrets);
    let endpoint = Arc::new(HttpTokenEndpoint::new(&provider));

    let gateway = Gateway::from_config(config, store, endpoint.clone())?;
    gateway.spawn_sweepers(
        Duration::from_secs(config.cache.sweep_interval_seconds.max(1)),
        config.rate_limit.window().max(Duration::from_secs(1)),
    );

    let states = CsrfStates::new(config.server.oauth_state_expiry_seconds);
    tokio::spawn(run_state_cleanup(states.clone(), STATE_CLEANUP_INTERVAL_SECS));

    Ok(OAuthAppState {
        gateway,
        endpoint,
        provider,
        states,
        callback_base_url: config.server.callback_base_url.clone(),
    })
}

/// Serve `router` on `bind_addr` until ctrl-c.
pub async fn serve(router: Router, bind_addr: &str) -> Result<()> {
    let router = router.layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!(addr = %bind_addr, "HTTP API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}
