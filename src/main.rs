use anyhow::Result;
use apigate::api::create_oauth_router;
use apigate::config::Secrets;
use apigate::server;
use axum::{routing::get, Router};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    server::init_tracing("apigate=info");

    info!("apigate starting...");

    let config = server::load_configuration()?;
    let secrets = Secrets::from_env()?;
    info!(client_id = %secrets.oauth_client_id, "OAuth client configured");

    let oauth_state = server::build_oauth_state(&config, &secrets)?;

    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(create_oauth_router(oauth_state));

    server::serve(router, &config.server.bind_addr).await?;

    info!("apigate stopped");
    Ok(())
}
