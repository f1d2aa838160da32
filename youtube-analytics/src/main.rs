use anyhow::Result;
use apigate::api::create_oauth_router;
use apigate::config::Secrets;
use apigate::server;
use axum::{routing::get, Router};
use std::sync::Arc;
use tracing::info;
use youtube_analytics::{create_channel_router, AnalyticsService, ChannelAppState, YouTubeClient};

#[tokio::main]
async fn main() -> Result<()> {
    server::init_tracing("youtube_analytics=info,apigate=info");

    info!("youtube-analytics starting...");

    let config = server::load_configuration()?;
    let secrets = Secrets::from_env()?;

    let oauth_state = server::build_oauth_state(&config, &secrets)?;
    let service = AnalyticsService::new(oauth_state.gateway.clone(), Arc::new(YouTubeClient::new()));
    let channel_state = Arc::new(ChannelAppState { service });

    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(create_oauth_router(oauth_state))
        .merge(create_channel_router(channel_state));

    server::serve(router, &config.server.bind_addr).await?;

    info!("youtube-analytics stopped");
    Ok(())
}
