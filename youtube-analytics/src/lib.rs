//! YouTube channel analytics served through the `apigate` gateway.
//!
//! Every upstream call runs inside [`apigate::Gateway::fetch_with_cache`], so
//! subjects are rate limited, responses are cached and access tokens are
//! refreshed without this crate handling credentials itself.

pub mod api;
pub mod classify;
pub mod client;
pub mod service;
pub mod types;

pub use api::{create_channel_router, ChannelAppState};
pub use client::YouTubeClient;
pub use service::AnalyticsService;
