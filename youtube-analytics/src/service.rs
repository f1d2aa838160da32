//! Channel data for subjects, fetched through the gateway.
//!
//! Every method is one or more `fetch_with_cache` calls, so each is rate
//! limited per subject and served from cache while fresh.

use crate::client::{ReportQuery, YouTubeClient, MAX_RESULTS_LIMIT};
use crate::types::{AnalyticsReport, ChannelOverview, VideoSummary};
use apigate::cache::LogicalKey;
use apigate::{Gateway, GatewayError};
use chrono::NaiveDate;
use std::sync::Arc;

/// Metrics of the daily channel report.
pub const CHANNEL_METRICS: &str =
    "views,estimatedMinutesWatched,averageViewDuration,subscribersGained,subscribersLost,likes,comments,shares";

pub struct AnalyticsService {
    gateway: Gateway,
    client: Arc<YouTubeClient>,
}

impl AnalyticsService {
    pub fn new(gateway: Gateway, client: Arc<YouTubeClient>) -> Self {
        Self { gateway, client }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub async fn get_channel_overview(&self, subject: &str) -> Result<ChannelOverview, GatewayError> {
        let client = &self.client;
        self.gateway
            .fetch_with_cache(subject, &LogicalKey::new("channel_overview"), |token| async move {
                client.channel_overview(&token).await
            })
            .await
    }

    /// Most recent uploads. Resolves the uploads playlist through the
    /// (usually cached) channel overview first.
    pub async fn get_recent_videos(
        &self,
        subject: &str,
        max_results: u32,
    ) -> Result<Vec<VideoSummary>, GatewayError> {
        let max_results = max_results.clamp(1, MAX_RESULTS_LIMIT);
        let overview = self.get_channel_overview(subject).await?;
        let playlist = overview.uploads_playlist_id.as_str();

        let key = LogicalKey::new("recent_videos")
            .param("playlist", playlist)
            .param("maxResults", max_results);
        let client = &self.client;
        self.gateway
            .fetch_with_cache(subject, &key, |token| async move {
                client.recent_videos(&token, playlist, max_results).await
            })
            .await
    }

    /// Daily channel metrics for `start_date..=end_date`.
    pub async fn get_channel_analytics(
        &self,
        subject: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<AnalyticsReport, GatewayError> {
        let query = ReportQuery {
            start_date,
            end_date,
            metrics: CHANNEL_METRICS.to_string(),
            dimensions: Some("day".to_string()),
            sort: Some("day".to_string()),
        };
        let key = LogicalKey::new("channel_analytics")
            .param("startDate", start_date)
            .param("endDate", end_date)
            .param("metrics", &query.metrics);

        let client = &self.client;
        let query = &query;
        self.gateway
            .fetch_with_cache(subject, &key, |token| async move {
                client.analytics_report(&token, query).await
            })
            .await
    }

    /// Forget everything cached for `subject` so the next reads go upstream.
    pub async fn refresh(&self, subject: &str) -> Result<usize, GatewayError> {
        self.gateway.invalidate_subject(subject).await
    }
}
