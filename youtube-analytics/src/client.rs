use crate::classify::{classify_response, classify_transport, malformed_body};
use crate::types::{
    AnalyticsReport, ChannelOverview, ChannelResource, ListResponse, PlaylistItemResource,
    VideoResource, VideoSummary,
};
use apigate::token::BearerToken;
use apigate::GatewayError;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

pub const DATA_API_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";
pub const ANALYTICS_API_BASE_URL: &str = "https://youtubeanalytics.googleapis.com/v2";

/// Per-request timeout; the gateway's operation timeout bounds retries.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Data API allows at most 50 ids per `videos.list` call.
pub const MAX_RESULTS_LIMIT: u32 = 50;

/// Parameters of a channel analytics report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Comma separated, e.g. `views,likes`
    pub metrics: String,
    pub dimensions: Option<String>,
    pub sort: Option<String>,
}

/// HTTP client for the YouTube Data and Analytics APIs.
///
/// Holds no credentials: every call takes the bearer token the gateway
/// obtained for it, and every failure is classified before it is returned.
pub struct YouTubeClient {
    http_client: Client,
    data_base_url: String,
    analytics_base_url: String,
}

impl YouTubeClient {
    pub fn new() -> Self {
        Self::with_base_urls(
            DATA_API_BASE_URL.to_string(),
            ANALYTICS_API_BASE_URL.to_string(),
        )
    }

    /// Create a client with custom base URLs (for testing with a mock server).
    pub fn with_base_urls(data_base_url: String, analytics_base_url: String) -> Self {
        let http_client = Client::builder()
            .user_agent("youtube-analytics/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http_client,
            data_base_url,
            analytics_base_url,
        }
    }

    /// The authenticated user's channel.
    pub async fn channel_overview(&self, token: &BearerToken) -> Result<ChannelOverview, GatewayError> {
        let url = format!("{}/channels", self.data_base_url);
        let list: ListResponse<ChannelResource> = self
            .get_json(
                token,
                &url,
                &[
                    ("part", "snippet,statistics,contentDetails".to_string()),
                    ("mine", "true".to_string()),
                ],
            )
            .await?;

        list.items
            .into_iter()
            .next()
            .map(ChannelOverview::from)
            .ok_or_else(|| GatewayError::UpstreamRejected {
                status: 404,
                message: "no YouTube channel for this account".to_string(),
            })
    }

    /// Latest uploads of `uploads_playlist_id`, newest first, with statistics.
    pub async fn recent_videos(
        &self,
        token: &BearerToken,
        uploads_playlist_id: &str,
        max_results: u32,
    ) -> Result<Vec<VideoSummary>, GatewayError> {
        let url = format!("{}/playlistItems", self.data_base_url);
        let list: ListResponse<PlaylistItemResource> = self
            .get_json(
                token,
                &url,
                &[
                    ("part", "contentDetails".to_string()),
                    ("playlistId", uploads_playlist_id.to_string()),
                    ("maxResults", max_results.clamp(1, MAX_RESULTS_LIMIT).to_string()),
                ],
            )
            .await?;

        let ids: Vec<String> = list
            .items
            .into_iter()
            .map(|item| item.content_details.video_id)
            .collect();
        self.video_statistics(token, &ids).await
    }

    /// Snippet, statistics and duration for up to 50 videos, in request order.
    pub async fn video_statistics(
        &self,
        token: &BearerToken,
        video_ids: &[String],
    ) -> Result<Vec<VideoSummary>, GatewayError> {
        if video_ids.is_empty() {
            return Ok(Vec::new());
        }
        let batch = &video_ids[..video_ids.len().min(MAX_RESULTS_LIMIT as usize)];

        let url = format!("{}/videos", self.data_base_url);
        let list: ListResponse<VideoResource> = self
            .get_json(
                token,
                &url,
                &[
                    ("part", "snippet,statistics,contentDetails".to_string()),
                    ("id", batch.join(",")),
                ],
            )
            .await?;

        let mut videos: Vec<VideoSummary> = list.items.into_iter().map(VideoSummary::from).collect();
        videos.sort_by_key(|v| batch.iter().position(|id| *id == v.id));
        Ok(videos)
    }

    /// Run an Analytics API report for the authenticated channel.
    pub async fn analytics_report(
        &self,
        token: &BearerToken,
        query: &ReportQuery,
    ) -> Result<AnalyticsReport, GatewayError> {
        let url = format!("{}/reports", self.analytics_base_url);
        let mut params = vec![
            ("ids", "channel==MINE".to_string()),
            ("startDate", query.start_date.format("%Y-%m-%d").to_string()),
            ("endDate", query.end_date.format("%Y-%m-%d").to_string()),
            ("metrics", query.metrics.clone()),
        ];
        if let Some(dimensions) = &query.dimensions {
            params.push(("dimensions", dimensions.clone()));
        }
        if let Some(sort) = &query.sort {
            params.push(("sort", sort.clone()));
        }

        self.get_json(token, &url, &params).await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: &BearerToken,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        debug!(url = %url, "YouTube API request");
        let response = self
            .http_client
            .get(url)
            .bearer_auth(token.as_str())
            .query(query)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = classify_response(status, &body);
            debug!(url = %url, status, kind = ?err.kind(), "YouTube API error");
            return Err(err);
        }

        let body = response.text().await.map_err(|e| classify_transport(&e))?;
        serde_json::from_str(&body).map_err(|e| malformed_body(status, e))
    }
}

impl Default for YouTubeClient {
    fn default() -> Self {
        Self::new()
    }
}
