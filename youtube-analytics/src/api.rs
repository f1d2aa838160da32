use crate::client::MAX_RESULTS_LIMIT;
use crate::service::AnalyticsService;
use crate::types::{AnalyticsReport, ChannelOverview, VideoSummary};
use apigate::api::{extract_subject, ApiError};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

const DEFAULT_MAX_RESULTS: u32 = 10;

/// Days covered when no range is given, today included.
const DEFAULT_RANGE_DAYS: u64 = 28;

pub struct ChannelAppState {
    pub service: AnalyticsService,
}

#[derive(Deserialize)]
pub struct VideosParams {
    pub max_results: Option<u32>,
}

#[derive(Deserialize)]
pub struct AnalyticsParams {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

impl AnalyticsParams {
    /// Resolve the inclusive date range, defaulting to the last 28 days.
    fn range(&self, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), ApiError> {
        let end = self.end_date.unwrap_or(today);
        let start = match self.start_date {
            Some(start) => start,
            None => end
                .checked_sub_days(Days::new(DEFAULT_RANGE_DAYS - 1))
                .ok_or_else(|| ApiError::BadRequest(format!("end_date {} is out of range", end)))?,
        };
        if start > end {
            return Err(ApiError::BadRequest(format!(
                "start_date {} is after end_date {}",
                start, end
            )));
        }
        Ok((start, end))
    }
}

#[derive(Serialize)]
pub struct RefreshResponse {
    cache_entries_removed: usize,
}

/// Create channel API router
pub fn create_channel_router(state: Arc<ChannelAppState>) -> Router {
    Router::new()
        .route("/api/channel/overview", get(channel_overview))
        .route("/api/channel/videos", get(recent_videos))
        .route("/api/channel/analytics", get(channel_analytics))
        .route("/api/channel/refresh", post(refresh))
        .with_state(state)
}

/// GET /api/channel/overview
async fn channel_overview(
    State(state): State<Arc<ChannelAppState>>,
    headers: HeaderMap,
) -> Result<Json<ChannelOverview>, ApiError> {
    let subject = extract_subject(&headers)?;
    Ok(Json(state.service.get_channel_overview(&subject).await?))
}

/// GET /api/channel/videos?max_results=N
///
/// `max_results` defaults to 10 and must be between 1 and 50.
async fn recent_videos(
    State(state): State<Arc<ChannelAppState>>,
    headers: HeaderMap,
    Query(params): Query<VideosParams>,
) -> Result<Json<Vec<VideoSummary>>, ApiError> {
    let subject = extract_subject(&headers)?;

    let max_results = params.max_results.unwrap_or(DEFAULT_MAX_RESULTS);
    if !(1..=MAX_RESULTS_LIMIT).contains(&max_results) {
        return Err(ApiError::BadRequest(format!(
            "max_results must be between 1 and {}",
            MAX_RESULTS_LIMIT
        )));
    }

    Ok(Json(
        state.service.get_recent_videos(&subject, max_results).await?,
    ))
}

/// GET /api/channel/analytics?start_date=YYYY-MM-DD&end_date=YYYY-MM-DD
async fn channel_analytics(
    State(state): State<Arc<ChannelAppState>>,
    headers: HeaderMap,
    Query(params): Query<AnalyticsParams>,
) -> Result<Json<AnalyticsReport>, ApiError> {
    let subject = extract_subject(&headers)?;
    let (start, end) = params.range(Utc::now().date_naive())?;

    Ok(Json(
        state
            .service
            .get_channel_analytics(&subject, start, end)
            .await?,
    ))
}

/// POST /api/channel/refresh
///
/// Drops the subject's cached responses; the next reads go upstream.
async fn refresh(
    State(state): State<Arc<ChannelAppState>>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, ApiError> {
    let subject = extract_subject(&headers)?;
    let cache_entries_removed = state.service.refresh(&subject).await?;
    info!(subject = %subject, removed = cache_entries_removed, "Channel cache refreshed");

    Ok(Json(RefreshResponse {
        cache_entries_removed,
    }))
}
