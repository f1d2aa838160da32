//! Wire types for the YouTube Data API v3 and Analytics API v2, plus the
//! cacheable summaries served to consumers.

use serde::{Deserialize, Deserializer, Serialize};

/// YouTube encodes 64-bit counters as JSON strings.
fn string_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Counter {
        Text(String),
        Number(u64),
    }

    match Counter::deserialize(deserializer)? {
        Counter::Number(n) => Ok(n),
        Counter::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

// ── Data API wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(rename = "nextPageToken", default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Thumbnails {
    #[serde(default)]
    pub default: Option<Thumbnail>,
    #[serde(default)]
    pub medium: Option<Thumbnail>,
    #[serde(default)]
    pub high: Option<Thumbnail>,
}

impl Thumbnails {
    /// Largest available thumbnail.
    pub fn best(&self) -> Option<&str> {
        self.high
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.default.as_ref())
            .map(|t| t.url.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub custom_url: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatistics {
    #[serde(default, deserialize_with = "string_u64")]
    pub view_count: u64,
    #[serde(default, deserialize_with = "string_u64")]
    pub subscriber_count: u64,
    #[serde(default)]
    pub hidden_subscriber_count: bool,
    #[serde(default, deserialize_with = "string_u64")]
    pub video_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct RelatedPlaylists {
    pub uploads: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContentDetails {
    pub related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelResource {
    pub id: String,
    pub snippet: ChannelSnippet,
    #[serde(default)]
    pub statistics: ChannelStatistics,
    pub content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemContentDetails {
    pub video_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItemResource {
    pub content_details: PlaylistItemContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub title: String,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatistics {
    #[serde(default, deserialize_with = "string_u64")]
    pub view_count: u64,
    #[serde(default, deserialize_with = "string_u64")]
    pub like_count: u64,
    #[serde(default, deserialize_with = "string_u64")]
    pub comment_count: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct VideoContentDetails {
    /// ISO 8601 duration, e.g. `PT4M13S`
    #[serde(default)]
    pub duration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResource {
    pub id: String,
    pub snippet: VideoSnippet,
    #[serde(default)]
    pub statistics: VideoStatistics,
    #[serde(default)]
    pub content_details: VideoContentDetails,
}

// ── Analytics API wire types ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnHeader {
    pub name: String,
    pub column_type: String,
    pub data_type: String,
}

/// A `youtubeAnalytics#resultTable`, cached as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    #[serde(default)]
    pub column_headers: Vec<ColumnHeader>,
    /// Absent when the range has no data
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl AnalyticsReport {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_headers.iter().position(|h| h.name == name)
    }

    /// Sum of an integer metric over all rows.
    pub fn total(&self, metric: &str) -> Option<u64> {
        let index = self.column_index(metric)?;
        Some(
            self.rows
                .iter()
                .filter_map(|row| row.get(index).and_then(|v| v.as_u64()))
                .sum(),
        )
    }
}

// ── Cached summaries ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelOverview {
    pub id: String,
    pub title: String,
    pub description: String,
    pub custom_url: Option<String>,
    pub published_at: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Zero when the channel hides it
    pub subscriber_count: u64,
    pub view_count: u64,
    pub video_count: u64,
    pub uploads_playlist_id: String,
}

impl From<ChannelResource> for ChannelOverview {
    fn from(channel: ChannelResource) -> Self {
        let subscriber_count = if channel.statistics.hidden_subscriber_count {
            0
        } else {
            channel.statistics.subscriber_count
        };

        Self {
            thumbnail_url: channel.snippet.thumbnails.best().map(str::to_string),
            id: channel.id,
            title: channel.snippet.title,
            description: channel.snippet.description,
            custom_url: channel.snippet.custom_url,
            published_at: channel.snippet.published_at,
            subscriber_count,
            view_count: channel.statistics.view_count,
            video_count: channel.statistics.video_count,
            uploads_playlist_id: channel.content_details.related_playlists.uploads,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSummary {
    pub id: String,
    pub title: String,
    pub published_at: Option<String>,
    pub thumbnail_url: Option<String>,
    pub duration: Option<String>,
    pub view_count: u64,
    pub like_count: u64,
    pub comment_count: u64,
}

impl From<VideoResource> for VideoSummary {
    fn from(video: VideoResource) -> Self {
        Self {
            thumbnail_url: video.snippet.thumbnails.best().map(str::to_string),
            id: video.id,
            title: video.snippet.title,
            published_at: video.snippet.published_at,
            duration: video.content_details.duration,
            view_count: video.statistics.view_count,
            like_count: video.statistics.like_count,
            comment_count: video.statistics.comment_count,
        }
    }
}
