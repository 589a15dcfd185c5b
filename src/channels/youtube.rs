//! YouTube Data API v3 live chat client.
//!
//! Discovery is two calls: `search` for a live event on the configured
//! channel, then `videos` for that video's `activeLiveChatId`. Polling and
//! posting go through `liveChat/messages`. Read calls authenticate with
//! the API key; posting needs the OAuth credential.

use super::traits::{ChatClient, ChatItem, ChatPage};
use crate::auth::Credential;
use crate::config::YouTubeConfig;
use async_trait::async_trait;
use serde::Deserialize;

const YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

pub struct YouTubeLiveChat {
    api_key: String,
    channel_id: String,
    base_url: String,
    client: reqwest::Client,
}

// ── API response types ───────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchItemId,
}

#[derive(Debug, Deserialize)]
struct SearchItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    #[serde(rename = "liveStreamingDetails")]
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
struct LiveStreamingDetails {
    #[serde(rename = "activeLiveChatId")]
    active_live_chat_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    items: Vec<MessageItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(rename = "pollingIntervalMillis")]
    polling_interval_millis: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MessageItem {
    id: String,
    snippet: MessageSnippet,
    #[serde(rename = "authorDetails")]
    author_details: AuthorDetails,
}

#[derive(Debug, Deserialize)]
struct MessageSnippet {
    #[serde(rename = "displayMessage")]
    display_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorDetails {
    #[serde(rename = "displayName")]
    display_name: String,
    #[serde(rename = "isChatOwner", default)]
    is_chat_owner: bool,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    id: String,
}

impl YouTubeLiveChat {
    pub fn new(config: &YouTubeConfig) -> Self {
        Self::with_base_url(config, None)
    }

    /// Defaults to the public YouTube API endpoint when `base_url` is `None`.
    pub fn with_base_url(config: &YouTubeConfig, base_url: Option<&str>) -> Self {
        Self {
            api_key: config.api_key.clone(),
            channel_id: config.channel_id.clone(),
            base_url: base_url.unwrap_or(YOUTUBE_API_BASE).to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn api_url(&self, resource: &str) -> String {
        format!("{}/{resource}", self.base_url)
    }

    async fn live_video_id(&self) -> anyhow::Result<Option<String>> {
        let resp = self
            .client
            .get(self.api_url("search"))
            .query(&[
                ("part", "snippet"),
                ("channelId", self.channel_id.as_str()),
                ("eventType", "live"),
                ("type", "video"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("YouTube search failed ({status}): {body}");
        }

        let parsed: SearchResponse = resp.json().await?;
        Ok(parsed.items.into_iter().find_map(|item| item.id.video_id))
    }
}

#[async_trait]
impl ChatClient for YouTubeLiveChat {
    async fn discover_active_session(&self) -> anyhow::Result<Option<String>> {
        let Some(video_id) = self.live_video_id().await? else {
            return Ok(None);
        };

        let resp = self
            .client
            .get(self.api_url("videos"))
            .query(&[
                ("part", "liveStreamingDetails"),
                ("id", video_id.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("YouTube videos lookup failed ({status}): {body}");
        }

        let parsed: VideosResponse = resp.json().await?;
        let chat_id = parsed
            .items
            .into_iter()
            .next()
            .and_then(|v| v.live_streaming_details)
            .and_then(|d| d.active_live_chat_id);

        if chat_id.is_none() {
            tracing::warn!(video_id = %video_id, "live video has no active chat");
        }
        Ok(chat_id)
    }

    async fn poll(
        &self,
        session_id: &str,
        page_token: Option<&str>,
    ) -> anyhow::Result<ChatPage> {
        let mut query = vec![
            ("liveChatId", session_id),
            ("part", "snippet,authorDetails"),
            ("maxResults", "200"),
            ("key", self.api_key.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let resp = self
            .client
            .get(self.api_url("liveChat/messages"))
            .query(&query)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("YouTube chat poll failed ({status}): {body}");
        }

        let parsed: MessagesResponse = resp.json().await?;

        let items = parsed
            .items
            .into_iter()
            .filter_map(|item| {
                // Membership/superchat events carry no display text; nothing to relay.
                let text = item.snippet.display_message?;
                Some(ChatItem {
                    id: item.id,
                    author: item.author_details.display_name,
                    text,
                    is_owner: item.author_details.is_chat_owner,
                })
            })
            .collect();

        Ok(ChatPage {
            items,
            next_page_token: parsed.next_page_token,
            interval_ms: parsed.polling_interval_millis,
        })
    }

    async fn post(
        &self,
        credential: &Credential,
        session_id: &str,
        text: &str,
    ) -> anyhow::Result<String> {
        anyhow::ensure!(!text.trim().is_empty(), "refusing to post empty message");

        let body = serde_json::json!({
            "snippet": {
                "liveChatId": session_id,
                "type": "textMessageEvent",
                "textMessageDetails": { "messageText": text }
            }
        });

        let resp = self
            .client
            .post(self.api_url("liveChat/messages"))
            .query(&[("part", "snippet")])
            .bearer_auth(&credential.access_token)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("YouTube chat post failed ({status}): {body}");
        }

        let parsed: InsertResponse = resp.json().await?;
        Ok(parsed.id)
    }
}
