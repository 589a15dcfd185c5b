//! LINE Messaging API client: admin push, reply-token messaging,
//! webhook signature verification, and the follower registry.

use super::traits::Notifier;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::path::PathBuf;

const LINE_API_BASE: &str = "https://api.line.me";

pub struct LineClient {
    access_token: String,
    admin_user_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl LineClient {
    pub fn new(access_token: String, admin_user_id: String) -> Self {
        Self::with_base_url(access_token, admin_user_id, None)
    }

    /// Defaults to the public LINE endpoint when `base_url` is `None`.
    pub fn with_base_url(
        access_token: String,
        admin_user_id: String,
        base_url: Option<&str>,
    ) -> Self {
        Self {
            access_token,
            admin_user_id,
            base_url: base_url.unwrap_or(LINE_API_BASE).to_string(),
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/v2/bot/message/{method}", self.base_url)
    }

    /// Push a text message to the admin user.
    pub async fn push_to_admin(&self, text: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "to": self.admin_user_id,
            "messages": [{ "type": "text", "text": text }]
        });

        let resp = self
            .client
            .post(self.api_url("push"))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("LINE push failed ({status}): {body}");
        }
        Ok(())
    }

    /// Answer the sender of a webhook event via its one-time reply token.
    pub async fn reply(&self, reply_token: &str, text: &str) -> anyhow::Result<()> {
        let body = serde_json::json!({
            "replyToken": reply_token,
            "messages": [{ "type": "text", "text": text }]
        });

        let resp = self
            .client
            .post(self.api_url("reply"))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("LINE reply failed ({status}): {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for LineClient {
    async fn notify(&self, text: &str) {
        if let Err(e) = self.push_to_admin(text).await {
            tracing::warn!("admin notification dropped: {e}");
        }
    }
}

// ── Webhook signature ───────────────────────────────────────────────

/// Verify the `x-line-signature` header: base64 HMAC-SHA256 of the raw
/// request body with the channel secret.
pub fn verify_signature(channel_secret: &str, signature: &str, body: &[u8]) -> bool {
    let Ok(expected) = STANDARD.decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

// ── Webhook events ──────────────────────────────────────────────────

/// A webhook event reduced to what the control surface dispatches on.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Follow { user_id: String },
    Text { reply_token: String, text: String },
    Other,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(rename = "replyToken")]
    reply_token: Option<String>,
    message: Option<RawMessage>,
    source: Option<RawSource>,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// Parse a webhook body into tagged events. Unknown or incomplete events
/// map to `Other` rather than failing the whole payload.
pub fn parse_webhook_events(body: &str) -> Vec<WebhookEvent> {
    let Ok(payload) = serde_json::from_str::<WebhookPayload>(body) else {
        tracing::warn!("unparseable LINE webhook payload");
        return Vec::new();
    };

    payload
        .events
        .into_iter()
        .map(|ev| match ev.event_type.as_str() {
            "follow" => match ev.source.and_then(|s| s.user_id) {
                Some(user_id) => WebhookEvent::Follow { user_id },
                None => WebhookEvent::Other,
            },
            "message" => {
                let reply_token = ev.reply_token;
                let text = ev
                    .message
                    .filter(|m| m.kind == "text")
                    .and_then(|m| m.text);
                match (reply_token, text) {
                    (Some(reply_token), Some(text)) => WebhookEvent::Text { reply_token, text },
                    _ => WebhookEvent::Other,
                }
            }
            _ => WebhookEvent::Other,
        })
        .collect()
}

// ── Follower registry ───────────────────────────────────────────────

/// JSON-file registry of users who followed the bot.
pub struct UserRegistry {
    path: PathBuf,
}

impl UserRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn list(&self) -> Vec<String> {
        let Ok(content) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        serde_json::from_str(&content).unwrap_or_default()
    }

    /// Record a user id. Returns true when it was newly added.
    pub fn record(&self, user_id: &str) -> anyhow::Result<bool> {
        let mut users = self.list();
        if users.iter().any(|u| u == user_id) {
            return Ok(false);
        }
        users.push(user_id.to_string());

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&users)?)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_api_url() {
        let client = LineClient::new("tok".into(), "admin".into());
        assert_eq!(client.api_url("push"), "https://api.line.me/v2/bot/message/push");
        assert_eq!(
            client.api_url("reply"),
            "https://api.line.me/v2/bot/message/reply"
        );
    }

    #[test]
    fn signature_round_trip() {
        let secret = "channel-secret";
        let body = br#"{"events":[]}"#;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, &signature, body));
        assert!(!verify_signature("wrong-secret", &signature, body));
        assert!(!verify_signature(secret, &signature, b"tampered body"));
        assert!(!verify_signature(secret, "not-base64!!", body));
    }

    #[test]
    fn parse_text_message_event() {
        let body = r#"{
            "events": [{
                "type": "message",
                "replyToken": "rt-1",
                "message": { "type": "text", "text": "start" },
                "source": { "userId": "U1" }
            }]
        }"#;

        let events = parse_webhook_events(body);
        assert_eq!(events.len(), 1);
        match &events[0] {
            WebhookEvent::Text { reply_token, text } => {
                assert_eq!(reply_token, "rt-1");
                assert_eq!(text, "start");
            }
            other => panic!("expected Text, got {other:?}"),
        }
    }

    #[test]
    fn parse_follow_event() {
        let body = r#"{
            "events": [{ "type": "follow", "source": { "userId": "U99" } }]
        }"#;

        let events = parse_webhook_events(body);
        match &events[0] {
            WebhookEvent::Follow { user_id } => assert_eq!(user_id, "U99"),
            other => panic!("expected Follow, got {other:?}"),
        }
    }

    #[test]
    fn non_text_and_unknown_events_map_to_other() {
        let body = r#"{
            "events": [
                { "type": "message", "replyToken": "rt", "message": { "type": "sticker" } },
                { "type": "unfollow", "source": { "userId": "U1" } }
            ]
        }"#;

        let events = parse_webhook_events(body);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], WebhookEvent::Other));
        assert!(matches!(events[1], WebhookEvent::Other));
    }

    #[test]
    fn garbage_payload_yields_no_events() {
        assert!(parse_webhook_events("not json").is_empty());
        assert!(parse_webhook_events("{}").is_empty());
    }

    #[test]
    fn user_registry_deduplicates() {
        let dir = tempfile::tempdir().unwrap();
        let registry = UserRegistry::new(dir.path().join("users.json"));

        assert!(registry.list().is_empty());
        assert!(registry.record("U1").unwrap());
        assert!(!registry.record("U1").unwrap());
        assert!(registry.record("U2").unwrap());
        assert_eq!(registry.list(), vec!["U1".to_string(), "U2".to_string()]);
    }
}
