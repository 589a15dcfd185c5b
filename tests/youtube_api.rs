//! YouTube client and credential refresh against a local mock API.

use liverelay::auth::{
    Credential, CredentialManager, CredentialSource, FileTokenStore, TokenStore,
};
use liverelay::channels::{ChatClient, YouTubeLiveChat};
use liverelay::config::YouTubeConfig;
use liverelay::error::RelayError;
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config() -> YouTubeConfig {
    YouTubeConfig {
        api_key: "yt-key".into(),
        channel_id: "UC123".into(),
    }
}

fn credential() -> Credential {
    Credential {
        access_token: "at-1".into(),
        refresh_token: Some("rt-1".into()),
        expiry: Some("2099-12-31T23:59:59Z".into()),
        client_id: Some("cid".into()),
        client_secret: Some("csec".into()),
    }
}

// ── Discovery ───────────────────────────────────────────────────────

#[tokio::test]
async fn discovery_finds_active_chat_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("channelId", "UC123"))
        .and(query_param("eventType", "live"))
        .and(query_param("key", "yt-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{ "id": { "videoId": "vid-1" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/videos"))
        .and(query_param("id", "vid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{ "liveStreamingDetails": { "activeLiveChatId": "chat-xyz" } }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let yt = YouTubeLiveChat::with_base_url(&config(), Some(&server.uri()));
    let session = yt.discover_active_session().await.unwrap();
    assert_eq!(session.as_deref(), Some("chat-xyz"));
}

#[tokio::test]
async fn discovery_with_no_live_stream_is_none() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": []
        })))
        .mount(&server)
        .await;

    let yt = YouTubeLiveChat::with_base_url(&config(), Some(&server.uri()));
    assert!(yt.discover_active_session().await.unwrap().is_none());
}

#[tokio::test]
async fn discovery_surfaces_api_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(403).set_body_string("quotaExceeded"))
        .mount(&server)
        .await;

    let yt = YouTubeLiveChat::with_base_url(&config(), Some(&server.uri()));
    let err = yt.discover_active_session().await.unwrap_err();
    assert!(err.to_string().contains("quotaExceeded"));
}

// ── Polling ─────────────────────────────────────────────────────────

#[tokio::test]
async fn poll_maps_items_cursor_and_interval() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/liveChat/messages"))
        .and(query_param("liveChatId", "chat-xyz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [
                {
                    "id": "c1",
                    "snippet": { "displayMessage": "hi" },
                    "authorDetails": { "displayName": "Alice", "isChatOwner": false }
                },
                {
                    "id": "c2",
                    "snippet": { "displayMessage": "welcome" },
                    "authorDetails": { "displayName": "Streamer", "isChatOwner": true }
                }
            ],
            "nextPageToken": "page-2",
            "pollingIntervalMillis": 7000
        })))
        .mount(&server)
        .await;

    let yt = YouTubeLiveChat::with_base_url(&config(), Some(&server.uri()));
    let page = yt.poll("chat-xyz", None).await.unwrap();

    assert_eq!(page.items.len(), 2);
    assert_eq!(page.items[0].id, "c1");
    assert_eq!(page.items[0].author, "Alice");
    assert!(!page.items[0].is_owner);
    assert!(page.items[1].is_owner);
    assert_eq!(page.next_page_token.as_deref(), Some("page-2"));
    assert_eq!(page.interval_ms, Some(7000));
}

#[tokio::test]
async fn poll_passes_page_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/liveChat/messages"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let yt = YouTubeLiveChat::with_base_url(&config(), Some(&server.uri()));
    let page = yt.poll("chat-xyz", Some("page-2")).await.unwrap();
    assert!(page.items.is_empty());
    assert!(page.interval_ms.is_none());
}

// ── Posting ─────────────────────────────────────────────────────────

#[tokio::test]
async fn post_sends_bearer_auth_and_returns_message_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/liveChat/messages"))
        .and(query_param("part", "snippet"))
        .and(header("authorization", "Bearer at-1"))
        .and(body_string_contains("textMessageEvent"))
        .and(body_string_contains("hello!"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "posted-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let yt = YouTubeLiveChat::with_base_url(&config(), Some(&server.uri()));
    let id = yt.post(&credential(), "chat-xyz", "hello!").await.unwrap();
    assert_eq!(id, "posted-1");
}

#[tokio::test]
async fn post_refuses_empty_text() {
    // No server needed; the guard fires before any request.
    let yt = YouTubeLiveChat::with_base_url(&config(), Some("http://127.0.0.1:1"));
    assert!(yt.post(&credential(), "chat-xyz", "   ").await.is_err());
}

// ── Credential refresh ──────────────────────────────────────────────

fn expired_credential() -> Credential {
    Credential {
        expiry: Some("2020-01-01T00:00:00Z".into()),
        ..credential()
    }
}

#[tokio::test]
async fn expired_credential_is_refreshed_and_persisted() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=rt-1"))
        .and(body_string_contains("client_id=cid"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at-2",
            "expires_in": 3600,
            "token_type": "Bearer"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));
    store.save(&expired_credential()).unwrap();

    let manager =
        CredentialManager::with_token_url(store.clone(), Some(&format!("{}/token", server.uri())));
    let refreshed = manager.get_credential().await.unwrap();

    assert_eq!(refreshed.access_token, "at-2");
    assert!(!refreshed.is_expired(60));
    // Refresh token and client info are carried over.
    assert_eq!(refreshed.refresh_token.as_deref(), Some("rt-1"));

    // The new token was persisted back to the store.
    let persisted = store.load().unwrap().unwrap();
    assert_eq!(persisted.access_token, "at-2");
}

#[tokio::test]
async fn rejected_refresh_collapses_to_auth_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant"
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));
    store.save(&expired_credential()).unwrap();

    let manager =
        CredentialManager::with_token_url(store.clone(), Some(&format!("{}/token", server.uri())));
    let err = manager.get_credential().await.unwrap_err();

    assert!(matches!(err, RelayError::Auth(_)));
    assert!(err.to_string().contains("invalid_grant"));

    // The stale credential is left untouched for later re-auth inspection.
    let persisted = store.load().unwrap().unwrap();
    assert_eq!(persisted.access_token, "at-1");
}

#[tokio::test]
async fn valid_credential_skips_the_token_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("token.json")));
    store.save(&credential()).unwrap();

    let manager =
        CredentialManager::with_token_url(store, Some(&format!("{}/token", server.uri())));
    let c = manager.get_credential().await.unwrap();
    assert_eq!(c.access_token, "at-1");
}
