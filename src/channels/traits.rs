use crate::auth::Credential;
use async_trait::async_trait;

/// One chat message received from the live platform
#[derive(Debug, Clone)]
pub struct ChatItem {
    pub id: String,
    pub author: String,
    pub text: String,
    /// Authored by the channel owner (the account the bot posts as).
    pub is_owner: bool,
}

/// One page of polled chat messages
#[derive(Debug, Clone, Default)]
pub struct ChatPage {
    /// Items in platform arrival order.
    pub items: Vec<ChatItem>,
    /// Opaque cursor for the next poll; absent on the first call.
    pub next_page_token: Option<String>,
    /// Platform-requested delay before the next poll.
    pub interval_ms: Option<u64>,
}

/// Live chat platform seam: discovery, polling, posting
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Find the currently active live chat session, if any.
    async fn discover_active_session(&self) -> anyhow::Result<Option<String>>;

    /// Fetch the next batch of chat items.
    async fn poll(&self, session_id: &str, page_token: Option<&str>)
    -> anyhow::Result<ChatPage>;

    /// Post one message into the chat. Returns the created message id.
    async fn post(
        &self,
        credential: &Credential,
        session_id: &str,
        text: &str,
    ) -> anyhow::Result<String>;
}

/// One-way admin notification. Best-effort, never raises
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str);
}
