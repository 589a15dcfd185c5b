//! Shared test doubles for the run-loop and control-surface tests.
#![allow(dead_code)]

use async_trait::async_trait;
use liverelay::auth::{Credential, CredentialSource};
use liverelay::bot::{LoopSettings, SessionDeps, SharedState};
use liverelay::channels::{ChatClient, ChatItem, ChatPage, Notifier};
use liverelay::config::NoSessionPolicy;
use liverelay::error::RelayError;
use liverelay::personas::PersonaStore;
use liverelay::providers::ReplyGenerator;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn item(id: &str, author: &str, text: &str, is_owner: bool) -> ChatItem {
    ChatItem {
        id: id.into(),
        author: author.into(),
        text: text.into(),
        is_owner,
    }
}

pub fn page(items: Vec<ChatItem>) -> ChatPage {
    ChatPage {
        items,
        next_page_token: None,
        interval_ms: Some(5),
    }
}

/// Chat client that serves a scripted sequence of pages, then empty ones.
pub struct ScriptedChat {
    pub session: Option<String>,
    pub pages: Mutex<VecDeque<ChatPage>>,
    pub posts: Mutex<Vec<String>>,
    pub discover_calls: AtomicUsize,
    pub poll_calls: AtomicUsize,
    post_seq: AtomicUsize,
}

impl ScriptedChat {
    pub fn new(session: Option<&str>, pages: Vec<ChatPage>) -> Self {
        Self {
            session: session.map(String::from),
            pages: Mutex::new(pages.into()),
            posts: Mutex::new(Vec::new()),
            discover_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            post_seq: AtomicUsize::new(0),
        }
    }

    pub fn posts(&self) -> Vec<String> {
        self.posts.lock().clone()
    }
}

#[async_trait]
impl ChatClient for ScriptedChat {
    async fn discover_active_session(&self) -> anyhow::Result<Option<String>> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.session.clone())
    }

    async fn poll(
        &self,
        _session_id: &str,
        _page_token: Option<&str>,
    ) -> anyhow::Result<ChatPage> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.lock().pop_front().unwrap_or_else(|| page(vec![])))
    }

    async fn post(
        &self,
        _credential: &Credential,
        _session_id: &str,
        text: &str,
    ) -> anyhow::Result<String> {
        self.posts.lock().push(text.to_string());
        let n = self.post_seq.fetch_add(1, Ordering::SeqCst);
        Ok(format!("bot-msg-{n}"))
    }
}

/// Generator that always returns the same reply (or always fails).
pub struct FixedReply {
    pub reply: Option<String>,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl FixedReply {
    pub fn new(reply: Option<&str>) -> Self {
        Self {
            reply: reply.map(String::from),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn transcripts(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(t, _)| t.clone()).collect()
    }
}

#[async_trait]
impl ReplyGenerator for FixedReply {
    async fn generate(
        &self,
        transcript: &str,
        system_instruction: &str,
    ) -> anyhow::Result<String> {
        self.calls
            .lock()
            .push((transcript.to_string(), system_instruction.to_string()));
        match &self.reply {
            Some(reply) => Ok(reply.clone()),
            None => anyhow::bail!("generator offline"),
        }
    }
}

/// Captures every admin notification.
#[derive(Default)]
pub struct RecordingNotifier {
    pub lines: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.lock().iter().any(|l| l.contains(needle))
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines.lock().iter().filter(|l| l.contains(needle)).count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, text: &str) {
        self.lines.lock().push(text.to_string());
    }
}

/// Credential source that either always succeeds or always fails.
pub struct StaticAuth {
    pub ok: bool,
    pub calls: AtomicUsize,
}

impl StaticAuth {
    pub fn granting() -> Self {
        Self {
            ok: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn denying() -> Self {
        Self {
            ok: false,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CredentialSource for StaticAuth {
    async fn get_credential(&self) -> Result<Credential, RelayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.ok {
            Ok(Credential {
                access_token: "test-token".into(),
                refresh_token: None,
                expiry: None,
                client_id: None,
                client_secret: None,
            })
        } else {
            Err(RelayError::Auth(
                "token refresh rejected (400 Bad Request): invalid_grant".into(),
            ))
        }
    }
}

/// Millisecond-scale settings so tests finish fast.
pub fn fast_settings() -> LoopSettings {
    LoopSettings {
        poll_fallback: Duration::from_millis(5),
        error_backoff: Duration::from_millis(10),
        reply_pause: Duration::from_millis(1),
        no_session_policy: NoSessionPolicy::Stop,
        no_session_backoff: Duration::from_millis(5),
    }
}

pub struct Harness {
    pub deps: SessionDeps,
    pub chat: Arc<ScriptedChat>,
    pub replies: Arc<FixedReply>,
    pub notifier: Arc<RecordingNotifier>,
    pub auth: Arc<StaticAuth>,
    _personas_dir: tempfile::TempDir,
}

pub fn harness(chat: ScriptedChat, replies: FixedReply, auth: StaticAuth) -> Harness {
    let chat = Arc::new(chat);
    let replies = Arc::new(replies);
    let notifier = Arc::new(RecordingNotifier::default());
    let auth = Arc::new(auth);
    let personas_dir = tempfile::tempdir().expect("tempdir");

    let deps = SessionDeps {
        state: SharedState::new("default"),
        chat: chat.clone(),
        replies: replies.clone(),
        notifier: notifier.clone(),
        auth: auth.clone(),
        personas: Arc::new(PersonaStore::new(personas_dir.path())),
        settings: fast_settings(),
    };

    Harness {
        deps,
        chat,
        replies,
        notifier,
        auth,
        _personas_dir: personas_dir,
    }
}

/// Poll a condition until it holds or two seconds elapse.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 2s");
}
