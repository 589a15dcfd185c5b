//! The run loop: Idle → Discovering → Greeting → Polling → Stopping.
//!
//! One cooperative task per run. The loop owns no state of its own;
//! everything observable lives in [`SharedState`] so the control surface
//! can flip the run flag or cancel at any time. The lock is held only
//! around state reads/writes, never across a network call or sleep.

use super::state::SharedState;
use crate::auth::{Credential, CredentialSource};
use crate::channels::{ChatClient, Notifier};
use crate::config::{BotConfig, NoSessionPolicy};
use crate::personas::PersonaStore;
use crate::providers::ReplyGenerator;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub poll_fallback: Duration,
    pub error_backoff: Duration,
    pub reply_pause: Duration,
    pub no_session_policy: NoSessionPolicy,
    pub no_session_backoff: Duration,
}

impl LoopSettings {
    pub fn from_config(bot: &BotConfig) -> Self {
        Self {
            poll_fallback: Duration::from_secs(bot.poll_fallback_secs),
            error_backoff: Duration::from_secs(bot.error_backoff_secs),
            reply_pause: Duration::from_secs(bot.reply_pause_secs),
            no_session_policy: bot.no_session_policy,
            no_session_backoff: Duration::from_secs(bot.no_session_backoff_secs),
        }
    }
}

/// Everything one run needs, bundled so `start()` can hand it to the
/// spawned task in one move.
#[derive(Clone)]
pub struct SessionDeps {
    pub state: SharedState,
    pub chat: Arc<dyn ChatClient>,
    pub replies: Arc<dyn ReplyGenerator>,
    pub notifier: Arc<dyn Notifier>,
    pub auth: Arc<dyn CredentialSource>,
    pub personas: Arc<PersonaStore>,
    pub settings: LoopSettings,
}

/// Sleep that wakes early on cancellation. Returns true when cancelled.
async fn sleep_cancellable(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}

/// Drive one full run. Spawned by the control surface's `start()`;
/// `run_id` fences this task's cleanup against newer runs.
pub async fn run_session(deps: SessionDeps, cancel: CancellationToken, run_id: u64) {
    tracing::info!(run_id, "run loop starting — discovering live session");

    // ── Discovering ──────────────────────────────────────────────
    let Some(chat_id) = discover(&deps, &cancel).await else {
        deps.state.end_run_for(run_id);
        return;
    };

    {
        let mut st = deps.state.lock();
        if !st.is_running {
            // Stopped during discovery; stop() already cleaned up.
            return;
        }
        st.active_chat_id = Some(chat_id.clone());
    }
    deps.notifier
        .notify(&format!("Live stream found! Watching chat {chat_id}."))
        .await;

    // ── Greeting ─────────────────────────────────────────────────
    let Some(credential) = greet(&deps, &chat_id).await else {
        deps.state.end_run_for(run_id);
        return;
    };

    // ── Polling ──────────────────────────────────────────────────
    poll_cycle(&deps, &cancel, &chat_id, &credential).await;

    tracing::info!(run_id, "run loop exited");
}

/// Find the active live chat session, honoring the no-session policy.
/// `None` means the run should end (the caller notifies nothing further;
/// every exit path here has already notified).
async fn discover(deps: &SessionDeps, cancel: &CancellationToken) -> Option<String> {
    let mut retry_left = match deps.settings.no_session_policy {
        NoSessionPolicy::Stop => 0u32,
        NoSessionPolicy::Retry => 1,
    };

    loop {
        match deps.chat.discover_active_session().await {
            Ok(Some(chat_id)) => return Some(chat_id),
            Ok(None) => {
                if retry_left > 0 {
                    retry_left -= 1;
                    let wait = deps.settings.no_session_backoff;
                    deps.notifier
                        .notify(&format!(
                            "No live stream found — retrying in {}s.",
                            wait.as_secs()
                        ))
                        .await;
                    if sleep_cancellable(cancel, wait).await {
                        return None;
                    }
                    continue;
                }
                deps.notifier
                    .notify("No live stream is currently active. Stopping the bot.")
                    .await;
                return None;
            }
            Err(e) => {
                deps.notifier
                    .notify(&format!("Live stream discovery failed: {e}"))
                    .await;
                return None;
            }
        }
    }
}

/// Acquire the posting credential and post the greeting. The greeting
/// itself is best-effort; a missing credential ends the run.
async fn greet(deps: &SessionDeps, chat_id: &str) -> Option<Credential> {
    let credential = match deps.auth.get_credential().await {
        Ok(c) => c,
        Err(e) => {
            deps.notifier
                .notify(&format!("Cannot post to the chat — {e}"))
                .await;
            return None;
        }
    };

    let persona_name = deps.state.lock().current_persona.clone();
    let persona = deps.personas.current_or_default(&persona_name);

    match deps.chat.post(&credential, chat_id, &persona.greeting).await {
        Ok(message_id) => {
            deps.state.lock().seen_ids.insert(message_id);
            deps.notifier
                .notify(&format!("Greeting posted: {}", persona.greeting))
                .await;
        }
        Err(e) => {
            deps.notifier
                .notify(&format!("Failed to post the greeting: {e}"))
                .await;
        }
    }

    Some(credential)
}

/// The poll/dedupe/generate/post cycle. Exits only on stop or cancel;
/// transport errors back off and retry.
async fn poll_cycle(
    deps: &SessionDeps,
    cancel: &CancellationToken,
    chat_id: &str,
    credential: &Credential,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let page_token = {
            let st = deps.state.lock();
            if !st.is_running {
                return;
            }
            st.next_page_token.clone()
        };

        let page = match deps.chat.poll(chat_id, page_token.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                deps.notifier
                    .notify(&format!("Chat poll failed: {e} — backing off."))
                    .await;
                if sleep_cancellable(cancel, deps.settings.error_backoff).await {
                    return;
                }
                continue;
            }
        };

        // Classify under the lock; all notification happens outside it.
        let (fresh, persona_name) = {
            let mut st = deps.state.lock();
            if !st.is_running {
                return;
            }
            st.next_page_token = page.next_page_token.clone();

            let mut fresh = Vec::new();
            for item in &page.items {
                if st.seen_ids.contains(&item.id) {
                    continue;
                }
                st.seen_ids.insert(item.id.clone());
                // Owner-authored items cover the bot's own posts too:
                // marked seen, never relayed.
                if item.is_owner {
                    continue;
                }
                fresh.push(item.clone());
            }
            (fresh, st.current_persona.clone())
        };

        let mut transcript = String::new();
        for item in &fresh {
            deps.notifier
                .notify(&format!("[{}]: {}", item.author, item.text))
                .await;
            transcript.push_str(&format!("{}: {}\n", item.author, item.text));
        }

        if !transcript.is_empty() {
            let persona = deps.personas.current_or_default(&persona_name);
            match deps
                .replies
                .generate(&transcript, &persona.system_instruction)
                .await
            {
                Ok(reply) if !reply.trim().is_empty() => {
                    let reply = reply.trim().to_string();
                    if sleep_cancellable(cancel, deps.settings.reply_pause).await {
                        return;
                    }
                    match deps.chat.post(credential, chat_id, &reply).await {
                        Ok(message_id) => {
                            deps.state.lock().seen_ids.insert(message_id);
                            deps.notifier
                                .notify(&format!("[AI {persona_name}]: {reply}"))
                                .await;
                        }
                        Err(e) => {
                            deps.notifier
                                .notify(&format!("Failed to post the reply: {e}"))
                                .await;
                        }
                    }
                }
                Ok(_) => {
                    tracing::debug!("generator returned an empty reply — nothing to post");
                }
                Err(e) => {
                    tracing::warn!("reply generation failed: {e} — no reply this cycle");
                }
            }
        }

        let interval = page
            .interval_ms
            .map_or(deps.settings.poll_fallback, Duration::from_millis);
        if sleep_cancellable(cancel, interval).await {
            return;
        }
    }
}
