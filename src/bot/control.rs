//! The control surface: start/stop/persona-switch/manual-post, plus the
//! command-to-acknowledgment mapping used by the webhook dispatcher.
//!
//! Every operation serializes with the run loop through the one lock in
//! [`SharedState`]; none of them holds it across a remote call.

use super::commands::Command;
use super::run_loop::{self, SessionDeps};
use crate::personas::Persona;

#[derive(Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, PartialEq, Eq)]
pub enum StopOutcome {
    Stopping,
    AlreadyStopped,
}

#[derive(Debug)]
pub enum PersonaOutcome {
    Switched(Persona),
    NotFound,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PostOutcome {
    Posted,
    NotRunning,
    Failed(String),
}

pub struct ControlSurface {
    deps: SessionDeps,
}

impl ControlSurface {
    pub fn new(deps: SessionDeps) -> Self {
        Self { deps }
    }

    /// Begin a run: reset per-run state and spawn the loop task.
    pub fn start(&self) -> StartOutcome {
        let Some((cancel, run_id)) = self.deps.state.begin_run() else {
            return StartOutcome::AlreadyRunning;
        };
        tokio::spawn(run_loop::run_session(self.deps.clone(), cancel, run_id));
        StartOutcome::Started
    }

    /// End the run: post the goodbye (best-effort), then clear state and
    /// cancel the loop. No remote calls happen when already stopped.
    pub async fn stop(&self) -> StopOutcome {
        let (chat_id, persona_name) = {
            let st = self.deps.state.lock();
            if !st.is_running {
                return StopOutcome::AlreadyStopped;
            }
            (st.active_chat_id.clone(), st.current_persona.clone())
        };

        if let Some(chat_id) = chat_id {
            let persona = self.deps.personas.current_or_default(&persona_name);
            match self.deps.auth.get_credential().await {
                Ok(credential) => {
                    match self
                        .deps
                        .chat
                        .post(&credential, &chat_id, &persona.goodbye)
                        .await
                    {
                        Ok(_) => {
                            self.deps
                                .notifier
                                .notify(&format!("Goodbye posted: {}", persona.goodbye))
                                .await;
                        }
                        Err(e) => {
                            self.deps
                                .notifier
                                .notify(&format!("Failed to post the goodbye: {e}"))
                                .await;
                        }
                    }
                }
                Err(e) => {
                    self.deps
                        .notifier
                        .notify(&format!("Goodbye skipped — {e}"))
                        .await;
                }
            }
        }

        self.deps.state.end_run();
        StopOutcome::Stopping
    }

    /// Switch the active persona. Unknown names change nothing.
    pub fn switch_persona(&self, name: &str) -> PersonaOutcome {
        match self.deps.personas.get(name) {
            Some(persona) => {
                self.deps.state.lock().current_persona = name.to_string();
                PersonaOutcome::Switched(persona)
            }
            None => PersonaOutcome::NotFound,
        }
    }

    /// Post operator-supplied text into the live chat.
    pub async fn manual_post(&self, text: &str) -> PostOutcome {
        let chat_id = {
            let st = self.deps.state.lock();
            if !st.is_running {
                return PostOutcome::NotRunning;
            }
            match st.active_chat_id.clone() {
                Some(chat_id) => chat_id,
                None => return PostOutcome::NotRunning,
            }
        };

        let credential = match self.deps.auth.get_credential().await {
            Ok(c) => c,
            Err(e) => return PostOutcome::Failed(e.to_string()),
        };

        match self.deps.chat.post(&credential, &chat_id, text).await {
            Ok(message_id) => {
                self.deps.state.lock().seen_ids.insert(message_id);
                PostOutcome::Posted
            }
            Err(e) => PostOutcome::Failed(e.to_string()),
        }
    }

    /// Execute a parsed command and produce the acknowledgment sent back
    /// to the issuer. Always returns a short human-readable string.
    pub async fn handle_command(&self, command: Command) -> String {
        match command {
            Command::Start => match self.start() {
                StartOutcome::Started => {
                    "Bot started. Searching for an active live stream.".to_string()
                }
                StartOutcome::AlreadyRunning => "Bot is already running.".to_string(),
            },
            Command::Stop => match self.stop().await {
                StopOutcome::Stopping => "Stopping the bot.".to_string(),
                StopOutcome::AlreadyStopped => "Bot is already stopped.".to_string(),
            },
            Command::SwitchPersona(name) => match self.switch_persona(&name) {
                PersonaOutcome::Switched(persona) => {
                    format!("Persona switched to '{}'.", persona.display_name)
                }
                PersonaOutcome::NotFound => format!("Persona '{name}' not found."),
            },
            Command::PersonaUsage => {
                "Specify a persona name (e.g. persona default).".to_string()
            }
            Command::Post(text) => match self.manual_post(&text).await {
                PostOutcome::Posted => format!("Posted to the live chat:\n\"{text}\""),
                PostOutcome::NotRunning => {
                    "The bot is not running or no live stream has been detected, \
                     so the comment cannot be posted."
                        .to_string()
                }
                PostOutcome::Failed(reason) => {
                    format!("Failed to post the comment: {reason}")
                }
            },
        }
    }
}
