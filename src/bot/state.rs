//! Shared run state: the single mutation gate between the run loop and
//! the control surface.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Mutable bot state. Invariants:
/// - `active_chat_id` is `Some` only while `is_running` holds.
/// - `seen_ids` only grows during a run; cleared on start and on stop,
///   together with `active_chat_id`, under the lock.
#[derive(Debug)]
pub struct RunState {
    pub is_running: bool,
    pub active_chat_id: Option<String>,
    pub seen_ids: HashSet<String>,
    pub current_persona: String,
    pub next_page_token: Option<String>,
}

/// Per-run control block. The run id fences stale loop tasks: a task that
/// outlives its run can no longer touch state begun by a newer `start()`.
struct RunControl {
    cancel: CancellationToken,
    run_id: u64,
}

struct StateInner {
    state: Mutex<RunState>,
    control: Mutex<RunControl>,
}

/// Cheap cloneable handle owned jointly by the run loop and the control
/// surface. All mutation goes through [`SharedState::lock`] or the
/// begin/end helpers; the lock is never held across an await point.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<StateInner>,
}

impl SharedState {
    pub fn new(default_persona: &str) -> Self {
        Self {
            inner: Arc::new(StateInner {
                state: Mutex::new(RunState {
                    is_running: false,
                    active_chat_id: None,
                    seen_ids: HashSet::new(),
                    current_persona: default_persona.to_string(),
                    next_page_token: None,
                }),
                control: Mutex::new(RunControl {
                    cancel: CancellationToken::new(),
                    run_id: 0,
                }),
            }),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, RunState> {
        self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().is_running
    }

    /// Transition Idle → Discovering: flip the running flag, reset the
    /// per-run fields, and mint a fresh cancellation token. Returns `None`
    /// when a run is already active (no reset happens).
    pub fn begin_run(&self) -> Option<(CancellationToken, u64)> {
        let mut state = self.inner.state.lock();
        if state.is_running {
            return None;
        }
        state.is_running = true;
        state.active_chat_id = None;
        state.seen_ids.clear();
        state.next_page_token = None;

        let mut control = self.inner.control.lock();
        control.run_id += 1;
        control.cancel = CancellationToken::new();
        Some((control.cancel.clone(), control.run_id))
    }

    /// Transition to Idle: clear the per-run fields together and cancel
    /// the loop task. Safe to call when already idle.
    pub fn end_run(&self) {
        let mut state = self.inner.state.lock();
        Self::clear(&mut state);
        self.inner.control.lock().cancel.cancel();
    }

    /// Loop-side cleanup, fenced by run id: a no-op unless `run_id` still
    /// names the current run.
    pub fn end_run_for(&self, run_id: u64) {
        let mut state = self.inner.state.lock();
        let control = self.inner.control.lock();
        if control.run_id == run_id {
            Self::clear(&mut state);
            control.cancel.cancel();
        }
    }

    fn clear(state: &mut RunState) {
        state.is_running = false;
        state.active_chat_id = None;
        state.seen_ids.clear();
        state.next_page_token = None;
    }
}
