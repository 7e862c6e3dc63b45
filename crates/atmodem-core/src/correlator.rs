//! # Command/response correlation
//!
//! Single-slot state machine pairing the one outstanding command with the
//! lines the listener thread decodes:
//!
//! ```text
//!   Idle ──execute──▶ Awaiting(policy) ──terminating line──▶ Idle
//!                          │
//!                       timeout ──▶ Idle (Err)
//! ```
//!
//! The caller thread blocks inside [`Correlator::execute`] on a condition
//! variable; the listener thread appends lines through
//! [`Correlator::on_line`] and notifies once the active policy terminates.
//! Both sides touch [`ExchangeState`] only under the same mutex.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::command::{Command, Completion, CompletionPolicy};
use crate::decoder::PROMPT;
use crate::error::{ModemError, Result};
use crate::transport::{Transport, CTRL_Z};

/// Mutable exchange record shared between caller and listener.
#[derive(Debug, Default)]
struct ExchangeState {
    active_policy: Option<CompletionPolicy>,
    pending: bool,
    result: Option<bool>,
    lines: Vec<String>,
    /// Set while an SMS body is being entered; a `>` is then expected.
    text_sending: bool,
}

impl ExchangeState {
    fn reset_idle(&mut self) {
        self.active_policy = None;
        self.pending = false;
    }

    /// A `>` outside of body entry means the modem is still waiting for the
    /// body of an exchange that was abandoned.
    fn is_stale_prompt(&self, line: &str) -> bool {
        line == PROMPT
            && !self.text_sending
            && self.active_policy != Some(CompletionPolicy::AwaitPrompt)
    }
}

/// How [`Correlator::on_line`] handled a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// No exchange outstanding; line dropped.
    Ignored,
    /// Appended, exchange still waiting.
    Accumulated,
    /// Appended and ended the exchange.
    Terminated,
}

/// Rendezvous between the command issuer and the listener thread.
pub struct Correlator {
    transport: Arc<dyn Transport>,
    state: Mutex<ExchangeState>,
    done: Condvar,
    /// Serializes `execute` callers; held for the whole exchange.
    slot: Mutex<()>,
    response_timeout: Duration,
}

impl Correlator {
    pub fn new(transport: Arc<dyn Transport>, response_timeout: Duration) -> Self {
        Self {
            transport,
            state: Mutex::new(ExchangeState::default()),
            done: Condvar::new(),
            slot: Mutex::new(()),
            response_timeout,
        }
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Issue `command` and block until its policy terminates or the response
    /// timeout fires.
    ///
    /// A second caller blocks until the first exchange has finished.
    pub fn execute(&self, command: &Command) -> Result<Completion> {
        self.execute_with_timeout(command, self.response_timeout)
    }

    pub fn execute_with_timeout(&self, command: &Command, timeout: Duration) -> Result<Completion> {
        let _slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let policy = command.policy();

        {
            let mut state = self.lock_state();
            state.lines.clear();
            state.result = None;
            state.active_policy = Some(policy);
            state.pending = true;
        }

        info!(command = %command, %policy, "sending command");
        if let Err(e) = self.transport.write(command.payload()) {
            self.lock_state().reset_idle();
            warn!(command = %command, error = %e, "command write failed");
            return Err(e.into());
        }

        let started = Instant::now();
        let state = self.lock_state();
        let (mut state, wait) = self
            .done
            .wait_timeout_while(state, timeout, |s| s.pending)
            .unwrap_or_else(|e| e.into_inner());

        if wait.timed_out() && state.pending {
            state.reset_idle();
            let partial = std::mem::take(&mut state.lines);
            warn!(command = %command, waited = ?started.elapsed(), lines = partial.len(), "command timed out");
            return Err(ModemError::Timeout {
                command: command.display_text(),
                waited: timeout,
                partial,
            });
        }

        state.active_policy = None;
        let completion = if policy.yields_status() {
            Completion::Status(state.result.unwrap_or(false))
        } else {
            Completion::Transcript(std::mem::take(&mut state.lines))
        };
        debug!(command = %command, elapsed = ?started.elapsed(), ok = completion.is_success(), "exchange complete");
        Ok(completion)
    }

    /// Feed one decoded line from the listener thread.
    pub fn on_line(&self, line: &str) -> LineOutcome {
        let (stale_prompt, outcome) = {
            let mut state = self.lock_state();
            let stale_prompt = state.is_stale_prompt(line);
            let outcome = Self::apply(&mut state, line);
            if outcome == LineOutcome::Terminated {
                self.done.notify_all();
            }
            (stale_prompt, outcome)
        };

        // Raw write: going through `execute` here would wait on ourselves.
        if stale_prompt {
            warn!("unexpected prompt, cancelling pending text input");
            if let Err(e) = self.transport.write(&[CTRL_Z]) {
                warn!(error = %e, "failed to cancel text input");
            }
        }

        outcome
    }

    fn apply(state: &mut ExchangeState, line: &str) -> LineOutcome {
        let policy = match state.active_policy {
            Some(policy) if state.pending => policy,
            _ => {
                if !line.is_empty() {
                    debug!(line, "line outside of exchange");
                }
                return LineOutcome::Ignored;
            }
        };

        state.lines.push(line.to_string());
        match policy.evaluate(line) {
            Some(success) => {
                state.result = Some(success);
                state.pending = false;
                LineOutcome::Terminated
            }
            None => LineOutcome::Accumulated,
        }
    }

    /// Mark the start or end of SMS body entry.
    pub fn set_text_sending(&self, sending: bool) {
        debug!(sending, "text sending mode");
        self.lock_state().text_sending = sending;
    }

    pub fn is_text_sending(&self) -> bool {
        self.lock_state().text_sending
    }

    /// Whether a caller is currently blocked in `execute`.
    pub fn is_pending(&self) -> bool {
        self.lock_state().pending
    }

    /// Lines accumulated so far by the outstanding exchange.
    pub fn accumulated(&self) -> Vec<String> {
        self.lock_state().lines.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, ExchangeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
