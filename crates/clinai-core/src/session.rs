//! **SessionStateMachine**: session identity, transcript, turn status and the
//! pending-audio handoff.
//!
//! ```text
//! Idle ──start──▶ TurnPending ──ok──▶ Active ──turn──▶ TurnPending ──ok──▶ Active
//!                      │                                    │  └─end_call─▶ Ended
//!                      └──────────────err───────────────────┴──────────────▶ Error
//! reset: any ──▶ Idle
//! ```
//!
//! Turn operations are no-ops unless the machine is `Active`, so at most one turn is ever
//! in flight. The internal lock is never held across an `.await`: a turn claims the
//! `TurnPending` slot, releases the lock, dispatches, then re-locks to apply the response.
//!
//! Pending audio is a single slot: the machine is the only writer and
//! [`SessionStateMachine::take_pending_audio`] the only reader. A newer payload overwrites
//! an unplayed one.

use crate::dispatch::TurnDispatcher;
use crate::error::DispatchError;
use crate::types::{AudioClip, Message, SessionStatus, StartSessionRequest, TurnRequest, TurnResponse};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub const CALL_ENDED_NOTICE: &str = "Call ended. Thank you for using the service.";
pub const TEXT_TURN_FAILED_NOTICE: &str = "Failed to send message. Please try again.";
pub const VOICE_TURN_FAILED_NOTICE: &str = "Failed to process voice message. Please try again.";
pub const START_FAILED_PREFIX: &str = "Failed to start session";

#[derive(Debug, Default)]
struct SessionState {
    session_id: Option<String>,
    messages: Vec<Message>,
    status: SessionStatus,
    call_ended: bool,
    pending_audio: Option<String>,
    /// Bumped on reset; responses dispatched under an older epoch are dropped.
    epoch: u64,
}

pub struct SessionStateMachine<D: ?Sized> {
    dispatcher: Arc<D>,
    state: Mutex<SessionState>,
    status_tx: watch::Sender<SessionStatus>,
}

impl<D: TurnDispatcher + ?Sized> SessionStateMachine<D> {
    pub fn new(dispatcher: Arc<D>) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        Self {
            dispatcher,
            state: Mutex::new(SessionState::default()),
            status_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, state: &mut SessionState, next: SessionStatus) {
        if state.status != next {
            debug!(from = %state.status, to = %next, "session transition");
        }
        state.status = next;
        self.status_tx.send_replace(next);
    }

    /// Open a session. Only from `Idle`; failures end in `Error` plus one system notice.
    pub async fn start_session(&self, request: &StartSessionRequest) {
        let epoch = {
            let mut state = self.lock();
            if state.status != SessionStatus::Idle {
                debug!(status = %state.status, "start_session ignored: not idle");
                return;
            }
            self.transition(&mut state, SessionStatus::TurnPending);
            state.epoch
        };

        info!("📞 Starting session");
        let result = self.dispatcher.start_session(request).await;

        let mut state = self.lock();
        if state.epoch != epoch {
            warn!("start_session settled after reset; response dropped");
            return;
        }
        match result {
            Ok(response) => {
                info!(
                    session_id = %response.session_id,
                    intro_messages = response.messages.len(),
                    has_audio = response.audio_b64.is_some(),
                    "session started"
                );
                state.session_id = Some(response.session_id);
                state.call_ended = false;
                for intro in response.messages {
                    state.messages.push(Message::agent(intro.content));
                }
                if let Some(audio) = non_empty(response.audio_b64) {
                    state.pending_audio = Some(audio);
                }
                self.transition(&mut state, SessionStatus::Active);
            }
            Err(e) => {
                warn!(error = %e, "start_session failed");
                let notice = if e.is_identity_not_found() {
                    e.to_string()
                } else {
                    format!("{}: {}", START_FAILED_PREFIX, e)
                };
                state.messages.push(Message::system_notice(notice));
                self.transition(&mut state, SessionStatus::Error);
            }
        }
    }

    /// Send a typed turn. The user message is echoed before dispatch.
    pub async fn send_text_turn(&self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        let (request, epoch) = {
            let mut state = self.lock();
            if state.status != SessionStatus::Active {
                debug!(status = %state.status, "text turn ignored: not active");
                return;
            }
            let Some(session_id) = state.session_id.clone() else {
                return;
            };
            state.messages.push(Message::user(text));
            self.transition(&mut state, SessionStatus::TurnPending);
            let request = TurnRequest {
                session_id,
                user_input: text.to_string(),
            };
            (request, state.epoch)
        };

        let result = self.dispatcher.send_turn(&request).await;
        self.settle_turn(epoch, result, None, TEXT_TURN_FAILED_NOTICE);
    }

    /// Send a recorded turn. The user message comes from the agent's transcript, if any.
    pub async fn send_voice_turn(&self, clip: &AudioClip) {
        let (session_id, epoch) = {
            let mut state = self.lock();
            if state.status != SessionStatus::Active {
                debug!(status = %state.status, "voice turn ignored: not active");
                return;
            }
            let Some(session_id) = state.session_id.clone() else {
                return;
            };
            self.transition(&mut state, SessionStatus::TurnPending);
            (session_id, state.epoch)
        };

        let result = self.dispatcher.send_voice_turn(&session_id, clip).await;
        let transcript = result
            .as_ref()
            .ok()
            .and_then(|r| r.user_transcript.clone())
            .and_then(|t| non_empty(Some(t)));
        self.settle_turn(epoch, result, transcript, VOICE_TURN_FAILED_NOTICE);
    }

    fn settle_turn(
        &self,
        epoch: u64,
        result: Result<TurnResponse, DispatchError>,
        transcript: Option<String>,
        failure_notice: &str,
    ) {
        let mut state = self.lock();
        if state.epoch != epoch {
            warn!("turn settled after reset; response dropped");
            return;
        }
        match result {
            Ok(response) => {
                if let Some(transcript) = transcript {
                    state.messages.push(Message::user(transcript));
                }
                state.messages.push(Message::agent(response.agent_message));
                if let Some(audio) = non_empty(response.audio_b64) {
                    if state.pending_audio.is_some() {
                        debug!("pending audio overwritten before playback");
                    }
                    state.pending_audio = Some(audio);
                }
                if response.end_call {
                    info!("📴 Agent ended the call");
                    state.call_ended = true;
                    state.messages.push(Message::system_notice(CALL_ENDED_NOTICE));
                    self.transition(&mut state, SessionStatus::Ended);
                } else {
                    self.transition(&mut state, SessionStatus::Active);
                }
            }
            Err(e) => {
                warn!(error = %e, "turn failed");
                state.messages.push(Message::system_notice(failure_notice));
                self.transition(&mut state, SessionStatus::Error);
            }
        }
    }

    /// Back to `Idle`: clears session id, transcript, pending audio and the ended flag.
    pub fn reset_session(&self) {
        let mut state = self.lock();
        state.session_id = None;
        state.messages.clear();
        state.pending_audio = None;
        state.call_ended = false;
        state.epoch = state.epoch.wrapping_add(1);
        self.transition(&mut state, SessionStatus::Idle);
        info!("session reset");
    }

    /// Append a client-side notice (e.g. a microphone failure) without changing status.
    pub fn add_system_notice(&self, content: impl Into<String>) {
        self.lock().messages.push(Message::system_notice(content));
    }

    /// Consume the pending agent audio. Always `None` while a turn is in flight, so
    /// playback can only start after the reply text is in the transcript.
    pub fn take_pending_audio(&self) -> Option<String> {
        let mut state = self.lock();
        if state.status == SessionStatus::TurnPending {
            return None;
        }
        state.pending_audio.take()
    }

    pub fn has_pending_audio(&self) -> bool {
        self.lock().pending_audio.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        self.lock().status
    }

    /// Observe status changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn session_id(&self) -> Option<String> {
        self.lock().session_id.clone()
    }

    /// Snapshot of the transcript in insertion order.
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn call_ended(&self) -> bool {
        self.lock().call_ended
    }

    pub fn is_agent_responding(&self) -> bool {
        self.status() == SessionStatus::TurnPending
    }

    /// Input should be disabled: no session, call over, or a turn in flight.
    pub fn chat_disabled(&self) -> bool {
        let state = self.lock();
        state.session_id.is_none()
            || state.call_ended
            || state.status == SessionStatus::TurnPending
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
