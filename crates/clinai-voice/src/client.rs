//! **VoiceClient**: wires the session, capture, and playback together.
//!
//! Every user action primes the speaker first. After each settled turn the latest agent
//! audio (if any) is played in the background. A newer reply's audio supersedes older
//! audio rather than queueing behind it.

use crate::capture::{CaptureConfig, CaptureOutcome, CaptureOutcomes, VoiceCaptureEngine};
use crate::error::VoiceResult;
use crate::microphone::Microphone;
use crate::output::AudioOutput;
use crate::playback::AudioPlaybackEngine;
use clinai_core::{AudioClip, ClientConfig, SessionStateMachine, StartSessionRequest, TurnDispatcher};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Prefix for notices raised by capture failures.
pub const MICROPHONE_ERROR_PREFIX: &str = "Microphone error";

pub struct VoiceClient<D: ?Sized, M, O> {
    session: Arc<SessionStateMachine<D>>,
    capture: VoiceCaptureEngine<M>,
    playback: Arc<AudioPlaybackEngine<O>>,
    outcomes: tokio::sync::Mutex<CaptureOutcomes>,
}

impl<D, M, O> VoiceClient<D, M, O>
where
    D: TurnDispatcher + ?Sized + 'static,
    M: Microphone,
    O: AudioOutput,
{
    pub fn new(
        session: Arc<SessionStateMachine<D>>,
        microphone: M,
        output: O,
        config: &ClientConfig,
    ) -> VoiceResult<Self> {
        let capture_config = CaptureConfig::from_client_config(config);
        capture_config.validate()?;
        let (capture, outcomes) = VoiceCaptureEngine::new(microphone, capture_config);
        let playback = AudioPlaybackEngine::new(output);
        playback.set_enabled(config.agent_voice_enabled);
        Ok(Self {
            session,
            capture,
            playback: Arc::new(playback),
            outcomes: tokio::sync::Mutex::new(outcomes),
        })
    }

    pub fn session(&self) -> &Arc<SessionStateMachine<D>> {
        &self.session
    }

    pub fn capture(&self) -> &VoiceCaptureEngine<M> {
        &self.capture
    }

    pub fn playback(&self) -> &Arc<AudioPlaybackEngine<O>> {
        &self.playback
    }

    pub async fn start_session(&self, request: &StartSessionRequest) {
        self.playback.unlock();
        self.session.start_session(request).await;
        self.play_pending();
    }

    pub async fn send_text(&self, text: &str) {
        self.playback.unlock();
        self.session.send_text_turn(text).await;
        self.play_pending();
    }

    /// Start or stop recording. Starting interrupts agent speech; it is refused while
    /// chat input is disabled.
    pub async fn toggle_microphone(&self) {
        self.playback.unlock();
        if !self.capture.is_active() {
            if self.session.chat_disabled() {
                debug!(status = %self.session.status(), "microphone toggle ignored: chat disabled");
                return;
            }
            self.playback.stop();
        }
        self.capture.toggle_recording().await;
    }

    /// Next finished clip or capture failure. `None` once the engine is gone.
    pub async fn next_capture_outcome(&self) -> Option<CaptureOutcome> {
        self.outcomes.lock().await.recv().await
    }

    pub async fn handle_capture_outcome(&self, outcome: CaptureOutcome) {
        match outcome {
            Ok(clip) => self.send_voice(&clip).await,
            Err(e) => {
                warn!(error = %e, "capture failed");
                self.session
                    .add_system_notice(format!("{}: {}", MICROPHONE_ERROR_PREFIX, e));
            }
        }
    }

    async fn send_voice(&self, clip: &AudioClip) {
        info!(bytes = clip.len(), mime_type = %clip.mime_type, "🎙️ Sending voice turn");
        self.session.send_voice_turn(clip).await;
        self.play_pending();
    }

    /// Play the latest agent audio in the background. Returns the playback task, or
    /// `None` when nothing is pending or a turn is still in flight.
    pub fn play_pending(&self) -> Option<JoinHandle<()>> {
        let audio = self.session.take_pending_audio()?;
        let playback = Arc::clone(&self.playback);
        Some(tokio::spawn(async move {
            if let Err(e) = playback.play(&audio).await {
                warn!(error = %e, "agent audio playback failed");
            }
        }))
    }

    /// Mute or unmute agent speech. Muting silences the current clip.
    pub fn set_agent_voice(&self, enabled: bool) {
        self.playback.set_enabled(enabled);
        if !enabled {
            self.playback.stop();
        }
    }

    /// Stop all audio and return the session to idle. A recording in progress is
    /// discarded, not uploaded.
    pub async fn reset(&self) {
        self.playback.stop();
        self.capture.cancel().await;
        self.session.reset_session();
        info!("🔄 Client reset");
    }
}
