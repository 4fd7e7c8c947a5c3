//! **VoiceCaptureEngine**: microphone recording with automatic end-of-utterance detection.
//!
//! A recording samples the input level every frame interval and finalizes itself after
//! the configured run of silence, or when `stop_recording` is called. Each recording
//! produces exactly one [`CaptureOutcome`] on the engine's outcome channel, and the
//! device is released before that outcome is delivered. [`VoiceCaptureEngine::cancel`]
//! abandons the active recording and anything not yet received.

use crate::endpoint::{rms, EndpointDecision, SilenceDetector};
use crate::error::{VoiceError, VoiceResult};
use crate::microphone::{Microphone, MicrophoneStream};
use clinai_core::{AudioClip, ClientConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Containers tried in order; the first one the microphone supports wins.
pub const PREFERRED_MIME_TYPES: &[&str] = &["audio/webm;codecs=opus", "audio/webm", "audio/mp4"];

/// Pick the first preferred container accepted by `supports`. `None` means the recorder's
/// native container.
pub fn negotiate_mime_type(supports: impl Fn(&str) -> bool) -> Option<&'static str> {
    PREFERRED_MIME_TYPES.iter().copied().find(|m| supports(m))
}

/// A finished clip, or the reason the recording could not start or finish.
pub type CaptureOutcome = VoiceResult<AudioClip>;

struct TaggedOutcome {
    generation: u64,
    outcome: CaptureOutcome,
}

/// Receiving end of a [`VoiceCaptureEngine`]. Outcomes of recordings abandoned by
/// `cancel` are skipped.
pub struct CaptureOutcomes {
    rx: mpsc::UnboundedReceiver<TaggedOutcome>,
    generation: Arc<AtomicU64>,
}

impl CaptureOutcomes {
    /// Next outcome. `None` once the engine is gone.
    pub async fn recv(&mut self) -> Option<CaptureOutcome> {
        loop {
            let tagged = self.rx.recv().await?;
            if let Some(outcome) = self.accept(tagged) {
                return Some(outcome);
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<CaptureOutcome, TryRecvError> {
        loop {
            let tagged = self.rx.try_recv()?;
            if let Some(outcome) = self.accept(tagged) {
                return Ok(outcome);
            }
        }
    }

    fn accept(&self, tagged: TaggedOutcome) -> Option<CaptureOutcome> {
        if tagged.generation == self.generation.load(Ordering::SeqCst) {
            Some(tagged.outcome)
        } else {
            debug!(generation = tagged.generation, "dropping abandoned capture outcome");
            None
        }
    }
}

/// Endpointing parameters for a recording.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// RMS below this counts as silence.
    pub silence_threshold: f32,
    /// Continuous silence that ends the recording.
    pub silence_timeout: Duration,
    /// Spacing between level samples.
    pub frame_interval: Duration,
    /// Samples per analysis window.
    pub analysis_frame_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.01,
            silence_timeout: Duration::from_millis(3000),
            frame_interval: Duration::from_millis(16),
            analysis_frame_size: 2048,
        }
    }
}

impl CaptureConfig {
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            silence_threshold: config.silence_threshold,
            silence_timeout: config.silence_timeout(),
            frame_interval: config.frame_interval(),
            analysis_frame_size: config.analysis_frame_size,
        }
    }

    pub fn validate(&self) -> VoiceResult<()> {
        if !self.silence_threshold.is_finite()
            || self.silence_threshold <= 0.0
            || self.silence_threshold > 1.0
        {
            return Err(VoiceError::Config(format!(
                "silence_threshold must be in (0, 1], got {}",
                self.silence_threshold
            )));
        }
        if self.frame_interval.is_zero() {
            return Err(VoiceError::Config("frame_interval must be non-zero".into()));
        }
        if self.analysis_frame_size == 0 {
            return Err(VoiceError::Config("analysis_frame_size must be non-zero".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopMode {
    Finalize,
    Discard,
}

struct ActiveRecording {
    id: u64,
    stop_tx: Option<oneshot::Sender<StopMode>>,
    task: JoinHandle<()>,
}

impl ActiveRecording {
    fn request_stop(&mut self, mode: StopMode) -> bool {
        match self.stop_tx.take() {
            Some(tx) => {
                let _ = tx.send(mode);
                true
            }
            None => false,
        }
    }
}

type ActiveSlot = Arc<Mutex<Option<ActiveRecording>>>;

fn lock_slot(slot: &ActiveSlot) -> MutexGuard<'_, Option<ActiveRecording>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Records from a [`Microphone`] and emits one clip per recording.
pub struct VoiceCaptureEngine<M> {
    microphone: Arc<M>,
    config: CaptureConfig,
    active: ActiveSlot,
    /// Serializes start/shutdown so two recordings never hold the device.
    lifecycle: tokio::sync::Mutex<()>,
    recording_tx: Arc<watch::Sender<bool>>,
    outcome_tx: mpsc::UnboundedSender<TaggedOutcome>,
    /// Outcomes tagged with an older generation are abandoned.
    generation: Arc<AtomicU64>,
    /// Set while the device is being acquired; read and written under the `active` lock.
    acquiring: AtomicBool,
    stop_pending: AtomicBool,
    next_id: AtomicU64,
}

impl<M: Microphone> VoiceCaptureEngine<M> {
    /// Create the engine and the receiver for finished clips and capture failures.
    pub fn new(microphone: M, config: CaptureConfig) -> (Self, CaptureOutcomes) {
        let (outcome_tx, rx) = mpsc::unbounded_channel();
        let (recording_tx, _) = watch::channel(false);
        let generation = Arc::new(AtomicU64::new(0));
        let engine = Self {
            microphone: Arc::new(microphone),
            config,
            active: Arc::new(Mutex::new(None)),
            lifecycle: tokio::sync::Mutex::new(()),
            recording_tx: Arc::new(recording_tx),
            outcome_tx,
            generation: Arc::clone(&generation),
            acquiring: AtomicBool::new(false),
            stop_pending: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        };
        (engine, CaptureOutcomes { rx, generation })
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn is_recording(&self) -> bool {
        *self.recording_tx.borrow()
    }

    /// Recording, or still acquiring the device for one.
    pub fn is_active(&self) -> bool {
        self.is_recording() || self.acquiring.load(Ordering::SeqCst)
    }

    /// Observe recording on/off transitions.
    pub fn watch_recording(&self) -> watch::Receiver<bool> {
        self.recording_tx.subscribe()
    }

    /// Acquire the microphone and begin a recording. An active recording is finalized
    /// first (its clip is still delivered). Acquisition failures arrive on the outcome
    /// channel.
    pub async fn start_recording(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown_active(StopMode::Finalize).await;
        let generation = self.generation.load(Ordering::SeqCst);
        {
            let _slot = lock_slot(&self.active);
            self.acquiring.store(true, Ordering::SeqCst);
            self.stop_pending.store(false, Ordering::SeqCst);
        }

        let preferred = negotiate_mime_type(|m| self.microphone.supports(m));
        let mime_type = preferred
            .map(str::to_string)
            .unwrap_or_else(|| self.microphone.native_mime_type().to_string());

        let microphone = Arc::clone(&self.microphone);
        let opened = tokio::task::spawn_blocking(move || microphone.open(preferred))
            .await
            .unwrap_or_else(|e| {
                Err(VoiceError::AudioDevice(format!(
                    "microphone open task failed: {}",
                    e
                )))
            });
        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                {
                    let _slot = lock_slot(&self.active);
                    self.acquiring.store(false, Ordering::SeqCst);
                    self.stop_pending.store(false, Ordering::SeqCst);
                }
                warn!(error = %e, "could not start recording");
                self.emit(generation, Err(e));
                return;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        info!(recording = id, mime_type = %mime_type, "🎙️ Recording started");
        self.recording_tx.send_replace(true);

        let mut slot = lock_slot(&self.active);
        let task = tokio::spawn(
            RecordingTask {
                id,
                generation,
                stream,
                mime_type,
                config: self.config.clone(),
                stop_rx,
                active: Arc::clone(&self.active),
                recording_tx: Arc::clone(&self.recording_tx),
                outcome_tx: self.outcome_tx.clone(),
            }
            .run(),
        );
        let mut active = ActiveRecording {
            id,
            stop_tx: Some(stop_tx),
            task,
        };
        self.acquiring.store(false, Ordering::SeqCst);
        if self.stop_pending.swap(false, Ordering::SeqCst) {
            active.request_stop(StopMode::Finalize);
            info!(recording = id, "⏹️ Stop requested during device acquisition");
        }
        *slot = Some(active);
    }

    /// Request finalization of the active recording. A stop issued while the device is
    /// still being acquired ends that recording as soon as it starts. No-op when idle or
    /// already stopping.
    pub fn stop_recording(&self) {
        let mut slot = lock_slot(&self.active);
        if let Some(active) = slot.as_mut() {
            if active.request_stop(StopMode::Finalize) {
                info!(recording = active.id, "⏹️ Recording stop requested");
            } else {
                debug!(recording = active.id, "stop_recording: already stopping");
            }
        } else if self.acquiring.load(Ordering::SeqCst) {
            self.stop_pending.store(true, Ordering::SeqCst);
            debug!("stop_recording: deferred until the microphone opens");
        } else {
            debug!("stop_recording: nothing to stop");
        }
    }

    pub async fn toggle_recording(&self) {
        if self.is_active() {
            self.stop_recording();
        } else {
            self.start_recording().await;
        }
    }

    /// Finalize any active recording and wait until its device is released.
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        self.teardown_active(StopMode::Finalize).await;
    }

    /// Abandon the active recording and every outcome not yet received. The device is
    /// released before this returns; nothing from before the call is delivered.
    pub async fn cancel(&self) {
        let _guard = self.lifecycle.lock().await;
        let abandoned = self.generation.fetch_add(1, Ordering::SeqCst);
        debug!(generation = abandoned, "cancelling capture");
        self.teardown_active(StopMode::Discard).await;
    }

    async fn teardown_active(&self, mode: StopMode) {
        let prior = lock_slot(&self.active).take();
        if let Some(mut prior) = prior {
            debug!(recording = prior.id, ?mode, "tearing down previous recording");
            prior.request_stop(mode);
            if let Err(e) = prior.task.await {
                warn!(recording = prior.id, "recording task failed: {}", e);
            }
        }
    }

    fn emit(&self, generation: u64, outcome: CaptureOutcome) {
        if self.outcome_tx.send(TaggedOutcome { generation, outcome }).is_err() {
            debug!("capture outcome dropped: receiver closed");
        }
    }
}

impl<M> Drop for VoiceCaptureEngine<M> {
    fn drop(&mut self) {
        if let Some(mut active) = lock_slot(&self.active).take() {
            active.request_stop(StopMode::Finalize);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Requested,
    Silence,
    Discarded,
}

struct RecordingTask {
    id: u64,
    generation: u64,
    stream: Box<dyn MicrophoneStream>,
    mime_type: String,
    config: CaptureConfig,
    stop_rx: oneshot::Receiver<StopMode>,
    active: ActiveSlot,
    recording_tx: Arc<watch::Sender<bool>>,
    outcome_tx: mpsc::UnboundedSender<TaggedOutcome>,
}

/// Stop the stream, build the clip unless discarding, and release the device. Blocks on
/// the device thread.
fn close_stream(
    mut stream: Box<dyn MicrophoneStream>,
    mut fragments: Vec<Vec<u8>>,
    keep: bool,
) -> Option<VoiceResult<Vec<u8>>> {
    let assembled = keep.then(|| {
        fragments.extend(stream.take_fragments());
        let tail = stream.finish()?;
        fragments.extend(tail);
        stream.assemble(fragments)
    });
    stream.release();
    assembled
}

impl RecordingTask {
    async fn run(mut self) {
        let mut detector =
            SilenceDetector::new(self.config.silence_threshold, self.config.silence_timeout);
        let mut frame = vec![0.0f32; self.config.analysis_frame_size];
        let mut fragments: Vec<Vec<u8>> = Vec::new();
        let mut ticker = tokio::time::interval(self.config.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reason = loop {
            tokio::select! {
                // A dropped sender also ends the recording.
                mode = &mut self.stop_rx => match mode {
                    Ok(StopMode::Discard) => break StopReason::Discarded,
                    _ => break StopReason::Requested,
                },
                _ = ticker.tick() => {
                    fragments.extend(self.stream.take_fragments());
                    let n = self.stream.read_analysis_frame(&mut frame);
                    let level = rms(&frame[..n]);
                    if detector.observe(level, Instant::now()) == EndpointDecision::Finalize {
                        break StopReason::Silence;
                    }
                }
            }
        };
        debug!(recording = self.id, ?reason, "finalizing recording");

        let keep = reason != StopReason::Discarded;
        let stream = self.stream;
        let assembled = tokio::task::spawn_blocking(move || close_stream(stream, fragments, keep))
            .await
            .unwrap_or_else(|e| {
                keep.then(|| {
                    Err(VoiceError::AudioStream(format!(
                        "recording finalize task failed: {}",
                        e
                    )))
                })
            });

        {
            let mut slot = lock_slot(&self.active);
            if slot.as_ref().is_some_and(|a| a.id == self.id) {
                slot.take();
            }
        }
        self.recording_tx.send_replace(false);

        let Some(assembled) = assembled else {
            info!(recording = self.id, "🗑️ Recording discarded");
            return;
        };
        let outcome = match assembled {
            Ok(bytes) => {
                info!(
                    recording = self.id,
                    bytes = bytes.len(),
                    auto = reason == StopReason::Silence,
                    "✅ Recording complete"
                );
                Ok(AudioClip::new(bytes, self.mime_type))
            }
            Err(e) => {
                warn!(recording = self.id, error = %e, "recording failed to finalize");
                Err(e)
            }
        };
        let tagged = TaggedOutcome {
            generation: self.generation,
            outcome,
        };
        if self.outcome_tx.send(tagged).is_err() {
            debug!(recording = self.id, "capture outcome dropped: receiver closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiation_follows_preference_order() {
        assert_eq!(
            negotiate_mime_type(|_| true),
            Some("audio/webm;codecs=opus")
        );
        assert_eq!(
            negotiate_mime_type(|m| m == "audio/webm" || m == "audio/mp4"),
            Some("audio/webm")
        );
        assert_eq!(negotiate_mime_type(|m| m == "audio/mp4"), Some("audio/mp4"));
        assert_eq!(negotiate_mime_type(|_| false), None);
    }

    #[test]
    fn default_config_is_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.analysis_frame_size, 2048);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config = CaptureConfig {
            silence_threshold: 0.0,
            ..CaptureConfig::default()
        };
        assert!(matches!(config.validate(), Err(VoiceError::Config(_))));
    }

    #[test]
    fn client_config_maps_through() {
        let client = ClientConfig {
            silence_timeout_ms: 1500,
            ..ClientConfig::default()
        };
        let config = CaptureConfig::from_client_config(&client);
        assert_eq!(config.silence_timeout, Duration::from_millis(1500));
        assert_eq!(config.frame_interval, Duration::from_millis(16));
    }
}
