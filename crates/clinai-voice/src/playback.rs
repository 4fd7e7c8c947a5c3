//! **AudioPlaybackEngine**: plays base64 agent speech, one clip at a time.
//!
//! Starting a clip always tears down the current one first. Teardown runs exactly once
//! per playback, whether the clip ends naturally or is stopped.

use crate::error::{VoiceError, VoiceResult};
use crate::output::{AudioOutput, PlaybackHandle};
use clinai_core::codec::decode_base64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

struct ActivePlayback {
    id: u64,
    handle: Box<dyn PlaybackHandle>,
}

pub struct AudioPlaybackEngine<O> {
    output: Arc<O>,
    enabled: AtomicBool,
    active: Mutex<Option<ActivePlayback>>,
    next_id: AtomicU64,
    /// Bumped by every `stop`, under the `active` lock.
    stop_epoch: AtomicU64,
}

impl<O: AudioOutput> AudioPlaybackEngine<O> {
    pub fn new(output: O) -> Self {
        Self {
            output: Arc::new(output),
            enabled: AtomicBool::new(true),
            active: Mutex::new(None),
            next_id: AtomicU64::new(1),
            stop_epoch: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ActivePlayback>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Prime the output device. Call from user-initiated actions; failures are logged only.
    pub fn unlock(&self) {
        if let Err(e) = self.output.resume() {
            warn!(error = %e, "audio output unlock failed");
        }
    }

    /// Decode and play `payload`, resolving when playback ends or is stopped.
    ///
    /// Returns `Ok` without playing while disabled. Decode and start failures are
    /// returned after the previous playback has been torn down. A `stop` issued while the
    /// clip is still being started cancels it.
    pub async fn play(&self, payload: &str) -> VoiceResult<()> {
        if !self.is_enabled() {
            debug!("agent voice disabled; skipping playback");
            return Ok(());
        }
        self.stop();
        let epoch = self.stop_epoch.load(Ordering::SeqCst);

        self.output.resume()?;
        let bytes = decode_base64(payload)?;
        let output = Arc::clone(&self.output);
        let started = tokio::task::spawn_blocking(move || output.start(bytes))
            .await
            .map_err(|e| VoiceError::Playback(format!("playback start task failed: {}", e)))??;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let installed = {
            let mut active = self.lock();
            if self.stop_epoch.load(Ordering::SeqCst) != epoch {
                Err(started.handle)
            } else {
                Ok(active.replace(ActivePlayback {
                    id,
                    handle: started.handle,
                }))
            }
        };
        let replaced = match installed {
            Err(mut handle) => {
                handle.stop();
                debug!(playback = id, "stopped before it started");
                return Ok(());
            }
            Ok(replaced) => replaced,
        };
        if let Some(mut replaced) = replaced {
            debug!(playback = replaced.id, "superseded by a newer playback");
            replaced.handle.stop();
        }
        info!(playback = id, "🔊 Playing agent audio");

        // Closed without a value means the handle was stopped.
        let _ = started.ended.await;
        self.finish(id);
        Ok(())
    }

    /// Tear down `id` if it is still the current playback.
    fn finish(&self, id: u64) {
        let ended = {
            let mut active = self.lock();
            if active.as_ref().is_some_and(|a| a.id == id) {
                active.take()
            } else {
                None
            }
        };
        if let Some(mut ended) = ended {
            ended.handle.stop();
            debug!(playback = id, "playback ended");
        }
    }

    /// Stop the current playback and cancel any clip still starting. Idempotent.
    pub fn stop(&self) {
        let current = {
            let mut active = self.lock();
            self.stop_epoch.fetch_add(1, Ordering::SeqCst);
            active.take()
        };
        if let Some(mut current) = current {
            current.handle.stop();
            info!(playback = current.id, "⏹️ Playback stopped");
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "agent voice toggled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_playing(&self) -> bool {
        self.lock().is_some()
    }
}
