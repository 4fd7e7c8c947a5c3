//! Audio output seam and the rodio-backed speaker.
//!
//! `rodio::OutputStream` must stay on the thread that opened it, so [`RodioOutput`] parks it
//! on a dedicated thread and hands out the `Send` stream handle for building sinks.

use crate::error::{VoiceError, VoiceResult};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Control over one started playback.
pub trait PlaybackHandle: Send {
    /// Halt playback. Must also resolve the paired `ended` receiver.
    fn stop(&mut self);
}

/// A playback that has begun.
pub struct StartedPlayback {
    pub handle: Box<dyn PlaybackHandle>,
    /// Resolves (or closes) when playback ends naturally or is stopped.
    pub ended: oneshot::Receiver<()>,
}

/// Speaker device.
pub trait AudioOutput: Send + Sync + 'static {
    /// Open or resume the output path. Idempotent.
    fn resume(&self) -> VoiceResult<()>;

    /// Decode `audio` (MP3, WAV, ...) and start playing it.
    fn start(&self, audio: Vec<u8>) -> VoiceResult<StartedPlayback>;
}

struct OutputDevice {
    handle: OutputStreamHandle,
    /// Dropping this closes the output thread and its stream.
    _keepalive: std_mpsc::Sender<()>,
}

/// Default system output via rodio. The device is opened lazily on first `resume`.
#[derive(Default)]
pub struct RodioOutput {
    device: Mutex<Option<OutputDevice>>,
}

impl RodioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream_handle(&self) -> VoiceResult<OutputStreamHandle> {
        let mut device = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = device.as_ref() {
            return Ok(existing.handle.clone());
        }
        let opened = Self::open_device()?;
        let handle = opened.handle.clone();
        *device = Some(opened);
        Ok(handle)
    }

    fn open_device() -> VoiceResult<OutputDevice> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<OutputStreamHandle>>();
        let (keepalive_tx, keepalive_rx) = std_mpsc::channel::<()>();
        thread::Builder::new()
            .name("clinai-speaker".into())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(handle));
                // Returns once the owning RodioOutput drops its sender.
                let _ = keepalive_rx.recv();
                drop(stream);
                debug!("speaker stream closed");
            })?;

        let handle = ready_rx.recv().map_err(|_| {
            VoiceError::Playback("speaker thread exited before the stream opened".to_string())
        })??;
        info!("🔊 Speaker output ready");
        Ok(OutputDevice {
            handle,
            _keepalive: keepalive_tx,
        })
    }
}

impl AudioOutput for RodioOutput {
    fn resume(&self) -> VoiceResult<()> {
        self.stream_handle().map(|_| ())
    }

    fn start(&self, audio: Vec<u8>) -> VoiceResult<StartedPlayback> {
        let handle = self.stream_handle()?;
        let source = rodio::Decoder::new(Cursor::new(audio))
            .map_err(|e| VoiceError::Decode(e.to_string()))?;
        let sink = Sink::try_new(&handle).map_err(|e| VoiceError::Playback(e.to_string()))?;
        sink.append(source.convert_samples::<f32>());
        let sink = Arc::new(sink);

        let (ended_tx, ended_rx) = oneshot::channel();
        let watcher = Arc::clone(&sink);
        thread::Builder::new()
            .name("clinai-playback".into())
            .spawn(move || {
                watcher.sleep_until_end();
                let _ = ended_tx.send(());
            })?;

        Ok(StartedPlayback {
            handle: Box::new(RodioPlayback { sink }),
            ended: ended_rx,
        })
    }
}

struct RodioPlayback {
    sink: Arc<Sink>,
}

impl PlaybackHandle for RodioPlayback {
    fn stop(&mut self) {
        self.sink.stop();
    }
}

impl Drop for RodioPlayback {
    fn drop(&mut self) {
        // The watcher thread keeps the sink alive, so stop explicitly.
        self.sink.stop();
    }
}
