//! Microphone seam and the cpal-backed default input.
//!
//! A [`Microphone`] is acquired once per recording and hands back a [`MicrophoneStream`]
//! that produces encoded fragments plus a rolling analysis window for endpointing.
//! The cpal stream is `!Send` on some platforms, so it lives on a dedicated thread for the
//! lifetime of the recording.

use crate::error::{VoiceError, VoiceResult};
use crate::pcm::{f32_to_pcm16_le, pcm16_to_wav, to_mono, WAV_MIME_TYPE};
use clinai_core::ClientConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use std::collections::VecDeque;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Audio input device.
pub trait Microphone: Send + Sync + 'static {
    /// Whether the recorder can produce `mime_type`.
    fn supports(&self, mime_type: &str) -> bool;

    /// Container produced when no preferred type is supported.
    fn native_mime_type(&self) -> &str;

    /// Acquire the device and start recording. `mime_type` is the negotiated container,
    /// `None` for the native one.
    fn open(&self, mime_type: Option<&str>) -> VoiceResult<Box<dyn MicrophoneStream>>;
}

/// One live recording.
pub trait MicrophoneStream: Send {
    /// Copy the most recent samples into `frame`; returns how many were written.
    fn read_analysis_frame(&mut self, frame: &mut [f32]) -> usize;

    /// Encoded fragments produced since the last call.
    fn take_fragments(&mut self) -> Vec<Vec<u8>>;

    /// Stop recording and flush any trailing fragments.
    fn finish(&mut self) -> VoiceResult<Vec<Vec<u8>>>;

    /// Join fragments into one payload.
    fn assemble(&self, fragments: Vec<Vec<u8>>) -> VoiceResult<Vec<u8>> {
        Ok(fragments.concat())
    }

    /// Release the device. Called exactly once per successful `open`.
    fn release(&mut self);
}

/// Samples shared between the cpal callback and the capture loop.
struct CaptureBuffer {
    inner: Mutex<BufferState>,
}

struct BufferState {
    /// Not yet handed out as a fragment.
    pending: Vec<f32>,
    /// Last `window_len` samples for level analysis.
    window: VecDeque<f32>,
    window_len: usize,
}

impl CaptureBuffer {
    fn new(window_len: usize) -> Self {
        Self {
            inner: Mutex::new(BufferState {
                pending: Vec::new(),
                window: VecDeque::with_capacity(window_len),
                window_len,
            }),
        }
    }

    fn push(&self, samples: &[f32]) {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending.extend_from_slice(samples);
        state.window.extend(samples.iter().copied());
        let excess = state.window.len().saturating_sub(state.window_len);
        state.window.drain(..excess);
    }

    fn drain_pending(&self) -> Vec<f32> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut state.pending)
    }

    fn copy_window(&self, frame: &mut [f32]) -> usize {
        let state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let n = state.window.len().min(frame.len());
        let skip = state.window.len() - n;
        for (dst, src) in frame.iter_mut().zip(state.window.iter().skip(skip)) {
            *dst = *src;
        }
        n
    }
}

/// Default system input via cpal. Records mono PCM and uploads it as WAV.
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    sample_rate: u32,
    analysis_window: usize,
}

impl CpalMicrophone {
    pub fn new(sample_rate: u32, analysis_window: usize) -> Self {
        Self {
            sample_rate,
            analysis_window: analysis_window.max(1),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.sample_rate, config.analysis_frame_size)
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let host = cpal::default_host();
        Ok(host
            .input_devices()?
            .filter_map(|device| device.name().ok())
            .collect())
    }

    fn build_input_stream(
        buffer: Arc<CaptureBuffer>,
        target_rate: u32,
    ) -> VoiceResult<Stream> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string()))?;
        info!(
            "🎤 Opening input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let config = device.default_input_config()?;
        let source_rate = config.sample_rate().0;
        let channels = config.channels() as usize;
        let stream_config: StreamConfig = config.clone().into();
        debug!(source_rate, channels, target_rate, "input stream config");

        let stream = match config.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    buffer.push(&to_mono(data, channels, source_rate, target_rate));
                },
                move |err| warn!("Microphone stream error: {}", err),
                None,
            )?,
            SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let samples: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    buffer.push(&to_mono(&samples, channels, source_rate, target_rate));
                },
                move |err| warn!("Microphone stream error: {}", err),
                None,
            )?,
            other => {
                return Err(VoiceError::AudioStream(format!(
                    "Unsupported sample format {:?} (need F32 or I16)",
                    other
                )))
            }
        };
        Ok(stream)
    }
}

impl Microphone for CpalMicrophone {
    fn supports(&self, mime_type: &str) -> bool {
        mime_type.eq_ignore_ascii_case(WAV_MIME_TYPE)
    }

    fn native_mime_type(&self) -> &str {
        WAV_MIME_TYPE
    }

    fn open(&self, _mime_type: Option<&str>) -> VoiceResult<Box<dyn MicrophoneStream>> {
        let buffer = Arc::new(CaptureBuffer::new(self.analysis_window));
        let (ready_tx, ready_rx) = std_mpsc::channel::<VoiceResult<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let sample_rate = self.sample_rate;
        let thread_buffer = Arc::clone(&buffer);

        let thread = thread::Builder::new()
            .name("clinai-mic".into())
            .spawn(move || {
                let stream = match Self::build_input_stream(thread_buffer, sample_rate) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));
                // Hold the stream until finish/release (or the handle is dropped).
                let _ = stop_rx.recv();
                drop(stream);
                debug!("microphone stream closed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                info!("✅ Microphone recording ({} Hz mono)", sample_rate);
                Ok(Box::new(CpalMicrophoneStream {
                    buffer,
                    sample_rate,
                    stop_tx: Some(stop_tx),
                    thread: Some(thread),
                }))
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoiceError::AudioDevice(
                    "microphone thread exited before the stream started".to_string(),
                ))
            }
        }
    }
}

struct CpalMicrophoneStream {
    buffer: Arc<CaptureBuffer>,
    sample_rate: u32,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalMicrophoneStream {
    fn close(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("microphone thread panicked");
            }
        }
    }

    fn pending_fragment(&self) -> Option<Vec<u8>> {
        let samples = self.buffer.drain_pending();
        if samples.is_empty() {
            None
        } else {
            Some(f32_to_pcm16_le(&samples))
        }
    }
}

impl MicrophoneStream for CpalMicrophoneStream {
    fn read_analysis_frame(&mut self, frame: &mut [f32]) -> usize {
        self.buffer.copy_window(frame)
    }

    fn take_fragments(&mut self) -> Vec<Vec<u8>> {
        self.pending_fragment().into_iter().collect()
    }

    fn finish(&mut self) -> VoiceResult<Vec<Vec<u8>>> {
        self.close();
        Ok(self.pending_fragment().into_iter().collect())
    }

    fn assemble(&self, fragments: Vec<Vec<u8>>) -> VoiceResult<Vec<u8>> {
        pcm16_to_wav(&fragments.concat(), self.sample_rate)
    }

    fn release(&mut self) {
        self.close();
        info!("🎤 Microphone released");
    }
}

impl Drop for CpalMicrophoneStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_window_keeps_latest_samples() {
        let buffer = CaptureBuffer::new(4);
        buffer.push(&[0.1, 0.2, 0.3]);
        buffer.push(&[0.4, 0.5, 0.6]);

        let mut frame = [0.0f32; 4];
        assert_eq!(buffer.copy_window(&mut frame), 4);
        assert_eq!(frame, [0.3, 0.4, 0.5, 0.6]);

        let mut small = [0.0f32; 2];
        assert_eq!(buffer.copy_window(&mut small), 2);
        assert_eq!(small, [0.5, 0.6]);
    }

    #[test]
    fn pending_samples_drain_once() {
        let buffer = CaptureBuffer::new(8);
        buffer.push(&[0.1; 5]);
        assert_eq!(buffer.drain_pending().len(), 5);
        assert!(buffer.drain_pending().is_empty());
    }

    #[test]
    fn cpal_microphone_only_offers_wav() {
        let mic = CpalMicrophone::new(16_000, 2048);
        assert!(mic.supports("audio/wav"));
        assert!(!mic.supports("audio/webm;codecs=opus"));
        assert_eq!(mic.native_mime_type(), "audio/wav");
    }

    #[test]
    #[ignore] // Requires a microphone
    fn list_devices() {
        let devices = CpalMicrophone::list_input_devices().unwrap();
        println!("Input devices: {:?}", devices);
    }
}
