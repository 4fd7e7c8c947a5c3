//! Energy-based endpointing: the recording ends after sustained low RMS, not after a
//! fixed duration.
//!
//! Any frame at or above the threshold clears the silence timer, so a single voiced frame
//! cancels a pending auto-stop.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Root-mean-square amplitude of a frame on the [-1, 1] scale. Empty frames read as silence.
pub fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = frame.iter().map(|s| s * s).sum();
    (sum_squares / frame.len() as f32).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointDecision {
    Continue,
    /// Silence has lasted at least the timeout: stop capture.
    Finalize,
}

/// Tracks how long the input has been below the silence threshold.
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    timeout: Duration,
    silence_started: Option<Instant>,
}

impl SilenceDetector {
    pub fn new(threshold: f32, timeout: Duration) -> Self {
        Self {
            threshold,
            timeout,
            silence_started: None,
        }
    }

    /// Feed one frame's RMS level observed at `now`.
    pub fn observe(&mut self, level: f32, now: Instant) -> EndpointDecision {
        if level < self.threshold {
            match self.silence_started {
                None => {
                    self.silence_started = Some(now);
                    EndpointDecision::Continue
                }
                Some(start) if now.duration_since(start) >= self.timeout => {
                    debug!(
                        silence_ms = now.duration_since(start).as_millis() as u64,
                        "silence timeout reached"
                    );
                    EndpointDecision::Finalize
                }
                Some(_) => EndpointDecision::Continue,
            }
        } else {
            if self.silence_started.take().is_some() {
                debug!(level, "voice detected; silence timer cleared");
            }
            EndpointDecision::Continue
        }
    }

    /// How long the current silence run has lasted, if one is running.
    pub fn silence_elapsed(&self, now: Instant) -> Option<Duration> {
        self.silence_started.map(|start| now.duration_since(start))
    }

    pub fn reset(&mut self) {
        self.silence_started = None;
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_frame_is_its_magnitude() {
        assert!((rms(&[0.5; 2048]) - 0.5).abs() < 1e-6);
        assert!((rms(&[-0.25; 64]) - 0.25).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn rms_of_square_wave() {
        let frame: Vec<f32> = (0..1000).map(|i| if i % 2 == 0 { 0.1 } else { -0.1 }).collect();
        assert!((rms(&frame) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn finalizes_after_timeout_of_silence() {
        let mut d = SilenceDetector::new(0.01, Duration::from_millis(3000));
        let t0 = Instant::now();
        assert_eq!(d.observe(0.0, t0), EndpointDecision::Continue);
        assert_eq!(
            d.observe(0.005, t0 + Duration::from_millis(2999)),
            EndpointDecision::Continue
        );
        assert_eq!(
            d.observe(0.0, t0 + Duration::from_millis(3000)),
            EndpointDecision::Finalize
        );
    }

    #[test]
    fn loud_frame_resets_timer() {
        let mut d = SilenceDetector::new(0.01, Duration::from_millis(3000));
        let t0 = Instant::now();
        d.observe(0.0, t0);
        d.observe(0.3, t0 + Duration::from_millis(2500));
        assert!(d.silence_elapsed(t0 + Duration::from_millis(2500)).is_none());
        d.observe(0.0, t0 + Duration::from_millis(2600));
        assert_eq!(
            d.observe(0.0, t0 + Duration::from_millis(5000)),
            EndpointDecision::Continue
        );
        assert_eq!(
            d.observe(0.0, t0 + Duration::from_millis(5600)),
            EndpointDecision::Finalize
        );
    }

    #[test]
    fn threshold_is_exclusive_for_silence() {
        let mut d = SilenceDetector::new(0.01, Duration::ZERO);
        let t0 = Instant::now();
        d.observe(0.01, t0);
        assert!(d.silence_elapsed(t0).is_none());
    }
}
