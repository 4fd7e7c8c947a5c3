//! # ClinAI Voice - capture, endpointing and agent speech playback
//!
//! Records the patient's utterance, ends it automatically after sustained silence, and
//! plays the agent's spoken replies. Runs on bare metal audio via cpal and rodio.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         VoiceClient                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌────────────────────┐  │
//! │  │  Microphone  │→ │   Silence    │→ │ SessionStateMachine│  │
//! │  │    (cpal)    │  │  (RMS, 3s)   │  │   (clinai-core)    │  │
//! │  └──────────────┘  └──────────────┘  └────────────────────┘  │
//! │                                                ↓ pending audio│
//! │  ┌──────────────┐                    ┌────────────────────┐  │
//! │  │   Speaker    │←───────────────────│   Playback engine  │  │
//! │  │   (rodio)    │      one clip      │  (stop on new mic) │  │
//! │  └──────────────┘                    └────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod capture;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod microphone;
pub mod output;
pub mod pcm;
pub mod playback;

pub use capture::{
    negotiate_mime_type, CaptureConfig, CaptureOutcome, CaptureOutcomes, VoiceCaptureEngine,
    PREFERRED_MIME_TYPES,
};
pub use client::{VoiceClient, MICROPHONE_ERROR_PREFIX};
pub use endpoint::{rms, EndpointDecision, SilenceDetector};
pub use error::{VoiceError, VoiceResult};
pub use microphone::{CpalMicrophone, Microphone, MicrophoneStream};
pub use output::{AudioOutput, PlaybackHandle, RodioOutput, StartedPlayback};
pub use playback::AudioPlaybackEngine;
