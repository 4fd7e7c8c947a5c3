//! Error types for the ClinAI voice pipeline

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors raised by capture and playback
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl VoiceError {
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, VoiceError::PermissionDenied(_))
    }
}

impl From<clinai_core::CodecError> for VoiceError {
    fn from(err: clinai_core::CodecError) -> Self {
        VoiceError::Decode(err.to_string())
    }
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                VoiceError::AudioDevice(err.to_string())
            }
            other => {
                let msg = other.to_string();
                if looks_like_permission_failure(&msg) {
                    VoiceError::PermissionDenied(msg)
                } else {
                    VoiceError::AudioStream(msg)
                }
            }
        }
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        let msg = err.to_string();
        if looks_like_permission_failure(&msg) {
            VoiceError::PermissionDenied(msg)
        } else {
            VoiceError::AudioStream(msg)
        }
    }
}

/// Backends report denied capture access as backend-specific text.
fn looks_like_permission_failure(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_permission_text_maps_to_permission_denied() {
        let err: VoiceError = cpal::BuildStreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "Permission denied (os error 13)".into(),
            },
        }
        .into();
        assert!(err.is_permission_denied());
    }

    #[test]
    fn missing_device_is_device_error() {
        let err: VoiceError = cpal::BuildStreamError::DeviceNotAvailable.into();
        assert!(matches!(err, VoiceError::AudioDevice(_)));
    }
}
