//! Error types for the client core

use thiserror::Error;

/// Outcome of a remote call that did not produce a usable response.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// `start_session` answered 404: the identity lookup failed.
    #[error("Patient not found. Please register with your full information.")]
    IdentityNotFound,

    #[error("{operation} returned HTTP {status}")]
    Status { operation: &'static str, status: u16 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl DispatchError {
    /// True for the one failure the user can fix by resubmitting intake.
    pub fn is_identity_not_found(&self) -> bool {
        matches!(self, DispatchError::IdentityNotFound)
    }
}

/// Errors converting between binary audio and its transport encoding.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Empty audio payload")]
    Empty,
}
