//! Turn transport: the contract the session state machine uses to reach the remote agent,
//! plus the reqwest-backed implementation.
//!
//! No retries happen here; a failed call surfaces as a [`DispatchError`] and the state
//! machine decides what the user sees.

use crate::config::ClientConfig;
use crate::error::DispatchError;
use crate::types::{AudioClip, StartSessionRequest, StartSessionResponse, TurnRequest, TurnResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info};

/// Translates domain turn requests into remote calls.
#[async_trait]
pub trait TurnDispatcher: Send + Sync {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, DispatchError>;

    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, DispatchError>;

    /// Upload a recorded clip as a binary attachment (not base64).
    async fn send_voice_turn(
        &self,
        session_id: &str,
        clip: &AudioClip,
    ) -> Result<TurnResponse, DispatchError>;
}

/// JSON/multipart over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTurnDispatcher {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTurnDispatcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        info!(base_url = %base_url, "turn dispatcher ready");
        Ok(Self { base_url, client })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, DispatchError> {
        Self::new(config.api_base_url.clone(), config.request_timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn read_json<T: DeserializeOwned>(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<T, DispatchError> {
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status {
                operation,
                status: status.as_u16(),
            });
        }
        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| DispatchError::InvalidResponse(format!("{}: {}", operation, e)))
    }
}

#[async_trait]
impl TurnDispatcher for HttpTurnDispatcher {
    async fn start_session(
        &self,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, DispatchError> {
        debug!(returning = request.first_name.is_none(), "POST start_session");
        let response = self
            .client
            .post(self.endpoint("start_session"))
            .json(request)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DispatchError::IdentityNotFound);
        }
        Self::read_json("start_session", response).await
    }

    async fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, DispatchError> {
        debug!(session_id = %request.session_id, "POST turn");
        let response = self
            .client
            .post(self.endpoint("turn"))
            .json(request)
            .send()
            .await?;
        Self::read_json("turn", response).await
    }

    async fn send_voice_turn(
        &self,
        session_id: &str,
        clip: &AudioClip,
    ) -> Result<TurnResponse, DispatchError> {
        debug!(
            session_id = %session_id,
            bytes = clip.len(),
            mime_type = %clip.mime_type,
            "POST voice_turn"
        );
        let part = reqwest::multipart::Part::bytes(clip.bytes.clone())
            .file_name(clip.file_name())
            .mime_str(&clip.mime_type)?;
        let form = reqwest::multipart::Form::new()
            .text("session_id", session_id.to_string())
            .part("audio", part);
        let response = self
            .client
            .post(self.endpoint("voice_turn"))
            .multipart(form)
            .send()
            .await?;
        Self::read_json("voice_turn", response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        let d = HttpTurnDispatcher::new("http://localhost:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(d.base_url(), "http://localhost:8000");
        assert_eq!(d.endpoint("turn"), "http://localhost:8000/turn");
    }
}
