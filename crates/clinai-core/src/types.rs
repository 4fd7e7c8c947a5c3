//! Shared data model: transcript messages, session status and the wire shapes
//! exchanged with the remote agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    /// Client-generated notice (failures, call ended, microphone errors).
    SystemNotice,
}

/// One immutable utterance in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::new(Role::Agent, content)
    }

    pub fn system_notice(content: impl Into<String>) -> Self {
        Self::new(Role::SystemNotice, content)
    }
}

/// Lifecycle of one conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No session yet.
    #[default]
    Idle,
    /// Session open, no turn in flight.
    Active,
    /// A turn (or the session start) has been dispatched and has not settled.
    TurnPending,
    /// The agent terminated the call.
    Ended,
    /// A remote call failed; only reset leaves this state.
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Active => "active",
            SessionStatus::TurnPending => "turn_pending",
            SessionStatus::Ended => "ended",
            SessionStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity payload for `start_session`. Returning patients send only a phone number.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub phone: String,
    /// `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dob: Option<String>,
}

impl StartSessionRequest {
    pub fn returning(phone: impl Into<String>) -> Self {
        Self {
            phone: phone.into(),
            ..Default::default()
        }
    }

    pub fn new_patient(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        phone: impl Into<String>,
        dob: impl Into<String>,
    ) -> Self {
        Self {
            first_name: Some(first_name.into()),
            last_name: Some(last_name.into()),
            phone: phone.into(),
            dob: Some(dob.into()),
        }
    }
}

/// Intro message as sent by the agent on session start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntroMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    #[serde(default)]
    pub messages: Vec<IntroMessage>,
    /// Base64 agent speech for the intro, if synthesized.
    #[serde(default)]
    pub audio_b64: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub session_id: String,
    pub user_input: String,
}

/// Response shape shared by `turn` and `voice_turn`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResponse {
    pub agent_message: String,
    #[serde(default)]
    pub end_call: bool,
    #[serde(default)]
    pub audio_b64: Option<String>,
    /// Populated by `voice_turn` when the agent ran speech-to-text.
    #[serde(default)]
    pub user_transcript: Option<String>,
}

/// Finalized recording ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    /// Negotiated MIME type, e.g. `audio/webm;codecs=opus` or `audio/wav`.
    pub mime_type: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Assemble fragments in arrival order.
    pub fn from_fragments(fragments: Vec<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self::new(fragments.concat(), mime_type)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Upload file name for the multipart attachment, derived from the container.
    pub fn file_name(&self) -> &'static str {
        let container = self
            .mime_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match container.as_str() {
            "audio/mp4" => "audio.mp4",
            "audio/wav" | "audio/wave" | "audio/x-wav" => "audio.wav",
            "audio/ogg" => "audio.ogg",
            _ => "audio.webm",
        }
    }
}
