//! clinai-core: client core for the ClinAI voice agent.
//!
//! Holds the conversation turn state machine, the transport contract used to reach
//! the remote agent, and the shared data model consumed by `clinai-voice` and the CLI.
//!
//! ```text
//! user action ──▶ SessionStateMachine ──▶ TurnDispatcher ──▶ remote agent
//!                      │  (pending audio)
//!                      ▼
//!              take_pending_audio() ──▶ playback (clinai-voice)
//! ```

pub mod codec;
mod config;
pub mod dispatch;
mod error;
pub mod session;
mod types;

pub use config::ClientConfig;
pub use dispatch::{HttpTurnDispatcher, TurnDispatcher};
pub use error::{CodecError, DispatchError};
pub use session::{
    SessionStateMachine, CALL_ENDED_NOTICE, START_FAILED_PREFIX, TEXT_TURN_FAILED_NOTICE,
    VOICE_TURN_FAILED_NOTICE,
};
pub use types::{
    AudioClip, IntroMessage, Message, Role, SessionStatus, StartSessionRequest,
    StartSessionResponse, TurnRequest, TurnResponse,
};
