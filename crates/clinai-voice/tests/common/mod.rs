//! Synthetic audio devices and a scripted agent for driving the voice pipeline without hardware.

#![allow(dead_code)]

use async_trait::async_trait;
use clinai_core::{
    AudioClip, DispatchError, IntroMessage, StartSessionRequest, StartSessionResponse,
    TurnDispatcher, TurnRequest, TurnResponse,
};
use clinai_voice::{
    AudioOutput, Microphone, MicrophoneStream, PlaybackHandle, StartedPlayback, VoiceError,
    VoiceResult,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// base64 of `ID3\x04\x00`
pub const MP3_B64: &str = "SUQzBAA=";
/// base64 of `bad`; [`FakeOutput`] refuses to decode it.
pub const UNDECODABLE_B64: &str = "YmFk";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// Poll `cond` until it holds, panicking after 5s of wall-clock time. Yields instead of
/// sleeping so a paused clock does not race ahead of blocking-pool work.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(std::time::Instant::now() < deadline, "condition not reached");
        tokio::task::yield_now().await;
    }
}

/// Holds blocking device calls open so a test can act while one is in flight.
#[derive(Default)]
pub struct Gate {
    held: AtomicBool,
    waiting: AtomicUsize,
}

impl Gate {
    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.held.store(false, Ordering::SeqCst);
    }

    /// Calls currently blocked at the gate.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    fn pass(&self) {
        self.waiting.fetch_add(1, Ordering::SeqCst);
        while self.held.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        self.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

fn bump_live(live: &AtomicUsize, peak: &AtomicUsize) {
    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now, Ordering::SeqCst);
}

// ---------------------------------------------------------------------------
// Microphone

#[derive(Default)]
pub struct MicState {
    level: Mutex<f32>,
    supported: Mutex<Vec<String>>,
    deny_permission: AtomicBool,
    fail_finish: AtomicBool,
    pub opens: AtomicUsize,
    pub finishes: AtomicUsize,
    pub releases: AtomicUsize,
    pub open_gate: Gate,
    live: AtomicUsize,
    pub peak_live: AtomicUsize,
    pub requested_types: Mutex<Vec<Option<String>>>,
}

/// Produces a constant-level signal and one byte per polled fragment.
#[derive(Clone, Default)]
pub struct FakeMicrophone {
    pub state: Arc<MicState>,
}

impl FakeMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn supporting(types: &[&str]) -> Self {
        let mic = Self::default();
        *mic.state.supported.lock().unwrap() = types.iter().map(|t| t.to_string()).collect();
        mic
    }

    pub fn set_level(&self, level: f32) {
        *self.state.level.lock().unwrap() = level;
    }

    pub fn deny_permission(&self) {
        self.state.deny_permission.store(true, Ordering::SeqCst);
    }

    pub fn fail_finish(&self) {
        self.state.fail_finish.store(true, Ordering::SeqCst);
    }

    pub fn opens(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.state.releases.load(Ordering::SeqCst)
    }

    pub fn finishes(&self) -> usize {
        self.state.finishes.load(Ordering::SeqCst)
    }

    pub fn peak_live(&self) -> usize {
        self.state.peak_live.load(Ordering::SeqCst)
    }
}

impl Microphone for FakeMicrophone {
    fn supports(&self, mime_type: &str) -> bool {
        self.state
            .supported
            .lock()
            .unwrap()
            .iter()
            .any(|t| t == mime_type)
    }

    fn native_mime_type(&self) -> &str {
        "audio/wav"
    }

    fn open(&self, mime_type: Option<&str>) -> VoiceResult<Box<dyn MicrophoneStream>> {
        self.state.open_gate.pass();
        self.state
            .requested_types
            .lock()
            .unwrap()
            .push(mime_type.map(str::to_string));
        if self.state.deny_permission.load(Ordering::SeqCst) {
            return Err(VoiceError::PermissionDenied("NotAllowedError".into()));
        }
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        bump_live(&self.state.live, &self.state.peak_live);
        Ok(Box::new(FakeStream {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeStream {
    state: Arc<MicState>,
}

impl MicrophoneStream for FakeStream {
    fn read_analysis_frame(&mut self, frame: &mut [f32]) -> usize {
        let level = *self.state.level.lock().unwrap();
        frame.fill(level);
        frame.len()
    }

    fn take_fragments(&mut self) -> Vec<Vec<u8>> {
        vec![vec![0x01]]
    }

    fn finish(&mut self) -> VoiceResult<Vec<Vec<u8>>> {
        self.state.finishes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_finish.load(Ordering::SeqCst) {
            return Err(VoiceError::AudioStream("recorder failed".into()));
        }
        Ok(vec![vec![0xFF]])
    }

    fn release(&mut self) {
        self.state.releases.fetch_add(1, Ordering::SeqCst);
        self.state.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Speaker

type Finisher = Arc<Mutex<Option<oneshot::Sender<()>>>>;

#[derive(Default)]
pub struct OutputState {
    pub resumes: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    live: AtomicUsize,
    pub peak_live: AtomicUsize,
    fail_resume: AtomicBool,
    pub start_gate: Gate,
    pub played: Mutex<Vec<Vec<u8>>>,
    finishers: Mutex<Vec<Finisher>>,
}

/// Records what would have been played; clips end only when the test says so.
#[derive(Clone, Default)]
pub struct FakeOutput {
    pub state: Arc<OutputState>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_resume(&self) {
        self.state.fail_resume.store(true, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.state.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.state.stops.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> usize {
        self.state.resumes.load(Ordering::SeqCst)
    }

    pub fn peak_live(&self) -> usize {
        self.state.peak_live.load(Ordering::SeqCst)
    }

    /// Clips started and not yet stopped.
    pub fn live(&self) -> usize {
        self.state.live.load(Ordering::SeqCst)
    }

    pub fn played(&self) -> Vec<Vec<u8>> {
        self.state.played.lock().unwrap().clone()
    }

    /// Let the most recently started clip reach its natural end.
    pub fn finish_latest(&self) {
        let latest = self.state.finishers.lock().unwrap().last().cloned();
        if let Some(finisher) = latest {
            let tx = finisher.lock().unwrap().take();
            if let Some(tx) = tx {
                let _ = tx.send(());
            }
        }
    }
}

impl AudioOutput for FakeOutput {
    fn resume(&self) -> VoiceResult<()> {
        self.state.resumes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_resume.load(Ordering::SeqCst) {
            return Err(VoiceError::Playback("output device suspended".into()));
        }
        Ok(())
    }

    fn start(&self, audio: Vec<u8>) -> VoiceResult<StartedPlayback> {
        self.state.start_gate.pass();
        if audio == b"bad" {
            return Err(VoiceError::Decode("unrecognized format".into()));
        }
        self.state.starts.fetch_add(1, Ordering::SeqCst);
        bump_live(&self.state.live, &self.state.peak_live);
        self.state.played.lock().unwrap().push(audio);

        let (tx, rx) = oneshot::channel();
        let finisher: Finisher = Arc::new(Mutex::new(Some(tx)));
        self.state.finishers.lock().unwrap().push(Arc::clone(&finisher));
        Ok(StartedPlayback {
            handle: Box::new(FakeHandle {
                state: Arc::clone(&self.state),
                finisher,
                stopped: false,
            }),
            ended: rx,
        })
    }
}

struct FakeHandle {
    state: Arc<OutputState>,
    finisher: Finisher,
    stopped: bool,
}

impl PlaybackHandle for FakeHandle {
    fn stop(&mut self) {
        self.state.stops.fetch_add(1, Ordering::SeqCst);
        if !self.stopped {
            self.stopped = true;
            self.state.live.fetch_sub(1, Ordering::SeqCst);
        }
        // Dropping the sender resolves the paired receiver.
        self.finisher.lock().unwrap().take();
    }
}

// ---------------------------------------------------------------------------
// Agent

#[derive(Default)]
pub struct ScriptedAgent {
    starts: Mutex<VecDeque<Result<StartSessionResponse, DispatchError>>>,
    turns: Mutex<VecDeque<Result<TurnResponse, DispatchError>>>,
    pub uploads: Mutex<Vec<AudioClip>>,
}

impl ScriptedAgent {
    pub fn with_start(self, r: Result<StartSessionResponse, DispatchError>) -> Self {
        self.starts.lock().unwrap().push_back(r);
        self
    }

    pub fn with_turn(self, r: Result<TurnResponse, DispatchError>) -> Self {
        self.turns.lock().unwrap().push_back(r);
        self
    }

    pub fn uploads(&self) -> Vec<AudioClip> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl TurnDispatcher for ScriptedAgent {
    async fn start_session(
        &self,
        _request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, DispatchError> {
        self.starts
            .lock()
            .unwrap()
            .pop_front()
            .expect("unscripted start")
    }

    async fn send_turn(&self, _request: &TurnRequest) -> Result<TurnResponse, DispatchError> {
        self.turns.lock().unwrap().pop_front().expect("unscripted turn")
    }

    async fn send_voice_turn(
        &self,
        _session_id: &str,
        clip: &AudioClip,
    ) -> Result<TurnResponse, DispatchError> {
        self.uploads.lock().unwrap().push(clip.clone());
        self.turns.lock().unwrap().pop_front().expect("unscripted turn")
    }
}

pub fn greeting(audio_b64: Option<&str>) -> StartSessionResponse {
    StartSessionResponse {
        session_id: "s1".into(),
        messages: vec![IntroMessage {
            role: "agent".into(),
            content: "Hello, how can I help?".into(),
        }],
        audio_b64: audio_b64.map(str::to_string),
    }
}

pub fn reply(text: &str, audio_b64: Option<&str>, transcript: Option<&str>) -> TurnResponse {
    TurnResponse {
        agent_message: text.into(),
        end_call: false,
        audio_b64: audio_b64.map(str::to_string),
        user_transcript: transcript.map(str::to_string),
    }
}
