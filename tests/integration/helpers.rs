//! Shared fakes for integration tests.
//!
//! Every collaborator of a [`ChatSession`] has a scripted stand-in here so
//! session scenarios run without network or audio hardware.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use wayfarer::audio::{AudioChunk, AudioOutput, EncodedAudio, Microphone, MicrophoneStream};
use wayfarer::auth::{AuthProvider, StaticIdentity};
use wayfarer::backend::{BackendMessage, ConversationBackend, MessageKind};
use wayfarer::config::{ChatConfig, SilenceConfig};
use wayfarer::message::{NewThreadRecord, ThreadId, ThreadRecord};
use wayfarer::speech::{SpeechToText, TextToSpeech};
use wayfarer::store::{MemoryThreadStore, ThreadStore};
use wayfarer::{ChatError, ChatSession, Result, SessionEvent, VoiceServices};

pub(crate) const USER: &str = "u-1";

// ────────────────────────────────────────────────────────────────────────────
// Conversation backend
// ────────────────────────────────────────────────────────────────────────────

/// One scripted backend answer.
#[derive(Debug, Clone)]
pub(crate) enum Scripted {
    Messages(Vec<BackendMessage>),
    Fail,
}

impl Scripted {
    /// A run whose only output is one AI message.
    pub(crate) fn reply(text: &str) -> Self {
        Self::Messages(vec![BackendMessage::text(MessageKind::Ai, text)])
    }

    fn into_result(self) -> Result<Vec<BackendMessage>> {
        match self {
            Self::Messages(messages) => Ok(messages),
            Self::Fail => Err(ChatError::Network("scripted failure".into())),
        }
    }
}

/// Backend operations a test can hold open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Call {
    CreateThread,
    Run,
    State,
}

/// Lets a test pause one call mid-flight and know when it got there.
#[derive(Default)]
struct Gate {
    held: Mutex<Option<oneshot::Receiver<()>>>,
    reached: Notify,
}

impl Gate {
    async fn pass(&self) {
        let held = self.held.lock().unwrap().take();
        self.reached.notify_one();
        if let Some(release) = held {
            let _ = release.await;
        }
    }
}

/// Backend answering from scripts and recording every call.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    next_thread: AtomicUsize,
    fail_create: AtomicBool,
    runs: Mutex<VecDeque<Scripted>>,
    states: Mutex<HashMap<String, Scripted>>,
    run_calls: Mutex<Vec<(ThreadId, String)>>,
    gates: HashMap<Call, Gate>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Arc<Self> {
        let gates = [Call::CreateThread, Call::Run, Call::State]
            .into_iter()
            .map(|call| (call, Gate::default()))
            .collect();
        Arc::new(Self {
            gates,
            ..Self::default()
        })
    }

    fn gate(&self, call: Call) -> &Gate {
        &self.gates[&call]
    }

    pub(crate) fn push_run(&self, scripted: Scripted) {
        self.runs.lock().unwrap().push_back(scripted);
    }

    pub(crate) fn set_state(&self, thread: &str, scripted: Scripted) {
        self.states
            .lock()
            .unwrap()
            .insert(thread.to_owned(), scripted);
    }

    pub(crate) fn fail_thread_creation(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn run_calls(&self) -> Vec<(ThreadId, String)> {
        self.run_calls.lock().unwrap().clone()
    }

    pub(crate) fn threads_created(&self) -> usize {
        self.next_thread.load(Ordering::SeqCst)
    }

    /// Block the next `call` until the returned sender fires.
    pub(crate) fn hold_next(&self, call: Call) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.gate(call).held.lock().unwrap() = Some(rx);
        tx
    }

    /// Resolves once a `call` has reached the backend.
    pub(crate) async fn wait_for(&self, call: Call) {
        self.gate(call).reached.notified().await;
    }
}

#[async_trait]
impl ConversationBackend for ScriptedBackend {
    async fn create_thread(&self) -> Result<ThreadId> {
        self.gate(Call::CreateThread).pass().await;
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ChatError::Network("connection refused".into()));
        }
        let n = self.next_thread.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ThreadId::new(format!("thread-{n}")))
    }

    async fn run_wait(&self, thread: &ThreadId, text: &str) -> Result<Vec<BackendMessage>> {
        self.run_calls
            .lock()
            .unwrap()
            .push((thread.clone(), text.to_owned()));
        self.gate(Call::Run).pass().await;

        let scripted = self
            .runs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Messages(Vec::new()));
        scripted.into_result()
    }

    async fn thread_state(&self, thread: &ThreadId) -> Result<Vec<BackendMessage>> {
        self.gate(Call::State).pass().await;
        let scripted = self
            .states
            .lock()
            .unwrap()
            .get(thread.as_str())
            .cloned()
            .unwrap_or(Scripted::Fail);
        scripted.into_result()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Thread store
// ────────────────────────────────────────────────────────────────────────────

/// Store whose every call fails.
pub(crate) struct FailingStore;

#[async_trait]
impl ThreadStore for FailingStore {
    async fn insert(&self, _record: &NewThreadRecord) -> Result<()> {
        Err(ChatError::Persistence("table is read-only".into()))
    }

    async fn list_for_user(&self, _user_id: &str) -> Result<Vec<ThreadRecord>> {
        Err(ChatError::Persistence("table is read-only".into()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Speech and audio
// ────────────────────────────────────────────────────────────────────────────

/// Speech-to-text returning a fixed transcript (or failing).
pub(crate) struct FakeStt {
    transcript: Option<String>,
    calls: AtomicUsize,
}

impl FakeStt {
    pub(crate) fn hearing(text: &str) -> Arc<Self> {
        Arc::new(Self {
            transcript: Some(text.to_owned()),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            transcript: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechToText for FakeStt {
    async fn transcribe(&self, audio: &EncodedAudio) -> Result<String> {
        assert_eq!(audio.mime_type, "audio/wav");
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.transcript
            .clone()
            .ok_or_else(|| ChatError::Network("speech service unavailable".into()))
    }
}

/// Text-to-speech echoing the text back as bytes (or failing).
pub(crate) struct FakeTts {
    fail: bool,
}

#[async_trait]
impl TextToSpeech for FakeTts {
    async fn synthesize(&self, text: &str) -> Result<EncodedAudio> {
        if self.fail {
            return Err(ChatError::Network("voice quota exceeded".into()));
        }
        Ok(EncodedAudio::new(text.as_bytes().to_vec(), "audio/mpeg"))
    }
}

/// Output that records what it was asked to play.
#[derive(Default)]
pub(crate) struct RecordingOutput {
    played: Mutex<Vec<String>>,
}

impl RecordingOutput {
    pub(crate) fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioOutput for RecordingOutput {
    async fn play(&self, audio: EncodedAudio) -> Result<()> {
        self.played
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&audio.bytes).into_owned());
        Ok(())
    }
}

/// Microphone whose chunks are pushed by the test.
#[derive(Default)]
pub(crate) struct ManualMicrophone {
    sender: Mutex<Option<mpsc::Sender<AudioChunk>>>,
}

impl ManualMicrophone {
    pub(crate) fn sender(&self) -> mpsc::Sender<AudioChunk> {
        self.sender
            .lock()
            .unwrap()
            .clone()
            .expect("microphone was opened")
    }

    /// Push chunks covering `[from_ms, to_ms)` at 16 ms spacing.
    pub(crate) async fn speak(&self, start: Instant, from_ms: u64, to_ms: u64, level: f32) {
        let tx = self.sender();
        let mut ms = from_ms;
        while ms < to_ms {
            let _ = tx.send(noise_chunk(start + Duration::from_millis(ms), level)).await;
            ms += 16;
        }
    }
}

#[async_trait]
impl Microphone for ManualMicrophone {
    async fn open(&self) -> Result<MicrophoneStream> {
        let (tx, rx) = mpsc::channel(1024);
        *self.sender.lock().unwrap() = Some(tx);
        Ok(MicrophoneStream::new(rx, 16_000, CancellationToken::new()))
    }
}

/// One analysis window of deterministic pseudo-noise at `level`.
fn noise_chunk(at: Instant, level: f32) -> AudioChunk {
    let mut state: u32 = 0x2545_f491;
    let samples = (0..2048)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            ((state >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0) * level
        })
        .collect();
    AudioChunk {
        samples,
        sample_rate: 16_000,
        captured_at: at,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Session builders
// ────────────────────────────────────────────────────────────────────────────

/// Text-only session with no reply delay, a memory store, and user `u-1`.
pub(crate) fn text_session(backend: Arc<ScriptedBackend>) -> (ChatSession, MemoryThreadStore) {
    let store = MemoryThreadStore::new();
    let session = session_with(backend, Arc::new(store.clone()), StaticIdentity::signed_in(USER));
    (session, store)
}

pub(crate) fn session_with(
    backend: Arc<ScriptedBackend>,
    store: Arc<dyn ThreadStore>,
    identity: StaticIdentity,
) -> ChatSession {
    let auth: Arc<dyn AuthProvider> = Arc::new(identity);
    ChatSession::new(ChatConfig::immediate(), backend, store, auth)
}

/// Handles to a voice-enabled session's fakes.
pub(crate) struct VoiceRig {
    pub(crate) session: ChatSession,
    pub(crate) backend: Arc<ScriptedBackend>,
    pub(crate) stt: Arc<FakeStt>,
    pub(crate) output: Arc<RecordingOutput>,
    pub(crate) microphone: Arc<ManualMicrophone>,
}

pub(crate) fn voice_session(stt: Arc<FakeStt>, tts_fails: bool) -> VoiceRig {
    let backend = ScriptedBackend::new();
    let output = Arc::new(RecordingOutput::default());
    let microphone = Arc::new(ManualMicrophone::default());
    let (session, _) = text_session(Arc::clone(&backend));
    let session = session.with_voice(VoiceServices {
        stt: stt.clone(),
        tts: Arc::new(FakeTts { fail: tts_fails }),
        output: output.clone(),
        microphone: microphone.clone(),
        silence: SilenceConfig::default(),
    });
    VoiceRig {
        session,
        backend,
        stt,
        output,
        microphone,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Events
// ────────────────────────────────────────────────────────────────────────────

/// Drain all pending events from the broadcast receiver into a Vec.
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(evt) = rx.try_recv() {
        events.push(evt);
    }
    events
}

/// Wait (up to five seconds) for an event matching `pred`.
pub(crate) async fn wait_for_event(
    rx: &mut broadcast::Receiver<SessionEvent>,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for session event")
}
