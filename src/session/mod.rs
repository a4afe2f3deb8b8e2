//! Chat session controller.
//!
//! [`ChatSession`] owns the visible transcript, the chat list, and the
//! active thread, and drives one turn at a time through the conversation
//! backend. Every external failure is absorbed here: a failed run becomes
//! an apology message, a failed load becomes the greeting, and failures
//! with no transcript effect are reported as [`SessionEvent`]s.
//!
//! State lives behind a `tokio::sync::Mutex` that is never held across an
//! external call, so a reply can resolve after the user has switched chats.
//! Each switch bumps a view generation; a reply or load tagged with an older
//! generation is discarded instead of landing in the wrong transcript.

pub mod events;

pub use events::SessionEvent;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, error, info, warn};

use crate::audio::{AudioOutput, Microphone};
use crate::auth::AuthProvider;
use crate::backend::{BackendMessage, ConversationBackend, MessageKind, last_assistant_text};
use crate::config::{ChatConfig, SilenceConfig};
use crate::error::{ChatError, Result};
use crate::message::{
    BACKEND_ERROR_APOLOGY, ChatHistoryEntry, Message, NO_REPLY_FALLBACK, NewThreadRecord, Sender,
    ThreadId, WELCOME_CHAT_ID,
};
use crate::speech::{SpeechToText, TextToSpeech, VoicePlayback};
use crate::store::ThreadStore;
use crate::voice::{CaptureState, VoiceCapture};

const EVENT_CAPACITY: usize = 256;

/// Collaborators needed for voice input and spoken replies.
pub struct VoiceServices {
    pub stt: Arc<dyn SpeechToText>,
    pub tts: Arc<dyn TextToSpeech>,
    pub output: Arc<dyn AudioOutput>,
    pub microphone: Arc<dyn Microphone>,
    pub silence: SilenceConfig,
}

struct Voice {
    stt: Arc<dyn SpeechToText>,
    playback: VoicePlayback,
    capture: VoiceCapture,
}

/// What became of one user turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Nothing was sent (blank input, or no audio/transcript).
    Ignored,
    /// The assistant message appended to the transcript.
    Replied(Message),
    /// A reply arrived after the view changed and was dropped.
    Discarded,
}

#[derive(Debug)]
struct SessionState {
    messages: Vec<Message>,
    history: Vec<ChatHistoryEntry>,
    thread_ids: Vec<ThreadId>,
    active_thread: Option<ThreadId>,
    active_chat: String,
    generation: u64,
    typing: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            messages: vec![Message::greeting()],
            history: vec![ChatHistoryEntry::welcome()],
            thread_ids: Vec::new(),
            active_thread: None,
            active_chat: WELCOME_CHAT_ID.into(),
            generation: 0,
            typing: false,
        }
    }
}

/// Handle to a chat session. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct ChatSession {
    config: ChatConfig,
    backend: Arc<dyn ConversationBackend>,
    store: Arc<dyn ThreadStore>,
    auth: Arc<dyn AuthProvider>,
    voice: Option<Arc<Voice>>,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("config", &self.config)
            .field("voice", &self.voice.is_some())
            .finish()
    }
}

impl ChatSession {
    /// Create a text-only session showing the welcome chat.
    pub fn new(
        config: ChatConfig,
        backend: Arc<dyn ConversationBackend>,
        store: Arc<dyn ThreadStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            backend,
            store,
            auth,
            voice: None,
            state: Arc::new(Mutex::new(SessionState::default())),
            events,
        }
    }

    /// Enable voice input and spoken replies.
    pub fn with_voice(mut self, services: VoiceServices) -> Self {
        let playback = VoicePlayback::new(services.tts, services.output);
        let capture = VoiceCapture::new(services.microphone, services.silence, playback.flag());
        self.voice = Some(Arc::new(Voice {
            stt: services.stt,
            playback,
            capture,
        }));
        self
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ── Accessors ──────────────────────────────────────────────

    /// Snapshot of the visible transcript.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    /// Snapshot of the chat list, newest first.
    pub async fn history(&self) -> Vec<ChatHistoryEntry> {
        self.state.lock().await.history.clone()
    }

    /// Every thread id known to this session.
    pub async fn thread_ids(&self) -> Vec<ThreadId> {
        self.state.lock().await.thread_ids.clone()
    }

    pub async fn active_thread(&self) -> Option<ThreadId> {
        self.state.lock().await.active_thread.clone()
    }

    pub async fn active_chat(&self) -> String {
        self.state.lock().await.active_chat.clone()
    }

    pub async fn is_typing(&self) -> bool {
        self.state.lock().await.typing
    }

    pub fn has_voice(&self) -> bool {
        self.voice.is_some()
    }

    /// Capture state, or `None` for a text-only session.
    pub fn capture_state(&self) -> Option<CaptureState> {
        self.voice.as_ref().map(|v| v.capture.state())
    }

    pub fn is_recording(&self) -> bool {
        self.voice
            .as_ref()
            .is_some_and(|v| v.capture.is_recording())
    }

    /// Whether a reply is being spoken right now.
    pub fn is_speaking(&self) -> bool {
        self.voice.as_ref().is_some_and(|v| v.playback.is_playing())
    }

    // ── Threads and history ────────────────────────────────────

    /// Start-up: open a first thread and load the user's chat list.
    ///
    /// Both steps are best-effort; failures are logged and the session
    /// stays usable.
    pub async fn initialize(&self) -> Option<ThreadId> {
        let thread = self.create_thread().await.ok();
        if let Err(e) = self.load_history().await {
            warn!(error = %e, "chat history unavailable");
        }
        thread
    }

    /// Ask the backend for a new thread and make it active.
    ///
    /// The thread row is saved in the background; a failed save is logged
    /// and reported as [`SessionEvent::PersistenceFailed`].
    ///
    /// # Errors
    ///
    /// Returns the backend error if the thread could not be created.
    pub async fn create_thread(&self) -> Result<ThreadId> {
        let thread_id = self.open_thread().await?;
        self.adopt_thread(&thread_id, None).await;
        Ok(thread_id)
    }

    async fn open_thread(&self) -> Result<ThreadId> {
        self.backend.create_thread().await.inspect_err(|e| {
            error!(error = %e, "could not create thread");
        })
    }

    /// Register a fresh thread and attach it to the chat on screen.
    ///
    /// With `generation` set, the thread only becomes active if the view
    /// has not changed since then. It is recorded and saved either way.
    /// Returns whether the thread was attached.
    async fn adopt_thread(&self, thread_id: &ThreadId, generation: Option<u64>) -> bool {
        let attached = {
            let mut state = self.state.lock().await;
            state.thread_ids.push(thread_id.clone());
            let current = generation.is_none_or(|g| g == state.generation);
            if current {
                state.active_thread = Some(thread_id.clone());
                let active_chat = state.active_chat.clone();
                if let Some(entry) = state
                    .history
                    .iter_mut()
                    .find(|entry| entry.id == active_chat && entry.thread_id.is_none())
                {
                    entry.thread_id = Some(thread_id.clone());
                }
            }
            current
        };
        self.announce_thread(thread_id);
        attached
    }

    fn announce_thread(&self, thread_id: &ThreadId) {
        info!(thread = %thread_id, "thread created");
        self.emit(SessionEvent::ThreadCreated(thread_id.clone()));
        self.spawn_persist(thread_id.clone());
    }

    fn spawn_persist(&self, thread_id: ThreadId) {
        let store = Arc::clone(&self.store);
        let auth = Arc::clone(&self.auth);
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = match auth.current_user().await {
                Some(user) => store
                    .insert(&NewThreadRecord::fresh(&thread_id, user))
                    .await,
                None => Err(ChatError::NotAuthorized),
            };
            let event = match result {
                Ok(()) => {
                    debug!(thread = %thread_id, "thread saved");
                    SessionEvent::ThreadPersisted(thread_id)
                }
                Err(e) => {
                    warn!(thread = %thread_id, error = %e, "thread not saved");
                    SessionEvent::PersistenceFailed {
                        thread_id,
                        error: e.to_string(),
                    }
                }
            };
            let _ = events.send(event);
        });
    }

    /// Replace the chat list with the signed-in user's saved threads.
    ///
    /// # Errors
    ///
    /// - [`ChatError::NotAuthorized`] when nobody is signed in; the list is
    ///   left as it was.
    /// - The store's error if the rows cannot be read.
    pub async fn load_history(&self) -> Result<Vec<ChatHistoryEntry>> {
        let Some(user) = self.auth.current_user().await else {
            return Err(ChatError::NotAuthorized);
        };
        let rows = self.store.list_for_user(&user).await?;

        let thread_ids: Vec<ThreadId> = rows.iter().map(|r| ThreadId::new(&r.thread_id)).collect();
        let entries: Vec<ChatHistoryEntry> = rows.into_iter().map(ChatHistoryEntry::from).collect();

        let mut state = self.state.lock().await;
        state.history = entries.clone();
        state.thread_ids = thread_ids;
        info!(chats = entries.len(), "chat history loaded");
        Ok(entries)
    }

    /// Start a fresh chat and show the greeting.
    ///
    /// If the backend cannot issue a thread the chat is still created, as a
    /// local-only entry with no thread id.
    pub async fn new_chat(&self) -> ChatHistoryEntry {
        let thread_id = match self.open_thread().await {
            Ok(id) => Some(id),
            Err(_) => {
                warn!("starting a local-only chat");
                None
            }
        };
        let entry = ChatHistoryEntry::new_chat(thread_id.clone());

        let mut state = self.state.lock().await;
        state.generation += 1;
        if let Some(id) = &thread_id {
            state.thread_ids.push(id.clone());
        }
        state.history.insert(0, entry.clone());
        state.active_chat = entry.id.clone();
        state.active_thread = thread_id.clone();
        state.messages = vec![Message::greeting()];
        drop(state);

        if let Some(id) = &thread_id {
            self.announce_thread(id);
        }
        self.emit(SessionEvent::TranscriptReset {
            chat_id: entry.id.clone(),
            messages: 1,
        });
        entry
    }

    /// Switch to the chat `chat_id` and rebuild its transcript.
    ///
    /// Entries with a thread have their messages fetched from the backend.
    /// An unknown chat, an entry without a thread, a failed fetch, or a
    /// thread with no displayable messages all show the greeting instead.
    pub async fn select_chat(&self, chat_id: &str) {
        let (generation, thread_id) = {
            let mut state = self.state.lock().await;
            state.generation += 1;
            state.active_chat = chat_id.to_owned();
            let thread_id = state
                .history
                .iter()
                .find(|entry| entry.id == chat_id)
                .and_then(|entry| entry.thread_id.clone());
            state.active_thread = thread_id.clone();
            (state.generation, thread_id)
        };

        let messages = match &thread_id {
            None => vec![Message::greeting()],
            Some(thread) => match self.backend.thread_state(thread).await {
                Ok(raw) => {
                    let loaded = transcript_from_state(thread, &raw);
                    if loaded.is_empty() {
                        vec![Message::greeting()]
                    } else {
                        loaded
                    }
                }
                Err(e) => {
                    warn!(thread = %thread, error = %e, "could not load thread state");
                    vec![Message::greeting()]
                }
            },
        };

        let mut state = self.state.lock().await;
        if state.generation != generation {
            debug!(chat = chat_id, "dropping transcript for a chat no longer shown");
            return;
        }
        let count = messages.len();
        state.messages = messages;
        drop(state);

        self.emit(SessionEvent::TranscriptReset {
            chat_id: chat_id.to_owned(),
            messages: count,
        });
    }

    // ── Turns ──────────────────────────────────────────────────

    async fn append(&self, message: Message) {
        self.state.lock().await.messages.push(message.clone());
        self.emit(SessionEvent::MessageAppended(message));
    }

    async fn set_typing(&self, active: bool) {
        self.state.lock().await.typing = active;
        self.emit(SessionEvent::TypingChanged { active });
    }

    /// Send typed text. Blank input is ignored.
    pub async fn send_user_text(&self, text: &str) -> TurnOutcome {
        if text.trim().is_empty() {
            return TurnOutcome::Ignored;
        }
        self.append(Message::user(text)).await;
        self.respond(text, false).await
    }

    /// Get the assistant's reply to `text` and append it.
    ///
    /// Always appends exactly one assistant message for the view the turn
    /// started in: the backend's reply, the no-reply fallback, or the
    /// apology. The reply is dropped if the user switched chats meanwhile.
    /// With `voice_mode` set, or while recording, the reply is also spoken.
    pub async fn respond(&self, text: &str, voice_mode: bool) -> TurnOutcome {
        let (generation, active_thread) = {
            let state = self.state.lock().await;
            (state.generation, state.active_thread.clone())
        };
        self.set_typing(true).await;

        let (thread_id, reply, delay) = match self.run_turn(text, generation, active_thread).await {
            Ok((thread_id, reply)) => (Some(thread_id), reply, self.reply_delay()),
            Err(e) => {
                error!(error = %e, "assistant turn failed");
                (
                    None,
                    BACKEND_ERROR_APOLOGY.to_owned(),
                    Duration::from_millis(self.config.error_reply_delay_ms),
                )
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let message = Message::assistant(reply.clone());
        let current = {
            let mut state = self.state.lock().await;
            state.typing = false;
            let current = state.generation == generation;
            if current {
                state.messages.push(message.clone());
            }
            current
        };
        self.emit(SessionEvent::TypingChanged { active: false });

        if !current {
            warn!(thread = ?thread_id, "discarding reply for a chat no longer shown");
            self.emit(SessionEvent::StaleReplyDiscarded { thread_id });
            return TurnOutcome::Discarded;
        }
        self.emit(SessionEvent::MessageAppended(message.clone()));

        if voice_mode || self.is_recording() {
            self.speak(&reply).await;
        }
        TurnOutcome::Replied(message)
    }

    async fn run_turn(
        &self,
        text: &str,
        generation: u64,
        active_thread: Option<ThreadId>,
    ) -> Result<(ThreadId, String)> {
        let thread_id = match active_thread {
            Some(id) => id,
            None => {
                let id = self.open_thread().await?;
                if !self.adopt_thread(&id, Some(generation)).await {
                    debug!(thread = %id, "chat changed while its thread was created, leaving it detached");
                }
                id
            }
        };
        let messages = self.backend.run_wait(&thread_id, text).await?;
        let reply = match last_assistant_text(&messages)? {
            Some(reply) => reply,
            None => {
                debug!(thread = %thread_id, returned = messages.len(), "run produced no assistant text");
                NO_REPLY_FALLBACK.to_owned()
            }
        };
        Ok((thread_id, reply))
    }

    fn reply_delay(&self) -> Duration {
        let low = self.config.reply_delay_min_ms;
        let high = self.config.reply_delay_max_ms.max(low);
        let ms = if low == high {
            low
        } else {
            rand::thread_rng().gen_range(low..=high)
        };
        Duration::from_millis(ms)
    }

    async fn speak(&self, text: &str) {
        let Some(voice) = &self.voice else {
            debug!("no voice output configured, reply shown as text only");
            return;
        };
        match voice
            .playback
            .speak(text, self.config.auto_resume_listening)
            .await
        {
            Ok(outcome) => {
                if outcome.resume_listening {
                    self.emit(SessionEvent::ResumeListening);
                }
            }
            Err(e) => {
                warn!(error = %e, "reply playback failed");
                self.emit(SessionEvent::PlaybackFailed {
                    error: e.to_string(),
                });
            }
        }
    }

    // ── Voice ──────────────────────────────────────────────────

    fn voice(&self) -> Result<&Voice> {
        self.voice.as_deref().ok_or(ChatError::VoiceUnavailable)
    }

    /// Start recording. When silence ends the utterance it is stopped and
    /// sent automatically; [`ChatSession::stop_listening`] ends it early.
    ///
    /// `voice_mode` asks for the reply to be spoken.
    ///
    /// # Errors
    ///
    /// - [`ChatError::VoiceUnavailable`] for a text-only session.
    /// - [`ChatError::RecordingActive`] if already recording.
    /// - The microphone's error if it cannot be acquired.
    pub async fn start_listening(&self, voice_mode: bool) -> Result<()> {
        let end = self.voice()?.capture.start(voice_mode).await?;
        let session = self.clone();
        tokio::spawn(async move {
            if end.wait().await {
                debug!("silence detected, sending utterance");
                if let Err(e) = session.stop_listening().await {
                    warn!(error = %e, "automatic stop failed");
                }
            }
        });
        Ok(())
    }

    /// Stop recording, transcribe, and send the transcript as a user turn.
    ///
    /// A failed or empty transcription drops the turn: nothing is appended,
    /// the backend is not called, and an event says why.
    ///
    /// # Errors
    ///
    /// - [`ChatError::VoiceUnavailable`] for a text-only session.
    /// - The capture error if the recording could not be finalized.
    pub async fn stop_listening(&self) -> Result<TurnOutcome> {
        let voice = self.voice()?;
        let Some(utterance) = voice.capture.stop().await? else {
            return Ok(TurnOutcome::Ignored);
        };

        let text = match voice.stt.transcribe(&utterance.audio).await {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "transcription failed, dropping voice turn");
                self.emit(SessionEvent::TranscriptionFailed {
                    error: e.to_string(),
                });
                return Ok(TurnOutcome::Ignored);
            }
        };
        if text.trim().is_empty() {
            warn!(error = %ChatError::EmptyTranscript, "dropping voice turn");
            self.emit(SessionEvent::TranscriptEmpty);
            return Ok(TurnOutcome::Ignored);
        }

        info!(chars = text.len(), voice_mode = utterance.voice_mode, "voice turn transcribed");
        self.append(Message::user(text.clone())).await;
        Ok(self.respond(&text, utterance.voice_mode).await)
    }

    /// Mute or unmute the microphone without releasing it.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::VoiceUnavailable`] for a text-only session.
    pub fn toggle_mute(&self) -> Result<bool> {
        Ok(self.voice()?.capture.toggle_mute())
    }
}

/// Rebuild a transcript from persisted thread state.
///
/// Messages whose content is unrecognized or empty are skipped. Ids are
/// `{thread}-{index}` with the index taken before filtering.
pub fn transcript_from_state(thread: &ThreadId, raw: &[BackendMessage]) -> Vec<Message> {
    raw.iter()
        .enumerate()
        .filter_map(|(index, message)| {
            let text = match message.content.text() {
                Ok(text) if !text.is_empty() => text,
                Ok(_) => return None,
                Err(e) => {
                    debug!(index, error = %e, "skipping undisplayable message");
                    return None;
                }
            };
            let sender = match message.kind {
                MessageKind::Human => Sender::User,
                MessageKind::Ai => Sender::Assistant,
                _ => Sender::System,
            };
            Some(Message {
                id: format!("{thread}-{index}"),
                text,
                sender,
                timestamp: message.timestamp.unwrap_or_else(Utc::now),
            })
        })
        .collect()
}
