//! Events emitted by a chat session for the UI and diagnostics.
//!
//! Failures that the session recovers from on its own (persistence, speech
//! recognition, playback) are reported here rather than returned, so the
//! caller can decide whether to show a toast, retry, or ignore them.

use crate::message::{Message, ThreadId};

/// What the session is doing or what just happened to it.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A message was appended to the visible transcript.
    MessageAppended(Message),
    /// The visible transcript was replaced (chat selected or started).
    TranscriptReset { chat_id: String, messages: usize },
    /// The assistant started or stopped "typing".
    TypingChanged { active: bool },
    /// The backend issued a new thread.
    ThreadCreated(ThreadId),
    /// The thread row was saved for the signed-in user.
    ThreadPersisted(ThreadId),
    /// A thread row could not be saved. The thread stays usable.
    PersistenceFailed { thread_id: ThreadId, error: String },
    /// Speech-to-text failed; the turn was dropped.
    TranscriptionFailed { error: String },
    /// Speech-to-text returned no text; the turn was dropped.
    TranscriptEmpty,
    /// A reply arrived after the user moved to another chat.
    StaleReplyDiscarded { thread_id: Option<ThreadId> },
    /// Spoken playback of a reply failed. The text reply is still shown.
    PlaybackFailed { error: String },
    /// Spoken reply finished; the driver should start listening again.
    ResumeListening,
}
