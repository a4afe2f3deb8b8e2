//! Error types for the chat assistant.

/// Top-level error type for the chat assistant.
///
/// External failures are usually caught where they happen and turned into a
/// fallback message or a [`SessionEvent`](crate::session::SessionEvent); this
/// type is what the adapters and the capture controller hand back.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// Microphone could not be acquired (denied or no usable device).
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Any failed request to a remote service.
    #[error("network error: {0}")]
    Network(String),

    /// Thread or profile save/load failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Speech-to-text returned no usable text.
    #[error("transcript was empty")]
    EmptyTranscript,

    /// Backend message content had a shape we do not understand.
    #[error("unrecognized message content: {0}")]
    UnrecognizedContent(String),

    /// Audio device, stream, or codec error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// No authenticated user is available.
    #[error("not authorized: no authenticated user")]
    NotAuthorized,

    /// A recording session is already active.
    #[error("a recording session is already active")]
    RecordingActive,

    /// Voice services were not configured for this session.
    #[error("voice services are not configured")]
    VoiceUnavailable,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChatError {
    /// Whether this error came from talking to a remote service.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ChatError>;
