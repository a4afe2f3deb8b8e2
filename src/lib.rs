//! Wayfarer: a voice-capable chat assistant client.
//!
//! The assistant talks to a remote run-oriented conversation backend, keeps
//! an index of the user's threads in a hosted table, and can take spoken
//! input and speak its replies through a cloud speech service:
//! Microphone → silence detection → STT → backend run → reply → TTS → Speaker
//!
//! # Architecture
//!
//! - **Backend**: thread creation, runs, and thread state over HTTP (`reqwest`)
//! - **Store**: persisted thread rows (PostgREST, or in memory)
//! - **Audio**: microphone capture and playback via `cpal`, MP3 decoding via
//!   `symphonia`, spectral loudness via `rustfft`
//! - **Voice**: recording lifecycle, mute, and end-of-utterance detection
//! - **Speech**: remote speech-to-text and text-to-speech
//! - **Session**: the chat controller tying the above together
//! - **Dashboard**: panel selection, auth gate, and the injected map widget

pub mod audio;
pub mod auth;
pub mod backend;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod message;
pub mod session;
pub mod speech;
pub mod store;
pub mod voice;

pub use config::AssistantConfig;
pub use error::{ChatError, Result};
pub use message::{ChatHistoryEntry, Message, Sender, ThreadId};
pub use session::{ChatSession, SessionEvent, TurnOutcome, VoiceServices};
