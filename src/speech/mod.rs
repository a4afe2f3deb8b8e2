//! Remote speech services and spoken-reply playback.
//!
//! [`SpeechToText`] and [`TextToSpeech`] are the seams to the cloud speech
//! service; [`VoicePlayback`] ties synthesis to an [`AudioOutput`] and keeps
//! a shared [`PlaybackFlag`] raised while the assistant is talking so the
//! capture loop can ignore the assistant's own voice.

pub mod elevenlabs;

pub use elevenlabs::ElevenLabsClient;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::audio::{AudioOutput, EncodedAudio};
use crate::error::Result;

/// Transcribes captured audio.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    /// Transcribe `audio`. An empty string means nothing was recognized.
    async fn transcribe(&self, audio: &EncodedAudio) -> Result<String>;
}

/// Synthesizes speech audio from text.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<EncodedAudio>;
}

/// Shared "assistant is speaking" signal.
#[derive(Debug, Clone, Default)]
pub struct PlaybackFlag(Arc<AtomicBool>);

impl PlaybackFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, playing: bool) {
        self.0.store(playing, Ordering::Release);
    }
}

/// Lowers the flag when dropped, whatever path playback exits by.
struct PlayingGuard<'a>(&'a PlaybackFlag);

impl<'a> PlayingGuard<'a> {
    fn raise(flag: &'a PlaybackFlag) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for PlayingGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Result of speaking a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOutcome {
    /// Listening should resume now that playback has ended.
    pub resume_listening: bool,
}

/// Speaks assistant replies.
#[derive(Clone)]
pub struct VoicePlayback {
    tts: Arc<dyn TextToSpeech>,
    output: Arc<dyn AudioOutput>,
    flag: PlaybackFlag,
}

impl std::fmt::Debug for VoicePlayback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoicePlayback")
            .field("playing", &self.flag.is_playing())
            .finish()
    }
}

impl VoicePlayback {
    pub fn new(tts: Arc<dyn TextToSpeech>, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            tts,
            output,
            flag: PlaybackFlag::new(),
        }
    }

    /// Handle to the playing/idle signal.
    pub fn flag(&self) -> PlaybackFlag {
        self.flag.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.flag.is_playing()
    }

    /// Synthesize `text` and play it to completion.
    ///
    /// The flag is raised for the whole synthesize-and-play span.
    ///
    /// # Errors
    ///
    /// Returns an error if synthesis or playback fails; the flag is lowered
    /// either way.
    pub async fn speak(&self, text: &str, auto_resume: bool) -> Result<PlaybackOutcome> {
        let _guard = PlayingGuard::raise(&self.flag);
        let audio = self.tts.synthesize(text).await?;
        debug!(bytes = audio.bytes.len(), "speech synthesized");
        self.output.play(audio).await?;
        info!("reply playback finished");
        Ok(PlaybackOutcome {
            resume_listening: auto_resume,
        })
    }
}
