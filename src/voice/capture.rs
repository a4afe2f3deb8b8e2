//! Recording lifecycle: microphone acquisition, buffering, mute, and stop.
//!
//! A [`VoiceCapture`] owns at most one recording session at a time. While
//! recording, a monitor task pulls chunks from the microphone, buffers them
//! (unless muted), and feeds their loudness to a [`SilenceDetector`]. When
//! the detector ends the utterance the task finishes and signals the
//! [`UtteranceEnd`] returned by [`VoiceCapture::start`]; the owner then calls
//! [`VoiceCapture::stop`] to collect the audio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::silence::{SilenceDetector, SilenceVerdict};
use crate::audio::spectrum::SpectrumAnalyser;
use crate::audio::{EncodedAudio, Microphone, MicrophoneStream, encode_wav};
use crate::config::SilenceConfig;
use crate::error::{ChatError, Result};
use crate::speech::PlaybackFlag;

/// Observable capture state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    RequestingPermission,
    Recording { muted: bool },
    Stopping,
    /// The last acquisition attempt failed. Not retried automatically.
    PermissionDenied,
}

/// Audio collected by one recording session.
#[derive(Debug, Clone)]
pub struct CapturedUtterance {
    /// 16-bit mono WAV.
    pub audio: EncodedAudio,
    /// The reply to this utterance should be spoken.
    pub voice_mode: bool,
    pub duration: Duration,
}

/// Resolves when the monitor ends the utterance on its own (silence or the
/// device going away). Never resolves `true` after an explicit stop.
#[derive(Debug)]
pub struct UtteranceEnd(oneshot::Receiver<()>);

impl UtteranceEnd {
    /// Wait for the end of the utterance. Returns `false` if the session was
    /// stopped explicitly instead.
    pub async fn wait(self) -> bool {
        self.0.await.is_ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Requesting,
    Recording,
    Stopping,
    Denied,
}

struct RecordingSession {
    cancel: CancellationToken,
    muted: Arc<AtomicBool>,
    monitor: JoinHandle<Vec<f32>>,
    voice_mode: bool,
    sample_rate: u32,
}

struct CaptureInner {
    phase: Phase,
    session: Option<RecordingSession>,
}

struct CaptureShared {
    microphone: Arc<dyn Microphone>,
    silence: SilenceConfig,
    playback: PlaybackFlag,
    inner: Mutex<CaptureInner>,
}

/// Voice capture controller. Cheaply cloneable; clones share the session.
#[derive(Clone)]
pub struct VoiceCapture {
    shared: Arc<CaptureShared>,
}

impl std::fmt::Debug for VoiceCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceCapture")
            .field("state", &self.state())
            .finish()
    }
}

impl VoiceCapture {
    /// Create a controller. `playback` suppresses silence detection while
    /// the assistant is speaking.
    pub fn new(microphone: Arc<dyn Microphone>, silence: SilenceConfig, playback: PlaybackFlag) -> Self {
        Self {
            shared: Arc::new(CaptureShared {
                microphone,
                silence,
                playback,
                inner: Mutex::new(CaptureInner {
                    phase: Phase::Idle,
                    session: None,
                }),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureInner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current state.
    pub fn state(&self) -> CaptureState {
        let inner = self.lock();
        match inner.phase {
            Phase::Idle => CaptureState::Idle,
            Phase::Requesting => CaptureState::RequestingPermission,
            Phase::Stopping => CaptureState::Stopping,
            Phase::Denied => CaptureState::PermissionDenied,
            Phase::Recording => CaptureState::Recording {
                muted: inner
                    .session
                    .as_ref()
                    .map(|s| s.muted.load(Ordering::Acquire))
                    .unwrap_or(false),
            },
        }
    }

    pub fn is_recording(&self) -> bool {
        self.lock().session.is_some()
    }

    /// Acquire the microphone and begin recording.
    ///
    /// # Errors
    ///
    /// - [`ChatError::RecordingActive`] if a session is already active or
    ///   being set up.
    /// - The microphone's error (usually [`ChatError::PermissionDenied`]) if
    ///   it cannot be acquired.
    pub async fn start(&self, voice_mode: bool) -> Result<UtteranceEnd> {
        {
            let mut inner = self.lock();
            if inner.session.is_some()
                || matches!(inner.phase, Phase::Requesting | Phase::Stopping)
            {
                return Err(ChatError::RecordingActive);
            }
            inner.phase = Phase::Requesting;
        }

        let stream = match self.shared.microphone.open().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "could not acquire microphone");
                self.lock().phase = if matches!(e, ChatError::PermissionDenied(_)) {
                    Phase::Denied
                } else {
                    Phase::Idle
                };
                return Err(e);
            }
        };

        let cancel = stream.cancel_token();
        let sample_rate = stream.sample_rate().max(1);
        let muted = Arc::new(AtomicBool::new(false));
        let (end_tx, end_rx) = oneshot::channel();
        let detector = SilenceDetector::new(&self.shared.silence, Instant::now());
        let monitor = tokio::spawn(monitor(
            stream,
            detector,
            Arc::clone(&muted),
            self.shared.playback.clone(),
            end_tx,
        ));

        let mut inner = self.lock();
        inner.session = Some(RecordingSession {
            cancel,
            muted,
            monitor,
            voice_mode,
            sample_rate,
        });
        inner.phase = Phase::Recording;
        drop(inner);

        info!(voice_mode, sample_rate, "recording started");
        Ok(UtteranceEnd(end_rx))
    }

    /// Flip the mute state. Returns the new state (`false` when idle).
    pub fn toggle_mute(&self) -> bool {
        let inner = self.lock();
        match inner.session.as_ref() {
            Some(session) => {
                let now_muted = !session.muted.load(Ordering::Acquire);
                session.muted.store(now_muted, Ordering::Release);
                debug!(muted = now_muted, "mute toggled");
                now_muted
            }
            None => false,
        }
    }

    /// Stop recording and collect the buffered audio.
    ///
    /// Returns `Ok(None)` if nothing was recording or nothing was buffered.
    /// Safe to call from both the silence path and a user action; only the
    /// first call gets the audio.
    ///
    /// # Errors
    ///
    /// Returns an error if the monitor task panicked or WAV encoding fails.
    pub async fn stop(&self) -> Result<Option<CapturedUtterance>> {
        let session = {
            let mut inner = self.lock();
            match inner.session.take() {
                Some(session) => {
                    inner.phase = Phase::Stopping;
                    session
                }
                None => return Ok(None),
            }
        };

        session.cancel.cancel();
        let joined = session.monitor.await;
        self.lock().phase = Phase::Idle;
        let samples =
            joined.map_err(|e| ChatError::Audio(format!("capture monitor failed: {e}")))?;

        if samples.is_empty() {
            debug!("recording stopped with no buffered audio");
            return Ok(None);
        }

        let duration = Duration::from_secs_f64(samples.len() as f64 / session.sample_rate as f64);
        let audio = encode_wav(&samples, session.sample_rate)?;
        info!(
            duration_ms = duration.as_millis() as u64,
            bytes = audio.bytes.len(),
            "recording stopped"
        );
        Ok(Some(CapturedUtterance {
            audio,
            voice_mode: session.voice_mode,
            duration,
        }))
    }
}

/// Per-chunk loop; returns the buffered samples.
async fn monitor(
    mut stream: MicrophoneStream,
    mut detector: SilenceDetector,
    muted: Arc<AtomicBool>,
    playback: PlaybackFlag,
    end_tx: oneshot::Sender<()>,
) -> Vec<f32> {
    let cancel = stream.cancel_token();
    let mut analyser = SpectrumAnalyser::new();
    let mut buffered: Vec<f32> = Vec::new();
    let mut stopped_explicitly = false;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                stopped_explicitly = true;
                break;
            }
            chunk = stream.next_chunk() => match chunk {
                Some(chunk) => chunk,
                None => {
                    warn!("microphone stream ended unexpectedly");
                    break;
                }
            },
        };

        let is_muted = muted.load(Ordering::Acquire);
        if !is_muted {
            buffered.extend_from_slice(&chunk.samples);
        }

        let suppressed = is_muted || playback.is_playing();
        let amplitude = if suppressed {
            0.0
        } else {
            analyser.mean_amplitude(&chunk.samples)
        };
        if detector.observe(chunk.captured_at, amplitude, suppressed)
            == SilenceVerdict::EndOfUtterance
        {
            break;
        }
    }

    stream.close();
    if !stopped_explicitly {
        let _ = end_tx.send(());
    }
    buffered
}
