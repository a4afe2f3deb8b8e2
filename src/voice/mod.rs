//! Turn-taking: recording lifecycle and end-of-utterance detection.

pub mod capture;
pub mod silence;

pub use capture::{CaptureState, CapturedUtterance, UtteranceEnd, VoiceCapture};
pub use silence::{SilenceDetector, SilenceVerdict};
