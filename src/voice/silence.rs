//! End-of-utterance detection from per-frame loudness.
//!
//! The detector is fed one loudness sample per captured audio frame. It
//! tracks when the current run of quiet frames began; once that run has
//! lasted `duration_ms` it reports [`SilenceVerdict::EndOfUtterance`], and
//! it does so at most once per detector. Any loud frame restarts the run.
//!
//! Frames observed while suppressed (microphone muted, or assistant speech
//! playing) are not evaluated. When suppression lifts the quiet run starts
//! over, so an intentional pause or the assistant's own voice can never end
//! the user's turn.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::SilenceConfig;

/// Outcome of observing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SilenceVerdict {
    /// Keep listening.
    Continue,
    /// Frame was skipped because detection is suppressed.
    Suppressed,
    /// Quiet long enough; the utterance is over. Reported once.
    EndOfUtterance,
}

/// Rolling silence timer.
#[derive(Debug, Clone)]
pub struct SilenceDetector {
    threshold: f32,
    duration: Duration,
    silence_started: Instant,
    was_suppressed: bool,
    fired: bool,
}

impl SilenceDetector {
    /// Start a detector whose first quiet run begins at `started_at`.
    pub fn new(config: &SilenceConfig, started_at: Instant) -> Self {
        Self {
            threshold: config.threshold,
            duration: Duration::from_millis(config.duration_ms),
            silence_started: started_at,
            was_suppressed: false,
            fired: false,
        }
    }

    /// Observe the loudness of the frame captured at `now`.
    pub fn observe(&mut self, now: Instant, amplitude: f32, suppressed: bool) -> SilenceVerdict {
        if self.fired {
            return SilenceVerdict::Continue;
        }
        if suppressed {
            self.was_suppressed = true;
            return SilenceVerdict::Suppressed;
        }
        if self.was_suppressed {
            self.was_suppressed = false;
            self.silence_started = now;
        }

        if amplitude >= self.threshold {
            self.silence_started = now;
            return SilenceVerdict::Continue;
        }

        let quiet_for = self.quiet_for(now);
        if quiet_for >= self.duration {
            debug!(
                quiet_ms = quiet_for.as_millis() as u64,
                "silence threshold reached, ending utterance"
            );
            self.fired = true;
            return SilenceVerdict::EndOfUtterance;
        }
        SilenceVerdict::Continue
    }

    /// How long the current quiet run has lasted as of `now`.
    pub fn quiet_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.silence_started)
    }
}
