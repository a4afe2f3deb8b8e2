//! Frequency-domain loudness used for silence detection.
//!
//! Produces the same kind of number a browser analyser node exposes as
//! byte frequency data: per-bin magnitudes in dB mapped from
//! `[MIN_DECIBELS, MAX_DECIBELS]` onto `[0, 1]`, then averaged. The result is
//! a fraction of full scale, so a threshold like `0.01` means "1% of max".

use rustfft::FftPlanner;
use rustfft::num_complex::Complex32;

/// FFT length; only the most recent samples of a chunk are analysed.
pub const ANALYSIS_WINDOW: usize = 2048;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Reusable analyser holding a planned FFT and window.
pub struct SpectrumAnalyser {
    fft: std::sync::Arc<dyn rustfft::Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex32>,
}

impl std::fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("size", &self.window.len())
            .finish()
    }
}

impl Default for SpectrumAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyser {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            fft: planner.plan_fft_forward(ANALYSIS_WINDOW),
            window: blackman_window(ANALYSIS_WINDOW),
            scratch: vec![Complex32::new(0.0, 0.0); ANALYSIS_WINDOW],
        }
    }

    /// Mean scaled spectral amplitude of `samples`, in `[0, 1]`.
    ///
    /// Short inputs are zero-padded; long inputs use their tail.
    pub fn mean_amplitude(&mut self, samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }

        let tail = &samples[samples.len().saturating_sub(ANALYSIS_WINDOW)..];
        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let s = tail.get(i).copied().unwrap_or(0.0);
            *slot = Complex32::new(s * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let bins = ANALYSIS_WINDOW / 2;
        let n = ANALYSIS_WINDOW as f32;
        let range = MAX_DECIBELS - MIN_DECIBELS;
        let total: f32 = self.scratch[..bins]
            .iter()
            .map(|c| {
                let magnitude = c.norm() / n;
                let db = if magnitude > 0.0 {
                    20.0 * magnitude.log10()
                } else {
                    MIN_DECIBELS
                };
                ((db - MIN_DECIBELS) / range).clamp(0.0, 1.0)
            })
            .sum();
        total / bins as f32
    }
}

/// One-shot convenience around [`SpectrumAnalyser::mean_amplitude`].
pub fn mean_frequency_amplitude(samples: &[f32]) -> f32 {
    SpectrumAnalyser::new().mean_amplitude(samples)
}

fn blackman_window(len: usize) -> Vec<f32> {
    let a0 = 0.42f32;
    let a1 = 0.5f32;
    let a2 = 0.08f32;
    let denom = (len.max(2) - 1) as f32;
    (0..len)
        .map(|i| {
            let x = i as f32 / denom;
            a0 - a1 * (2.0 * std::f32::consts::PI * x).cos()
                + a2 * (4.0 * std::f32::consts::PI * x).cos()
        })
        .collect()
}
