//! Microphone capture, speaker playback, and spectral analysis.

pub mod capture;
pub mod playback;
pub mod spectrum;

use std::io::Cursor;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};

/// A chunk of mono samples from the microphone.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Mono f32 samples at `sample_rate`.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// When this chunk was captured.
    pub captured_at: Instant,
}

/// Encoded audio bytes plus their MIME type.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedAudio {
    pub bytes: Bytes,
    pub mime_type: String,
}

impl EncodedAudio {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    /// File name to use when uploading this audio.
    pub fn file_name(&self) -> &'static str {
        match self.extension() {
            "wav" => "recording.wav",
            "mp3" => "recording.mp3",
            "webm" => "recording.webm",
            _ => "recording.bin",
        }
    }

    /// Container extension implied by the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
            "audio/mpeg" | "audio/mp3" => "mp3",
            "audio/webm" => "webm",
            _ => "bin",
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A live microphone stream.
///
/// Dropping or closing the stream stops the device tracks.
#[derive(Debug)]
pub struct MicrophoneStream {
    chunks: mpsc::Receiver<AudioChunk>,
    sample_rate: u32,
    cancel: CancellationToken,
}

impl MicrophoneStream {
    pub fn new(chunks: mpsc::Receiver<AudioChunk>, sample_rate: u32, cancel: CancellationToken) -> Self {
        Self {
            chunks,
            sample_rate,
            cancel,
        }
    }

    /// Next captured chunk, or `None` once the device has stopped.
    pub async fn next_chunk(&mut self) -> Option<AudioChunk> {
        self.chunks.recv().await
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Token cancelled when the stream is closed.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the device tracks.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Source of microphone streams.
#[async_trait]
pub trait Microphone: Send + Sync {
    /// Acquire the input device and start streaming.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::PermissionDenied`] when the device cannot be
    /// acquired.
    async fn open(&self) -> Result<MicrophoneStream>;
}

/// Speaker sink for encoded audio.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// Play `audio` to completion.
    async fn play(&self, audio: EncodedAudio) -> Result<()>;
}

/// Encode mono f32 samples as a 16-bit PCM WAV file.
///
/// # Errors
///
/// Returns an error if the WAV writer fails.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<EncodedAudio> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ChatError::Audio(format!("failed to start WAV: {e}")))?;
        for s in samples {
            let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            writer
                .write_sample(v)
                .map_err(|e| ChatError::Audio(format!("failed to write WAV sample: {e}")))?;
        }
        writer
            .finalize()
            .map_err(|e| ChatError::Audio(format!("failed to finalize WAV: {e}")))?;
    }
    Ok(EncodedAudio::new(cursor.into_inner(), "audio/wav"))
}

/// Convert interleaved multi-channel audio to mono by averaging channels.
pub(crate) fn to_mono(data: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    data.chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear-interpolation downsampler.
///
/// Speech energy sits below 8kHz, so no anti-alias filter is applied.
pub(crate) fn downsample(samples: &[f32], src_rate: u32, dst_rate: u32) -> Vec<f32> {
    if src_rate == dst_rate || samples.is_empty() || dst_rate == 0 {
        return samples.to_vec();
    }

    let ratio = src_rate as f64 / dst_rate as f64;
    let out_len = (samples.len() as f64 / ratio) as usize;
    let mut output = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 * ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples[idx.min(samples.len() - 1)]
        };
        output.push(sample);
    }

    output
}
