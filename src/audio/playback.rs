//! Audio playback to system speakers via cpal.
//!
//! Encoded speech (MP3 from the TTS service) is decoded with symphonia,
//! downmixed to mono, and played on a blocking thread.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info};

use super::{AudioOutput, EncodedAudio};
use crate::config::AudioConfig;
use crate::error::{ChatError, Result};

/// Speaker output via cpal.
#[derive(Debug, Clone)]
pub struct CpalPlayback {
    output_device: Option<String>,
}

impl CpalPlayback {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            output_device: config.output_device.clone(),
        }
    }

    /// List available output devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_output_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err(|e| ChatError::Audio(format!("cannot enumerate devices: {e}")))?;

        let mut names = Vec::new();
        for device in devices {
            if let Ok(desc) = device.description() {
                names.push(desc.name().to_owned());
            }
        }
        Ok(names)
    }
}

#[async_trait]
impl AudioOutput for CpalPlayback {
    async fn play(&self, audio: EncodedAudio) -> Result<()> {
        let device_name = self.output_device.clone();
        tokio::task::spawn_blocking(move || {
            let (samples, sample_rate) = decode_to_mono(&audio)?;
            debug!(
                "decoded {} samples at {sample_rate}Hz for playback",
                samples.len()
            );
            play_blocking(device_name.as_deref(), samples, sample_rate)
        })
        .await
        .map_err(|e| ChatError::Audio(format!("playback task failed: {e}")))?
    }
}

fn select_output_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if let Some(name) = name {
        host.output_devices()
            .map_err(|e| ChatError::Audio(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| ChatError::Audio(format!("output device '{name}' not found")))
    } else {
        host.default_output_device()
            .ok_or_else(|| ChatError::Audio("no default output device".into()))
    }
}

/// Play mono samples; blocks until every sample has been written.
fn play_blocking(device_name: Option<&str>, samples: Vec<f32>, sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }

    let device = select_output_device(device_name)?;
    let name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using output device: {name}");

    let stream_config = StreamConfig {
        channels: 1,
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let buffer = Arc::new(Mutex::new(PlaybackBuffer {
        samples,
        position: 0,
        finished: false,
    }));
    let buffer_clone = Arc::clone(&buffer);

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                let mut buf = match buffer_clone.lock() {
                    Ok(b) => b,
                    Err(_) => return,
                };
                for sample in data.iter_mut() {
                    if buf.position < buf.samples.len() {
                        *sample = buf.samples[buf.position];
                        buf.position += 1;
                    } else {
                        *sample = 0.0;
                        buf.finished = true;
                    }
                }
            },
            move |err| {
                error!("audio output stream error: {err}");
            },
            None,
        )
        .map_err(|e| ChatError::Audio(format!("failed to build output stream: {e}")))?;

    stream
        .play()
        .map_err(|e| ChatError::Audio(format!("failed to start output stream: {e}")))?;

    loop {
        std::thread::sleep(Duration::from_millis(10));
        let buf = buffer
            .lock()
            .map_err(|e| ChatError::Audio(format!("playback buffer lock poisoned: {e}")))?;
        if buf.finished {
            break;
        }
    }

    drop(stream);
    Ok(())
}

/// Internal buffer for tracking playback progress.
struct PlaybackBuffer {
    samples: Vec<f32>,
    position: usize,
    finished: bool,
}

/// Decode an encoded clip into mono f32 samples and its sample rate.
///
/// # Errors
///
/// Returns an error if the container cannot be probed or decoded.
pub fn decode_to_mono(audio: &EncodedAudio) -> Result<(Vec<f32>, u32)> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let source = Cursor::new(audio.bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(source), Default::default());

    let mut hint = Hint::new();
    hint.with_extension(audio.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| ChatError::Audio(format!("failed to probe audio: {e}")))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| ChatError::Audio("no default audio track".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();

    let sr = codec_params
        .sample_rate
        .ok_or_else(|| ChatError::Audio("unknown sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| ChatError::Audio(format!("failed to create decoder: {e}")))?;

    let mut out: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(ChatError::Audio(format!("audio read error: {e}"))),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphError::DecodeError(_)) => continue,
            Err(e) => return Err(ChatError::Audio(format!("audio decode error: {e}"))),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let frames = decoded.frames() as u64;
        let required = usize::try_from(frames)
            .unwrap_or(usize::MAX)
            .saturating_mul(channels);

        let needs_new = sample_buf
            .as_ref()
            .map(|b| b.capacity() < required)
            .unwrap_or(true);
        if needs_new {
            sample_buf = Some(SampleBuffer::<f32>::new(frames, spec));
        } else if let Some(b) = sample_buf.as_mut() {
            b.clear();
        }

        if let Some(b) = sample_buf.as_mut() {
            b.copy_interleaved_ref(decoded);
        }

        let data = sample_buf.as_ref().map(|b| b.samples()).unwrap_or(&[]);
        if channels <= 1 {
            out.extend_from_slice(data);
        } else {
            out.extend(
                data.chunks_exact(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    Ok((out, sr))
}
