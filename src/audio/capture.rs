//! Microphone audio capture using cpal.
//!
//! Captures audio at the device's native sample rate and downsamples
//! to the configured rate (16kHz mono by default).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::StreamConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{AudioChunk, Microphone, MicrophoneStream, downsample, to_mono};
use crate::config::AudioConfig;
use crate::error::{ChatError, Result};

/// How often the capture thread checks for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(20);

/// Microphone backed by the system input device.
///
/// The cpal stream lives on a dedicated thread because streams are not
/// `Send` on every platform; chunks are forwarded over a channel.
#[derive(Debug, Clone)]
pub struct CpalMicrophone {
    input_device: Option<String>,
    target_sample_rate: u32,
}

impl CpalMicrophone {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            input_device: config.input_device.clone(),
            target_sample_rate: config.input_sample_rate,
        }
    }

    /// List available input devices.
    ///
    /// # Errors
    ///
    /// Returns an error if devices cannot be enumerated.
    pub fn list_input_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
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
impl Microphone for CpalMicrophone {
    async fn open(&self) -> Result<MicrophoneStream> {
        let (tx, rx) = mpsc::channel(64);
        let (ready_tx, ready_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let device_name = self.input_device.clone();
        let target_rate = self.target_sample_rate;
        let thread_cancel = cancel.clone();
        std::thread::Builder::new()
            .name("wayfarer-capture".into())
            .spawn(move || run_capture(device_name, target_rate, tx, thread_cancel, ready_tx))
            .map_err(|e| ChatError::Audio(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(MicrophoneStream::new(rx, target_rate, cancel)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ChatError::Audio("capture thread exited early".into())),
        }
    }
}

fn select_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    if let Some(name) = name {
        host.input_devices()
            .map_err(|e| ChatError::PermissionDenied(format!("cannot enumerate devices: {e}")))?
            .find(|d| {
                d.description()
                    .ok()
                    .map(|desc| desc.name() == name)
                    .unwrap_or(false)
            })
            .ok_or_else(|| ChatError::PermissionDenied(format!("input device '{name}' not found")))
    } else {
        host.default_input_device()
            .ok_or_else(|| ChatError::PermissionDenied("no default input device".into()))
    }
}

/// Body of the capture thread: build the stream, report readiness, and
/// hold the stream open until cancelled.
fn run_capture(
    device_name: Option<String>,
    target_rate: u32,
    tx: mpsc::Sender<AudioChunk>,
    cancel: CancellationToken,
    ready: oneshot::Sender<Result<()>>,
) {
    let stream = match build_stream(device_name.as_deref(), target_rate, tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        debug!("capture opener went away before stream was ready");
        return;
    }

    while !cancel.is_cancelled() {
        std::thread::sleep(CANCEL_POLL);
    }

    drop(stream);
    info!("audio capture stopped");
}

fn build_stream(
    device_name: Option<&str>,
    target_rate: u32,
    tx: mpsc::Sender<AudioChunk>,
) -> Result<cpal::Stream> {
    let device = select_device(device_name)?;

    let name = device
        .description()
        .map(|d| d.name().to_owned())
        .unwrap_or_else(|_| "<unknown>".into());
    info!("using input device: {name}");

    let default_config = device
        .default_input_config()
        .map_err(|e| ChatError::PermissionDenied(format!("no default input config: {e}")))?;

    let native_rate = default_config.sample_rate();
    let native_channels = default_config.channels();

    let stream_config = StreamConfig {
        channels: native_channels,
        sample_rate: native_rate,
        buffer_size: cpal::BufferSize::Default,
    };

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if native_channels > 1 {
                    to_mono(data, native_channels)
                } else {
                    data.to_vec()
                };
                let samples = if native_rate != target_rate {
                    downsample(&mono, native_rate, target_rate)
                } else {
                    mono
                };

                let chunk = AudioChunk {
                    samples,
                    sample_rate: target_rate,
                    captured_at: Instant::now(),
                };
                // Never block the audio thread.
                if tx.try_send(chunk).is_err() {
                    debug!("audio channel full, dropping chunk");
                }
            },
            move |err| {
                error!("audio input stream error: {err}");
            },
            None,
        )
        .map_err(|e| ChatError::PermissionDenied(format!("failed to build input stream: {e}")))?;

    stream
        .play()
        .map_err(|e| ChatError::PermissionDenied(format!("failed to start input stream: {e}")))?;

    info!(
        "audio capture started: native {}Hz/{}ch -> target {}Hz",
        native_rate, native_channels, target_rate
    );
    Ok(stream)
}
