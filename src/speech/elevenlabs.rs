//! ElevenLabs text-to-speech and speech-to-text adapter.
//!
//! - TTS: `POST /v1/text-to-speech/{voice_id}` with a JSON body; returns MP3.
//! - STT: `POST /v1/speech-to-text` with a multipart form; returns `{text}`.
//!
//! Both authenticate with the `xi-api-key` header.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, error};

use super::{SpeechToText, TextToSpeech};
use crate::audio::EncodedAudio;
use crate::config::SpeechServiceConfig;
use crate::error::{ChatError, Result};

/// Client for the ElevenLabs speech endpoints.
pub struct ElevenLabsClient {
    api_key: String,
    base_url: String,
    voice_id: String,
    tts_model_id: String,
    stt_model_id: String,
    stability: f32,
    similarity_boost: f32,
    client: reqwest::Client,
}

impl std::fmt::Debug for ElevenLabsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsClient")
            .field("base_url", &self.base_url)
            .field("voice_id", &self.voice_id)
            .field("tts_model_id", &self.tts_model_id)
            .field("stt_model_id", &self.stt_model_id)
            .finish()
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: Option<String>,
}

impl ElevenLabsClient {
    /// Create a client from config.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] if no API key is configured.
    pub fn new(config: &SpeechServiceConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ChatError::Config("speech service API key is not set".into()))?;
        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            voice_id: config.voice_id.clone(),
            tts_model_id: config.tts_model_id.clone(),
            stt_model_id: config.stt_model_id.clone(),
            stability: config.stability,
            similarity_boost: config.similarity_boost,
            client: reqwest::Client::new(),
        })
    }

    /// Build the JSON body for a synthesis request.
    pub fn synthesis_body(&self, text: &str) -> serde_json::Value {
        serde_json::json!({
            "text": text,
            "model_id": self.tts_model_id,
            "voice_settings": {
                "stability": self.stability,
                "similarity_boost": self.similarity_boost,
            },
        })
    }

    async fn failure(response: reqwest::Response, what: &str) -> ChatError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(status = status.as_u16(), %body, "{what} request rejected");
        ChatError::Network(format!("{what} failed with HTTP {}: {body}", status.as_u16()))
    }
}

#[async_trait]
impl TextToSpeech for ElevenLabsClient {
    async fn synthesize(&self, text: &str) -> Result<EncodedAudio> {
        let url = format!("{}/v1/text-to-speech/{}", self.base_url, self.voice_id);
        let response = self
            .client
            .post(url)
            .header("xi-api-key", &self.api_key)
            .json(&self.synthesis_body(text))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response, "text-to-speech").await);
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_owned())
            .filter(|v| v.starts_with("audio/"))
            .unwrap_or_else(|| "audio/mpeg".into());
        let bytes = response.bytes().await?;
        debug!(bytes = bytes.len(), %mime_type, "synthesis complete");
        Ok(EncodedAudio::new(bytes, mime_type))
    }
}

#[async_trait]
impl SpeechToText for ElevenLabsClient {
    async fn transcribe(&self, audio: &EncodedAudio) -> Result<String> {
        let file = Part::bytes(audio.bytes.to_vec())
            .file_name(audio.file_name())
            .mime_str(&audio.mime_type)
            .map_err(|e| ChatError::Audio(format!("invalid audio MIME type: {e}")))?;
        let form = Form::new()
            .part("file", file)
            .text("model_id", self.stt_model_id.clone());

        let response = self
            .client
            .post(format!("{}/v1/speech-to-text", self.base_url))
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure(response, "speech-to-text").await);
        }

        let parsed: TranscriptionResponse = response.json().await?;
        let text = parsed.text.unwrap_or_default();
        debug!(chars = text.len(), "transcription complete");
        Ok(text)
    }
}
