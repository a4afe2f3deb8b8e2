//! Configuration types for the chat assistant.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ChatError, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    /// Conversation backend settings.
    pub backend: BackendConfig,
    /// Remote speech service (TTS/STT) settings.
    pub speech: SpeechServiceConfig,
    /// End-of-utterance detection settings.
    pub silence: SilenceConfig,
    /// Audio device settings.
    pub audio: AudioConfig,
    /// Chat turn behavior.
    pub chat: ChatConfig,
    /// Thread persistence settings.
    pub store: StoreConfig,
    /// Map panel viewport.
    pub map: MapConfig,
}

/// Conversation backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the run-oriented chat API.
    pub api_url: String,
    /// Assistant (graph) id passed with every run.
    pub assistant_id: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:2024".into(),
            assistant_id: "agent".into(),
        }
    }
}

/// Speech service configuration (ElevenLabs).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechServiceConfig {
    /// API key sent as `xi-api-key`. Voice features are disabled when absent.
    pub api_key: Option<String>,
    /// Base URL of the speech service.
    pub base_url: String,
    /// Voice used for synthesis.
    pub voice_id: String,
    /// Synthesis model.
    pub tts_model_id: String,
    /// Transcription model.
    pub stt_model_id: String,
    /// Voice stability (0.0 - 1.0).
    pub stability: f32,
    /// Voice similarity boost (0.0 - 1.0).
    pub similarity_boost: f32,
}

impl Default for SpeechServiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.elevenlabs.io".into(),
            voice_id: "EXAVITQu4vr4xnSDxMaL".into(),
            tts_model_id: "eleven_flash_v2_5".into(),
            stt_model_id: "scribe_v1".into(),
            stability: 0.8,
            similarity_boost: 0.75,
        }
    }
}

/// Silence detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    /// Mean spectral amplitude (fraction of max, 0.0 - 1.0) below which a
    /// frame counts as silent.
    pub threshold: f32,
    /// Continuous silence in ms that ends the utterance.
    pub duration_ms: u64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            duration_ms: 2000,
        }
    }
}

/// Audio I/O configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz after downsampling.
    pub input_sample_rate: u32,
    /// Input device name (None = system default).
    pub input_device: Option<String>,
    /// Output device name (None = system default).
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            input_device: None,
            output_device: None,
        }
    }
}

/// Chat turn configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Lower bound of the jittered delay before showing a reply.
    pub reply_delay_min_ms: u64,
    /// Upper bound of the jittered delay before showing a reply.
    pub reply_delay_max_ms: u64,
    /// Fixed delay before showing the apology on a failed run.
    pub error_reply_delay_ms: u64,
    /// Resume listening after a spoken reply in voice mode.
    pub auto_resume_listening: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            reply_delay_min_ms: 1000,
            reply_delay_max_ms: 2000,
            error_reply_delay_ms: 1000,
            auto_resume_listening: true,
        }
    }
}

impl ChatConfig {
    /// Config with no artificial reply latency.
    pub fn immediate() -> Self {
        Self {
            reply_delay_min_ms: 0,
            reply_delay_max_ms: 0,
            error_reply_delay_ms: 0,
            ..Self::default()
        }
    }
}

/// Thread persistence configuration (Supabase / PostgREST).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Project URL. Threads are kept in memory only when absent.
    pub supabase_url: Option<String>,
    /// Anon or service key sent as `apikey` and bearer token.
    pub supabase_key: Option<String>,
    /// Table holding thread rows.
    pub table: String,
    /// User id to attribute threads to (stands in for an auth session).
    pub user_id: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_key: None,
            table: "chat_threads".into(),
            user_id: None,
        }
    }
}

/// Map panel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Initial center as `[longitude, latitude]`.
    pub center: [f64; 2],
    /// Initial zoom level.
    pub zoom: f64,
    /// Provider style identifier.
    pub style: String,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            center: [-74.5, 40.0],
            zoom: 9.0,
            style: "streets-v11".into(),
        }
    }
}

const CONFIG_DIR: &str = "wayfarer";
const CONFIG_FILE: &str = "config.toml";

impl AssistantConfig {
    /// Read a config file. Sections or fields it leaves out keep their defaults.
    ///
    /// # Errors
    ///
    /// [`ChatError::Io`] if the file cannot be read, [`ChatError::Config`]
    /// (naming the file) if it is not valid TOML for this layout.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| ChatError::Config(format!("{}: {e}", path.display())))
    }

    /// Resolve the config for a run: the file at `explicit` if given,
    /// otherwise the default file when present, otherwise built-in defaults.
    ///
    /// # Errors
    ///
    /// Fails if the chosen file exists but cannot be read or parsed. A
    /// missing `explicit` path is an error; a missing default file is not.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let path = Self::default_config_path();
                if path.is_file() {
                    Self::from_file(&path)
                } else {
                    debug!(path = %path.display(), "no config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    /// Write the config as TOML, creating parent directories.
    ///
    /// Service keys are not written; they are expected to come from the
    /// environment (see [`AssistantConfig::apply_env`]).
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let mut on_disk = self.clone();
        on_disk.speech.api_key = None;
        on_disk.store.supabase_key = None;

        let content =
            toml::to_string_pretty(&on_disk).map_err(|e| ChatError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `$XDG_CONFIG_HOME/wayfarer/config.toml`, then `~/.config/wayfarer/config.toml`.
    /// With neither variable set, `config.toml` in the working directory.
    pub fn default_config_path() -> PathBuf {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")));
        match base {
            Some(base) => base.join(CONFIG_DIR).join(CONFIG_FILE),
            None => PathBuf::from(CONFIG_FILE),
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    ///
    /// Recognized keys: `WAYFARER_API_URL`, `ELEVENLABS_API_KEY`,
    /// `SUPABASE_URL`, `SUPABASE_ANON_KEY`, `WAYFARER_USER_ID`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("WAYFARER_API_URL") {
            self.backend.api_url = url;
        }
        if let Some(key) = get("ELEVENLABS_API_KEY") {
            self.speech.api_key = Some(key);
        }
        if let Some(url) = get("SUPABASE_URL") {
            self.store.supabase_url = Some(url);
        }
        if let Some(key) = get("SUPABASE_ANON_KEY") {
            self.store.supabase_key = Some(key);
        }
        if let Some(user) = get("WAYFARER_USER_ID") {
            self.store.user_id = Some(user);
        }
    }
}
