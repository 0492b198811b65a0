//! narrate configuration management.

use crate::coordinator::scheduler::DEFAULT_MAX_IN_FLIGHT;
use crate::tts::{DEFAULT_VOICE, RequestStyle};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

const DEFAULT_TTS_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrateConfig {
    /// Base URL of the TTS service (without the /tts path)
    #[serde(default = "default_tts_url")]
    pub tts_url: String,

    /// Calling convention: "json" (POST) or "query" (GET)
    #[serde(default)]
    pub request_style: RequestStyle,

    /// Voice identifier
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Speaking rate (query style)
    #[serde(default = "default_rate")]
    pub rate: String,

    /// Pitch (query style)
    #[serde(default = "default_pitch")]
    pub pitch: String,

    /// Maximum concurrent requests
    #[serde(default = "default_max_jobs")]
    pub max_jobs: usize,

    /// Segment length in characters; 0 narrates whole chapters
    #[serde(default)]
    pub segment_length: usize,

    /// Minimum valid output size in bytes. None uses 10 KiB for chapters
    /// and 1 KiB for segments.
    #[serde(default)]
    pub min_size: Option<u64>,

    /// Delay between request dispatches in milliseconds
    #[serde(default)]
    pub delay_ms: u64,

    /// Per-request timeout in seconds; 0 disables it
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Audio file extension
    #[serde(default = "default_audio_ext")]
    pub audio_ext: String,
}

fn default_tts_url() -> String {
    DEFAULT_TTS_URL.to_string()
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}

fn default_rate() -> String {
    "+0%".to_string()
}

fn default_pitch() -> String {
    "+0Hz".to_string()
}

fn default_max_jobs() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_audio_ext() -> String {
    "mp3".to_string()
}

impl Default for NarrateConfig {
    fn default() -> Self {
        Self {
            tts_url: default_tts_url(),
            request_style: RequestStyle::default(),
            voice: default_voice(),
            rate: default_rate(),
            pitch: default_pitch(),
            max_jobs: default_max_jobs(),
            segment_length: 0,
            min_size: None,
            delay_ms: 0,
            timeout_secs: default_timeout_secs(),
            audio_ext: default_audio_ext(),
        }
    }
}

impl NarrateConfig {
    /// Get the config file path: <config dir>/narrate/config.toml
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("narrate")
            .join("config.toml")
    }

    /// Load config from file, returning default if file doesn't exist
    pub fn load() -> Result<Self> {
        let path = Self::config_path();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save config to file
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
    }
}
