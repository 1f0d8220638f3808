//! Application configuration and CLI argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::preferences::{Preferences, default_preferences_path};
use super::voices;
use crate::tts::{DEFAULT_CAPACITY, MAX_RATE, MAX_TEXT_LEN, MIN_RATE, VoiceParams};

/// Read-aloud application configuration.
#[derive(Parser, Debug, Clone, Serialize, Deserialize)]
#[command(name = "read-aloud")]
#[command(author, version, about = "Read text aloud sentence by sentence", long_about = None)]
pub struct AppConfig {
    /// Text file to read (reads stdin when omitted)
    pub file: Option<PathBuf>,

    /// List all available voices and exit
    #[arg(long)]
    pub list_voices: bool,

    /// Speech synthesis endpoint (GET with text, voice and rate query parameters)
    #[arg(long, short = 'u', env = "TTS_URL", default_value = "http://localhost:3000/api/tts")]
    pub tts_url: String,

    /// Synthesis voice (defaults to the last voice used, then en-US-JennyNeural)
    #[arg(long, value_parser = parse_voice)]
    pub voice: Option<String>,

    /// Speaking rate multiplier between 0.5 and 1.5 (defaults to the last rate used, then 1.0)
    #[arg(long, short = 'r', value_parser = parse_rate)]
    pub rate: Option<f32>,

    /// Sentence index to start from (e.g. a restored reading position)
    #[arg(long, short = 's', default_value = "0")]
    pub start_sentence: usize,

    /// Number of sentences synthesized ahead of the one playing
    #[arg(long, default_value = "2")]
    pub prefetch_window: usize,

    /// Maximum number of synthesized sentences kept in memory
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub cache_capacity: usize,

    /// Longest sentence (in UTF-16 code units) sent to the synthesis service
    #[arg(long, default_value_t = MAX_TEXT_LEN)]
    pub max_text_len: usize,

    /// Timeout for a single synthesis request, in seconds
    #[arg(long, default_value = "30")]
    pub request_timeout_secs: u64,

    /// File remembering the last voice and rate
    #[arg(long, env = "READ_ALOUD_PREFERENCES", default_value_os_t = default_preferences_path())]
    pub preferences: PathBuf,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

impl AppConfig {
    /// Parse configuration from command line arguments.
    pub fn from_args() -> Self {
        let mut config = Self::parse();

        if config.list_voices {
            voices::print_voices();
            std::process::exit(0);
        }

        config.apply_preferences(&Preferences::load(&config.preferences));
        config
    }

    /// Fill voice and rate from stored preferences unless given explicitly.
    pub fn apply_preferences(&mut self, prefs: &Preferences) {
        if self.voice.is_none() {
            self.voice = Some(prefs.voice.clone());
        }
        if self.rate.is_none() {
            self.rate = Some(prefs.rate);
        }
    }

    /// Voice parameters the player starts with.
    pub fn voice_params(&self) -> VoiceParams {
        VoiceParams::new(self.voice.as_deref().unwrap_or(voices::DEFAULT_VOICE), self.rate.unwrap_or(1.0))
    }

    /// Per-request timeout for the synthesis client.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref file) = self.file
            && !file.exists()
        {
            anyhow::bail!("Text file does not exist: {}", file.display());
        }

        if !self.tts_url.starts_with("http://") && !self.tts_url.starts_with("https://") {
            anyhow::bail!("TTS URL must start with http:// or https://: {}", self.tts_url);
        }

        if self.max_text_len == 0 {
            anyhow::bail!("Maximum text length must be positive");
        }

        if self.cache_capacity == 0 {
            anyhow::bail!("Cache capacity must be at least 1");
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be positive");
        }

        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        let params = self.voice_params();
        info!("Configuration:");
        match self.file {
            Some(ref file) => info!("  Text file: {}", file.display()),
            None => info!("  Text file: <stdin>"),
        }
        info!("  TTS URL: {}", self.tts_url);
        info!("  Voice: {}", params.voice_id);
        info!("  Rate: {}x", params.rate);
        info!("  Start sentence: {}", self.start_sentence);
        info!("  Prefetch window: {}", self.prefetch_window);
        info!("  Cache capacity: {}", self.cache_capacity);
        info!("  Max text length: {}", self.max_text_len);
        info!("  Request timeout: {}s", self.request_timeout_secs);
    }
}

/// Parse and validate a voice id against the allow-list.
fn parse_voice(s: &str) -> Result<String, String> {
    if voices::is_supported(s) {
        Ok(s.to_string())
    } else {
        let known: Vec<&str> = voices::voice_ids().collect();
        Err(format!("unsupported voice '{}', expected one of: {}", s, known.join(", ")))
    }
}

/// Parse and validate a speaking rate (0.5-1.5).
fn parse_rate(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|_| format!("'{}' is not a valid float", s))?;
    if (MIN_RATE..=MAX_RATE).contains(&value) {
        Ok(value)
    } else {
        Err(format!("rate must be between {} and {}, got {}", MIN_RATE, MAX_RATE, value))
    }
}
