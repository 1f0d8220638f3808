//! Client for the remote speech synthesis service.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::error::SynthesisError;
use super::params::VoiceParams;
use crate::config::{AppConfig, voices};

/// Longest text accepted by the synthesis service, in UTF-16 code units.
pub const MAX_TEXT_LEN: usize = 2000;

/// Anything that can turn one segment of text into audio bytes.
///
/// Implementations make a single attempt per call, abort promptly when
/// `cancel` fires and never retry.
#[async_trait]
pub trait Synthesize: Send + Sync {
    async fn synthesize(&self, text: &str, params: &VoiceParams, cancel: &CancellationToken) -> Result<Bytes, SynthesisError>;
}

/// HTTP synthesis client (GET `?text=..&voice=..&rate=..`, returns MP3).
pub struct Synthesizer {
    client: reqwest::Client, // Pooled HTTP client
    endpoint: String,        // Service URL without query
    max_text_len: usize,     // Local length guard
}

impl Synthesizer {
    /// Create a new synthesis client.
    ///
    /// # Arguments
    /// * `config` - Application configuration
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AppConfig) -> Result<Self> {
        info!("Using speech synthesis service at {}", config.tts_url);
        Self::with_endpoint(&config.tts_url, config.max_text_len, config.request_timeout())
    }

    /// Create a client for an explicit endpoint.
    pub fn with_endpoint(endpoint: &str, max_text_len: usize, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build().context("Failed to create HTTP client")?;
        Ok(Self { client, endpoint: endpoint.trim_end_matches('?').to_string(), max_text_len })
    }

    /// Build the request URL for one segment.
    pub fn request_url(&self, text: &str, params: &VoiceParams) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!(
            "{}{}text={}&voice={}&rate={}",
            self.endpoint,
            separator,
            urlencoding::encode(text),
            urlencoding::encode(&params.voice_id),
            params.rate_percent()
        )
    }

    /// Reject requests the service would refuse anyway.
    fn check(&self, text: &str, params: &VoiceParams) -> Result<(), SynthesisError> {
        if text.trim().is_empty() {
            return Err(SynthesisError::EmptyText);
        }
        // The service measures length in UTF-16 code units
        let len = text.encode_utf16().count();
        if len > self.max_text_len {
            return Err(SynthesisError::TextTooLong { len, max: self.max_text_len });
        }
        if !voices::is_supported(&params.voice_id) {
            return Err(SynthesisError::UnsupportedVoice(params.voice_id.clone()));
        }
        Ok(())
    }

    async fn fetch(&self, url: &str) -> Result<Bytes, SynthesisError> {
        let response = self.client.get(url).send().await.map_err(|e| SynthesisError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SynthesisError::Upstream { status: status.as_u16() });
        }

        let audio = response.bytes().await.map_err(|e| SynthesisError::Transport(e.to_string()))?;
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }
        Ok(audio)
    }
}

#[async_trait]
impl Synthesize for Synthesizer {
    async fn synthesize(&self, text: &str, params: &VoiceParams, cancel: &CancellationToken) -> Result<Bytes, SynthesisError> {
        if cancel.is_cancelled() {
            return Err(SynthesisError::Cancelled);
        }
        self.check(text, params)?;

        debug!("Synthesizing \"{}\" with {} at {}%", text, params.voice_id, params.rate_percent());

        let url = self.request_url(text, params);

        // Dropping the request future on cancel closes the connection
        let audio = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SynthesisError::Cancelled),
            result = self.fetch(&url) => result?,
        };

        debug!("🎵 Received {} bytes of audio", audio.len());
        Ok(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Nothing listens here; every test must fail before connecting.
    fn client() -> Synthesizer {
        Synthesizer::with_endpoint("http://127.0.0.1:9/api/tts", 20, Duration::from_secs(1)).unwrap()
    }

    fn jenny(rate: f32) -> VoiceParams {
        VoiceParams::new(voices::DEFAULT_VOICE, rate)
    }

    #[test]
    fn test_request_url() {
        let url = client().request_url("Hi there & bye?", &jenny(1.25));
        assert_eq!(url, "http://127.0.0.1:9/api/tts?text=Hi%20there%20%26%20bye%3F&voice=en-US-JennyNeural&rate=25");
    }

    #[test]
    fn test_request_url_keeps_existing_query() {
        let synth = Synthesizer::with_endpoint("http://host/tts?key=abc", 20, Duration::from_secs(1)).unwrap();
        assert!(synth.request_url("a", &jenny(0.5)).starts_with("http://host/tts?key=abc&text=a&"));
        assert!(synth.request_url("a", &jenny(0.5)).ends_with("&rate=-50"));
    }

    #[tokio::test]
    async fn test_rejects_long_text_before_request() {
        let result = client().synthesize(&"x".repeat(21), &jenny(1.0), &CancellationToken::new()).await;
        assert_eq!(result, Err(SynthesisError::TextTooLong { len: 21, max: 20 }));
    }

    #[tokio::test]
    async fn test_length_counts_utf16_units() {
        // 11 emoji are 11 chars but 22 UTF-16 units
        let result = client().synthesize(&"😀".repeat(11), &jenny(1.0), &CancellationToken::new()).await;
        assert_eq!(result, Err(SynthesisError::TextTooLong { len: 22, max: 20 }));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport_error() {
        let result = client().synthesize("Hello.", &jenny(1.0), &CancellationToken::new()).await;
        assert!(matches!(result, Err(SynthesisError::Transport(_))), "got {result:?}");
    }

    #[tokio::test]
    async fn test_rejects_unknown_voice_and_empty_text() {
        let cancel = CancellationToken::new();
        let result = client().synthesize("Hello.", &VoiceParams::new("af_bella", 1.0), &cancel).await;
        assert_eq!(result, Err(SynthesisError::UnsupportedVoice("af_bella".into())));
        let result = client().synthesize("   ", &jenny(1.0), &cancel).await;
        assert_eq!(result, Err(SynthesisError::EmptyText));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client().synthesize("Hello.", &jenny(1.0), &cancel).await;
        assert!(result.unwrap_err().is_cancelled());
    }
}
