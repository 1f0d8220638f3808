//! Voice parameters shared by synthesis, caching and playback.

use serde::Serialize;

/// Slowest accepted speaking rate.
pub const MIN_RATE: f32 = 0.5;

/// Fastest accepted speaking rate.
pub const MAX_RATE: f32 = 1.5;

/// Clamp a speaking rate into the accepted range (NaN falls back to 1.0).
pub fn clamp_rate(rate: f32) -> f32 {
    if rate.is_nan() { 1.0 } else { rate.clamp(MIN_RATE, MAX_RATE) }
}

/// Voice and speed a segment is synthesized with.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceParams {
    pub voice_id: String,
    pub rate: f32,
}

impl VoiceParams {
    /// Create voice parameters, clamping the rate.
    pub fn new(voice_id: impl Into<String>, rate: f32) -> Self {
        Self { voice_id: voice_id.into(), rate: clamp_rate(rate) }
    }

    /// Rate as the signed percentage the synthesis service expects (1.25 -> 25, 0.5 -> -50).
    pub fn rate_percent(&self) -> i32 {
        (((self.rate - 1.0) * 100.0).round() as i32).clamp(-50, 100)
    }
}
