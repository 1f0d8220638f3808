//! Synthesis failure outcome.

use thiserror::Error;

/// Why a segment could not be synthesized.
///
/// Callers treat every variant except [`SynthesisError::Cancelled`] as a
/// plain "synthesis failed"; the variants exist for logging. The type is
/// `Clone` so one in-flight result can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SynthesisError {
    #[error("nothing to synthesize")]
    EmptyText,

    #[error("text too long ({len} chars, max {max})")]
    TextTooLong { len: usize, max: usize },

    #[error("unsupported voice '{0}'")]
    UnsupportedVoice(String),

    #[error("no segment at index {0}")]
    NoSegment(usize),

    #[error("request failed: {0}")]
    Transport(String),

    #[error("synthesis service returned status {status}")]
    Upstream { status: u16 },

    #[error("synthesis service returned no audio")]
    EmptyAudio,

    #[error("synthesis task failed: {0}")]
    Task(String),

    #[error("synthesis cancelled")]
    Cancelled,
}

impl SynthesisError {
    /// Whether this outcome is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
