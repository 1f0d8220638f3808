//! Speech synthesis: the remote service client and the per-segment audio cache.
//!
//! Audio is synthesized one sentence at a time by an HTTP service and cached
//! by segment index for the current voice and rate.

mod cache;
mod error;
mod params;
mod synthesizer;

pub use cache::{AudioClip, DEFAULT_CAPACITY, SegmentCache};
pub use error::SynthesisError;
pub use params::{MAX_RATE, MIN_RATE, VoiceParams, clamp_rate};
pub use synthesizer::{MAX_TEXT_LEN, Synthesize, Synthesizer};
