//! Audio output for synthesized sentences.
//!
//! Clips arrive as MP3 from the synthesis service, are decoded with symphonia,
//! resampled to the device rate with rubato and played through cpal.

pub mod decode;
mod output;
pub mod resampler;
pub mod util;

pub use output::{ActivePlayback, AudioOutput, DeviceOutput};
