//! Sentence-by-sentence read-aloud engine.
//!
//! Text is split into sentences and paragraphs, each sentence is synthesized
//! on demand by a remote TTS service, and playback advances one sentence at a
//! time while the next few are prefetched.

pub mod audio;
pub mod config;
pub mod player;
pub mod text;
pub mod tts;

#[cfg(test)]
pub(crate) mod testing;
