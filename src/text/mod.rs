//! Text segmentation for sentence-by-sentence playback.
//!
//! Splits article text into paragraphs and sentences with stable indices.

mod segmenter;

pub use segmenter::{Segment, paragraph_count, segment, split_paragraphs, split_sentences};
