//! Paragraph and sentence splitting.
//!
//! Segmentation is total and deterministic: the same text always produces the
//! same segments, so a stored sentence index stays valid across reloads.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Blank line (two newlines with optional whitespace between them).
static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n").expect("valid paragraph regex"));

/// One sentence-sized unit of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub index: usize,           // Position in the segment list
    pub text: String,           // Trimmed sentence text
    pub paragraph_index: usize, // Owning paragraph
}

/// Split text into ordered segments.
///
/// # Arguments
/// * `text` - Raw article text
///
/// # Returns
/// Segments numbered from 0, each tagged with its paragraph index.
pub fn segment(text: &str) -> Vec<Segment> {
    split_paragraphs(text)
        .iter()
        .enumerate()
        .flat_map(|(paragraph_index, paragraph)| split_sentences(paragraph).into_iter().map(move |sentence| (paragraph_index, sentence)))
        .enumerate()
        .map(|(index, (paragraph_index, text))| Segment { index, text, paragraph_index })
        .collect()
}

/// Split text into trimmed, non-empty paragraphs on blank lines.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    PARAGRAPH_BREAK.split(text).map(str::trim).filter(|p| !p.is_empty()).map(str::to_string).collect()
}

/// Split a paragraph into sentences.
///
/// A sentence ends after a run of `.`, `!` or `?` (plus any closing quotes or
/// brackets) that is followed by whitespace or the end of the paragraph.
/// Text after the last terminator is kept as a final sentence.
pub fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }

        // Swallow "?!", "..." and closing quotes into the same boundary
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if is_terminal(next) || is_closing(next) {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }

        if chars.peek().is_none_or(|&(_, next)| next.is_whitespace()) {
            push_trimmed(&mut sentences, &paragraph[start..end]);
            start = end;
        }
    }

    push_trimmed(&mut sentences, &paragraph[start..]);
    sentences
}

/// Number of distinct paragraphs covered by a segment list.
pub fn paragraph_count(segments: &[Segment]) -> usize {
    segments.last().map_or(0, |s| s.paragraph_index + 1)
}

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '\u{201D}' | '\u{2019}')
}

fn push_trimmed(sentences: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}
