//! Playback state, status snapshots and host notifications.

use std::fmt;

use serde::Serialize;

use crate::tts::VoiceParams;

/// Where the player is in its lifecycle. The index is the segment involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "index", rename_all = "lowercase")]
pub enum PlaybackState {
    Idle,
    Loading(usize),
    Playing(usize),
    Paused(usize),
}

impl PlaybackState {
    /// Loading or playing: transport moves restart playback at the new cursor.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Loading(_) | Self::Playing(_))
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Loading(i) => write!(f, "loading sentence {}", i + 1),
            Self::Playing(i) => write!(f, "playing sentence {}", i + 1),
            Self::Paused(i) => write!(f, "paused at sentence {}", i + 1),
        }
    }
}

/// Change reported to the host as it happens.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Notification {
    SentenceChanged(usize),
    ParagraphChanged(usize),
    StateChanged(PlaybackState),
}

/// Everything the host needs to render the player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    pub cursor: usize,
    pub paragraph: usize,
    pub total_sentences: usize,
    pub total_paragraphs: usize,
    pub params: VoiceParams,
    pub last_error: Option<String>, // Set when the active sentence could not be played
}

impl PlaybackStatus {
    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.state, PlaybackState::Loading(_))
    }

    /// Human-readable position, e.g. "Sentence 3 of 10 | Paragraph 1 of 2".
    pub fn progress_label(&self) -> String {
        if self.total_sentences == 0 {
            return "No text to read".to_string();
        }
        format!(
            "Sentence {} of {} | Paragraph {} of {}",
            self.cursor + 1,
            self.total_sentences,
            self.paragraph + 1,
            self.total_paragraphs
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(total_sentences: usize) -> PlaybackStatus {
        PlaybackStatus {
            state: PlaybackState::Idle,
            cursor: 2,
            paragraph: 1,
            total_sentences,
            total_paragraphs: 2,
            params: VoiceParams::new("en-US-JennyNeural", 1.0),
            last_error: None,
        }
    }

    #[test]
    fn test_progress_label() {
        assert_eq!(status(3).progress_label(), "Sentence 3 of 3 | Paragraph 2 of 2");
        assert_eq!(status(0).progress_label(), "No text to read");
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(serde_json::to_string(&PlaybackState::Playing(4)).unwrap(), r#"{"state":"playing","index":4}"#);
        assert_eq!(serde_json::to_string(&PlaybackState::Idle).unwrap(), r#"{"state":"idle"}"#);
    }
}
