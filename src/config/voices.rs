//! Voice allow-list for the speech synthesis service.
//!
//! The service only accepts these neural voices; anything else is rejected
//! locally before a request goes out.

/// Voice used when nothing else is configured.
pub const DEFAULT_VOICE: &str = "en-US-JennyNeural";

/// Display metadata for a synthesis voice.
#[derive(Debug, Clone, Copy)]
pub struct Voice {
    pub label: &'static str,
    pub gender: &'static str,
    pub locale: &'static str,
}

/// All accepted voices, sorted by id for binary search.
const VOICES: &[(&str, Voice)] = &[
    ("en-US-AriaNeural", Voice { label: "Aria", gender: "Female", locale: "en-US" }),
    ("en-US-ChristopherNeural", Voice { label: "Christopher", gender: "Male", locale: "en-US" }),
    ("en-US-GuyNeural", Voice { label: "Guy", gender: "Male", locale: "en-US" }),
    ("en-US-JennyNeural", Voice { label: "Jenny", gender: "Female", locale: "en-US" }),
];

/// Get voice metadata by id.
pub fn get_voice(id: &str) -> Option<&'static Voice> {
    VOICES.binary_search_by_key(&id, |(n, _)| n).ok().map(|idx| &VOICES[idx].1)
}

/// Whether the synthesis service accepts this voice id.
pub fn is_supported(id: &str) -> bool {
    get_voice(id).is_some()
}

/// Ids of every accepted voice.
pub fn voice_ids() -> impl Iterator<Item = &'static str> {
    VOICES.iter().map(|(id, _)| *id)
}

/// Print all available voices.
pub fn print_voices() {
    println!("{:<26} {:<12} {:<8} LOCALE", "VOICE", "NAME", "GENDER");
    println!("{}", "─".repeat(56));
    for (id, voice) in VOICES {
        let marker = if *id == DEFAULT_VOICE { " (default)" } else { "" };
        println!("{:<26} {:<12} {:<8} {}{}", id, voice.label, voice.gender, voice.locale, marker);
    }
    println!();
    println!("Usage:");
    println!("  read-aloud --voice en-US-GuyNeural article.txt");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_voices_sorted_for_binary_search() {
        let ids: Vec<&str> = voice_ids().collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_lookup() {
        assert!(is_supported(DEFAULT_VOICE));
        assert_eq!(get_voice("en-US-GuyNeural").map(|v| v.gender), Some("Male"));
        assert!(!is_supported("af_bella"));
    }
}
