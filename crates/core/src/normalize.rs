//! Cleanup of raw extracted text before splitting.
//!
//! Line-wraps inside a sentence are merged only when neither side of the break is
//! a CJK ideograph; breaks between ideographs are left alone.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Remove every ASCII space. Only sensible for corpora written without word spacing.
    pub strip_spaces: bool,
    /// Enumeration glyphs removed from the text.
    pub bullets: Vec<char>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            strip_spaces: true,
            bullets: vec!['•'],
        }
    }
}

fn han_character() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\p{Han}$").ok()).as_ref()
}

/// Turns every `\n` into a space when both neighbours are present, are not line breaks
/// and are not Han ideographs. Each break is judged against the original text.
fn merge_wrapped_lines(text: &str) -> String {
    let Some(han) = han_character() else {
        return text.to_string();
    };
    let joins = |ch: char| {
        let mut buffer = [0u8; 4];
        ch != '\n' && !han.is_match(ch.encode_utf8(&mut buffer))
    };

    let chars: Vec<char> = text.chars().collect();
    chars
        .iter()
        .enumerate()
        .map(|(position, &ch)| {
            let wrapped = ch == '\n'
                && position > 0
                && joins(chars[position - 1])
                && chars.get(position + 1).is_some_and(|&next| joins(next));
            if wrapped {
                ' '
            } else {
                ch
            }
        })
        .collect()
}

pub fn normalize(text: &str, config: &NormalizerConfig) -> String {
    let merged = merge_wrapped_lines(text);

    let mut cleaned: String = merged
        .chars()
        .filter(|ch| !config.bullets.contains(ch))
        .filter(|ch| !(config.strip_spaces && *ch == ' '))
        .collect();

    cleaned = cleaned.replace("\n\n", "\n");
    cleaned
}
