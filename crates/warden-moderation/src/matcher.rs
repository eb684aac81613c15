// SPDX-FileCopyrightText: 2026 Chatwarden Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Evasion-tolerant banned-word matching.
//!
//! Each banned word compiles to a small set of patterns, checked in priority
//! order: exact word-boundary match first, then the evasion variants
//! (letters spaced out, letters dotted out, vowels starred, basic leet).
//! Word shape is validated before compilation; the restricted alphabet rules
//! out every dangerous regex construct, so compilation cannot be attacked
//! from the data-plane.

use regex::Regex;
use tracing::warn;

/// Maximum accepted banned-word length.
const MAX_WORD_LEN: usize = 100;

/// Validates a banned word against the accepted shape:
/// Unicode letters/numbers, space, and `-_'.!?`, 1..=100 chars.
pub fn is_valid_word(word: &str) -> bool {
    let len = word.chars().count();
    if len == 0 || len > MAX_WORD_LEN {
        return false;
    }
    word.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '\'' | '.' | '!' | '?'))
}

/// Compiled patterns for one banned word.
#[derive(Debug)]
struct WordPatterns {
    word: String,
    exact: Regex,
    evasions: Vec<Regex>,
}

/// A compiled matcher over an entity's effective banned-word list.
///
/// Built once per configuration and dropped wholesale on preset refresh or
/// word-list change; there is no partial invalidation.
#[derive(Debug, Default)]
pub struct BannedWordMatcher {
    patterns: Vec<WordPatterns>,
}

impl BannedWordMatcher {
    /// Compiles a matcher from an already lowercased, deduplicated word list.
    /// Words failing [`is_valid_word`] are skipped with a warning.
    pub fn new<'a>(words: impl IntoIterator<Item = &'a str>) -> Self {
        let mut patterns = Vec::new();
        for word in words {
            if !is_valid_word(word) {
                warn!(word, "skipping banned word with invalid shape");
                continue;
            }
            match compile_word(word) {
                Some(compiled) => patterns.push(compiled),
                None => warn!(word, "skipping banned word that failed to compile"),
            }
        }
        Self { patterns }
    }

    /// Returns the first banned word the message hits, exact matches taking
    /// priority over evasion matches. The message is lowercased once here.
    pub fn check(&self, message: &str) -> Option<&str> {
        let lower = message.to_lowercase();
        for p in &self.patterns {
            if p.exact.is_match(&lower) {
                return Some(&p.word);
            }
        }
        for p in &self.patterns {
            if p.evasions.iter().any(|r| r.is_match(&lower)) {
                return Some(&p.word);
            }
        }
        None
    }

    /// Number of compiled words.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no words compiled.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn compile_word(word: &str) -> Option<WordPatterns> {
    let exact = Regex::new(&format!(r"\b{}\b", regex::escape(word))).ok()?;

    let mut evasions = Vec::new();

    // Letters separated by whitespace: "b a d w o r d".
    if let Some(re) = joined_pattern(word, r"\s+") {
        evasions.push(re);
    }
    // Letters separated by dots: "b.a.d.w.o.r.d".
    if let Some(re) = joined_pattern(word, r"\.+") {
        evasions.push(re);
    }
    // Vowels replaced by '*': "b*dw*rd".
    if word.chars().any(is_vowel) {
        let starred: String = word
            .chars()
            .map(|c| {
                if is_vowel(c) {
                    r"\*".to_string()
                } else {
                    regex::escape(&c.to_string())
                }
            })
            .collect();
        if let Ok(re) = Regex::new(&starred) {
            evasions.push(re);
        }
    }
    // Basic leet substitution.
    let leet: String = word
        .chars()
        .map(|c| match c {
            'a' => "[a4]".to_string(),
            'e' => "[e3]".to_string(),
            'i' => "[i1]".to_string(),
            'o' => "[o0]".to_string(),
            's' => "[s5]".to_string(),
            other => regex::escape(&other.to_string()),
        })
        .collect();
    if leet.contains('[')
        && let Ok(re) = Regex::new(&format!(r"\b{leet}\b"))
    {
        evasions.push(re);
    }

    Some(WordPatterns {
        word: word.to_string(),
        exact,
        evasions,
    })
}

/// Word characters joined by a separator pattern, requiring at least one
/// separator so the plain word stays an exact-tier match.
fn joined_pattern(word: &str, sep: &str) -> Option<Regex> {
    let chars: Vec<String> = word
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| regex::escape(&c.to_string()))
        .collect();
    if chars.len() < 2 {
        return None;
    }
    Regex::new(&chars.join(sep)).ok()
}

fn is_vowel(c: char) -> bool {
    matches!(c, 'a' | 'e' | 'i' | 'o' | 'u')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_shape_validation() {
        assert!(is_valid_word("badword"));
        assert!(is_valid_word("two words"));
        assert!(is_valid_word("l33t-ish_word's.!?"));
        assert!(is_valid_word("schlüssel"));
        assert!(!is_valid_word(""));
        assert!(!is_valid_word(&"a".repeat(101)));
        assert!(!is_valid_word("(?=lookahead)"));
        assert!(!is_valid_word(".*"));
        assert!(!is_valid_word("a{1,9}"));
        assert!(!is_valid_word("a+b"));
    }

    #[test]
    fn exact_match_respects_word_boundaries() {
        let m = BannedWordMatcher::new(["bad"]);
        assert_eq!(m.check("this is bad"), Some("bad"));
        assert_eq!(m.check("BAD!"), Some("bad"));
        assert_eq!(m.check("badge is fine"), None);
        assert_eq!(m.check("so bad."), Some("bad"));
    }

    #[test]
    fn spaced_evasion_matches() {
        let m = BannedWordMatcher::new(["badword"]);
        assert_eq!(m.check("this is b a d w o r d indeed"), Some("badword"));
        assert_eq!(m.check("b  a  d  w  o  r  d"), Some("badword"));
    }

    #[test]
    fn dotted_evasion_matches() {
        let m = BannedWordMatcher::new(["badword"]);
        assert_eq!(m.check("b.a.d.w.o.r.d"), Some("badword"));
        assert_eq!(m.check("b..a.d.w.o.r..d"), Some("badword"));
    }

    #[test]
    fn starred_vowel_evasion_matches() {
        let m = BannedWordMatcher::new(["badword"]);
        assert_eq!(m.check("b*dw*rd"), Some("badword"));
    }

    #[test]
    fn leet_evasion_matches() {
        let m = BannedWordMatcher::new(["badword"]);
        assert_eq!(m.check("b4dw0rd"), Some("badword"));
        let m = BannedWordMatcher::new(["seise"]);
        assert_eq!(m.check("s3is3"), Some("seise"));
    }

    #[test]
    fn clean_messages_pass() {
        let m = BannedWordMatcher::new(["badword", "worse"]);
        assert_eq!(m.check("a perfectly fine message"), None);
        assert_eq!(m.check(""), None);
    }

    #[test]
    fn exact_beats_evasion_priority() {
        // Both words present: exact match on "worse" wins over an evasion
        // match on "badword" appearing later in the pattern list.
        let m = BannedWordMatcher::new(["badword", "worse"]);
        assert_eq!(m.check("b a d w o r d and worse"), Some("worse"));
    }

    #[test]
    fn invalid_words_are_skipped_not_fatal() {
        let m = BannedWordMatcher::new(["ok", ".*", ""]);
        assert_eq!(m.len(), 1);
        assert_eq!(m.check("ok then"), Some("ok"));
    }

    #[test]
    fn multi_word_entries_match_exactly() {
        let m = BannedWordMatcher::new(["two words"]);
        assert_eq!(m.check("exactly two words here"), Some("two words"));
        assert_eq!(m.check("two  words"), Some("two words"), "spaced variant");
    }
}
