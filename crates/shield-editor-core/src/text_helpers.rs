//! Text analysis helpers.
//!
//! Word classification, boundary-aware literal search, selection
//! tokenization and label completion. All offsets are in chars, not bytes.

use std::ops::Range;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

/// Chars on either side of a selection scanned when expanding it to tokens.
pub const TOKEN_CONTEXT_WINDOW: usize = 64;

/// PII types offered for completion when labelling a mask modifier.
pub const PREDEFINED_LABELS: &[&str] = &[
    "ADDRESS",
    "BANK_ACCOUNT_NUMBER",
    "ID_NUMBER",
    "HEALTH_DATA",
    "LOCATION",
    "NUMBER",
    "TAX_NUMBER",
    "CREDIT_CARD",
    "DATE",
    "SIGNATURE",
    "EMAIL",
    "IBAN",
    "HEALTH_ID",
    "IPv4v6",
    "PHONENUMBER",
    "LICENSE_PLATE",
    "CURRENCY",
    "ORGANISATION",
    "PASSPORT",
    "PERSON",
    "SSN",
];

/// Label used when the user commits a mask without typing one.
pub const DEFAULT_MASK_LABEL: &str = "CUSTOM";

/// A word-like token: word chars, optionally joined by inner punctuation
/// so that emails, hyphenated names and dotted numbers stay whole.
static WORD_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\w+(?:[.@'+\-]\w+)*").expect("word token pattern is valid")
});

/// Whether `c` counts as part of a word.
pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Find every case-insensitive occurrence of `needle` in `haystack` that does
/// not extend a word on either side.
///
/// A match starting with a word char must not follow a word char, and a match
/// ending with a word char must not precede one. Returned ranges are char
/// offsets into `haystack`, in order and non-overlapping.
pub fn find_bounded_matches(haystack: &str, needle: &str) -> Vec<Range<usize>> {
    let mut matches = Vec::new();
    if needle.is_empty() || haystack.is_empty() {
        return matches;
    }

    let re = match RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
    {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(error = %e, "could not build literal matcher");
            return matches;
        }
    };

    let byte_to_char = CharIndex::new(haystack);
    let mut search_from = 0;
    while search_from <= haystack.len() {
        let Some(m) = re.find_at(haystack, search_from) else {
            break;
        };
        if m.start() == m.end() {
            break;
        }

        let first = m.as_str().chars().next();
        let last = m.as_str().chars().next_back();
        let before = haystack[..m.start()].chars().next_back();
        let after = haystack[m.end()..].chars().next();

        let extends_left = matches!((before, first), (Some(b), Some(f)) if is_word_char(b) && is_word_char(f));
        let extends_right = matches!((last, after), (Some(l), Some(a)) if is_word_char(l) && is_word_char(a));

        if extends_left || extends_right {
            // Retry from the next char so overlapping candidates are not lost.
            search_from = m.start() + first.map(char::len_utf8).unwrap_or(1);
        } else {
            matches.push(byte_to_char.get(m.start())..byte_to_char.get(m.end()));
            search_from = m.end();
        }
    }

    matches
}

/// A selection expanded to the whole tokens it touches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenizedSpan {
    /// Char range in the text the selection was made in.
    pub range: Range<usize>,
    pub text: String,
}

/// Expand `selection` (char offsets into `text`) to the whole word-like
/// tokens it touches.
///
/// Only a window of [`TOKEN_CONTEXT_WINDOW`] chars around the selection is
/// scanned. Returns `None` when the selection touches no token at all
/// (e.g. pure whitespace or punctuation).
pub fn tokenize_selection(text: &str, selection: Range<usize>) -> Option<TokenizedSpan> {
    if selection.start >= selection.end {
        return None;
    }

    let chars: Vec<char> = text.chars().collect();
    let sel_end = selection.end.min(chars.len());
    let sel_start = selection.start.min(sel_end);
    if sel_start == sel_end {
        return None;
    }

    let window_start = sel_start.saturating_sub(TOKEN_CONTEXT_WINDOW);
    let window_end = (sel_end + TOKEN_CONTEXT_WINDOW).min(chars.len());
    let window: String = chars[window_start..window_end].iter().collect();
    let index = CharIndex::new(&window);

    let mut touched: Option<Range<usize>> = None;
    for m in WORD_TOKEN.find_iter(&window) {
        let start = window_start + index.get(m.start());
        let end = window_start + index.get(m.end());
        if start < sel_end && end > sel_start {
            touched = Some(match touched {
                Some(r) => r.start.min(start)..r.end.max(end),
                None => start..end,
            });
        }
    }

    touched.map(|range| TokenizedSpan {
        text: chars[range.clone()].iter().collect(),
        range,
    })
}

/// Best completion for a partially typed label.
///
/// Prefers a prefix match over a substring match; comparison is
/// case-insensitive against uppercase labels.
pub fn find_best_label_match<'a>(input: &str, labels: &[&'a str]) -> Option<&'a str> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    let upper = input.to_uppercase();

    labels
        .iter()
        .find(|label| label.to_uppercase().starts_with(&upper))
        .or_else(|| labels.iter().find(|label| label.to_uppercase().contains(&upper)))
        .copied()
}

/// Byte offset to char offset lookup for one string.
struct CharIndex {
    byte_starts: Vec<usize>,
}

impl CharIndex {
    fn new(s: &str) -> Self {
        let mut byte_starts: Vec<usize> = s.char_indices().map(|(b, _)| b).collect();
        byte_starts.push(s.len());
        Self { byte_starts }
    }

    /// Char offset of a byte offset on a char boundary.
    fn get(&self, byte: usize) -> usize {
        self.byte_starts
            .binary_search(&byte)
            .unwrap_or_else(|insert_at| insert_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_word_char() {
        assert!(is_word_char('a'));
        assert!(is_word_char('Z'));
        assert!(is_word_char('7'));
        assert!(is_word_char('_'));
        assert!(is_word_char('é'));
        assert!(!is_word_char(' '));
        assert!(!is_word_char('@'));
        assert!(!is_word_char('.'));
    }

    #[test]
    fn test_find_bounded_matches_case_insensitive() {
        let text = "John met JOHN and john.";
        assert_eq!(find_bounded_matches(text, "john"), vec![0..4, 9..13, 18..22]);
    }

    #[test]
    fn test_find_bounded_matches_respects_word_boundaries() {
        let text = "Johnson and John";
        assert_eq!(find_bounded_matches(text, "john"), vec![12..16]);

        let text = "ann anna hannah ann";
        assert_eq!(find_bounded_matches(text, "ann"), vec![0..3, 16..19]);
    }

    #[test]
    fn test_find_bounded_matches_punctuated_needle() {
        let text = "mail john@example.com or xjohn@example.com";
        assert_eq!(
            find_bounded_matches(text, "john@example.com"),
            vec![5..21]
        );
        // Leading punctuation does not need a boundary before it.
        assert_eq!(find_bounded_matches("x@home", "@home"), vec![1..6]);
    }

    #[test]
    fn test_find_bounded_matches_overlapping_candidates() {
        // The first candidate extends a word; the overlapping one does not.
        assert_eq!(find_bounded_matches("xa a a", "a a"), vec![3..6]);
    }

    #[test]
    fn test_find_bounded_matches_multibyte_offsets() {
        let text = "Grüße an Jörg";
        assert_eq!(find_bounded_matches(text, "jörg"), vec![9..13]);
    }

    #[test]
    fn test_find_bounded_matches_empty() {
        assert!(find_bounded_matches("abc", "").is_empty());
        assert!(find_bounded_matches("", "abc").is_empty());
    }

    #[test]
    fn test_tokenize_selection_inside_word() {
        let text = "Contact John Doe at john@x.com";
        // "oe" inside "Doe"
        let span = tokenize_selection(text, 14..16).unwrap();
        assert_eq!(span.text, "Doe");
        assert_eq!(span.range, 13..16);

        let span = tokenize_selection(text, 13..16).unwrap();
        assert_eq!(span.text, "Doe");
    }

    #[test]
    fn test_tokenize_selection_across_words() {
        let text = "Contact John Doe at john@x.com";
        let span = tokenize_selection(text, 10..14).unwrap();
        assert_eq!(span.text, "John Doe");
        assert_eq!(span.range, 8..16);
    }

    #[test]
    fn test_tokenize_selection_keeps_emails_whole() {
        let text = "Contact John Doe at john@x.com";
        let span = tokenize_selection(text, 25..26).unwrap();
        assert_eq!(span.text, "john@x.com");
    }

    #[test]
    fn test_tokenize_selection_no_tokens() {
        assert_eq!(tokenize_selection("a  -  b", 2..5), None);
        assert_eq!(tokenize_selection("abc", 2..2), None);
        assert_eq!(tokenize_selection("abc", 5..9), None);
    }

    #[test]
    fn test_find_best_label_match() {
        assert_eq!(find_best_label_match("per", PREDEFINED_LABELS), Some("PERSON"));
        assert_eq!(find_best_label_match("card", PREDEFINED_LABELS), Some("CREDIT_CARD"));
        assert_eq!(find_best_label_match("ipv4", PREDEFINED_LABELS), Some("IPv4v6"));
        assert_eq!(find_best_label_match("zzz", PREDEFINED_LABELS), None);
        assert_eq!(find_best_label_match("  ", PREDEFINED_LABELS), None);
    }
}
