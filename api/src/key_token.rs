//! The vocabulary of key tokens a combo can be built from.
//!
//! A token is either a single letter or digit, or one of the named keys in
//! [`SPECIAL_KEYS`]. Combos are stored lowercased (single uppercase letters
//! excepted), so lookups here are case-insensitive and [`display_form`] maps
//! a stored token back to the spelling shown in the key picker.

use itertools::Itertools;

/// Maximum number of tokens in a single combo.
pub const MAX_COMBO_LEN: usize = 5;

/// Named keys, in the spelling used by the key picker.
pub const SPECIAL_KEYS: &[&str] = &[
    // modifiers
    "Shift", "Ctrl", "Alt", "Win", "Cmd",
    // actions and navigation
    "Enter", "Space", "Tab", "Escape", "Backspace", "Delete", "Insert", "Home", "End", "PageUp",
    "PageDown", "up", "down", "left", "right",
    // locks and system keys
    "CapsLock", "NumLock", "ScrollLock", "PrintScreen",
    // punctuation
    ";", "=", ",", "-", ".", "/", "`", "[", "\\", "]", "'", "!", "@", "#", "$", "%", "^", "&",
    "*", "(", ")", "_", "+", "{", "}", "|", ":", "\"", "<", ">", "?", "~",
];

/// Every token the key picker offers, sorted case-insensitively.
pub fn all() -> Vec<String> {
    let letters = ('A'..='Z').chain('a'..='z');
    let digits = '0'..='9';

    letters
        .chain(digits)
        .map(String::from)
        .chain(SPECIAL_KEYS.iter().map(|key| (*key).to_owned()))
        .sorted_by(|a, b| {
            a.to_lowercase()
                .cmp(&b.to_lowercase())
                .then_with(|| a.cmp(b))
        })
        .collect()
}

/// Tokens containing `term`, ignoring case.
pub fn search(term: &str) -> Vec<String> {
    let term = term.to_lowercase();

    all()
        .into_iter()
        .filter(|token| token.to_lowercase().contains(&term))
        .collect()
}

/// Whether `token` belongs to the vocabulary, ignoring case.
pub fn is_known(token: &str) -> bool {
    let mut chars = token.chars();

    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphanumeric() => true,
        _ => SPECIAL_KEYS.iter().any(|key| key.eq_ignore_ascii_case(token)),
    }
}

/// The picker spelling of a stored token, e.g. `pageup` becomes `PageUp`.
///
/// Tokens that are not named keys are returned as is.
pub fn display_form(token: &str) -> &str {
    SPECIAL_KEYS
        .iter()
        .find(|key| key.eq_ignore_ascii_case(token))
        .copied()
        .unwrap_or(token)
}

/// Up to five named keys closest to `token`, best match first.
pub fn suggestions(token: &str) -> Vec<&'static str> {
    use strsim::jaro_winkler;

    let token = token.to_lowercase();

    let mut scored = SPECIAL_KEYS
        .iter()
        .map(|key| {
            (
                (jaro_winkler(&key.to_lowercase(), &token) * 10_000.0) as u64,
                *key,
            )
        })
        .collect::<Vec<_>>();

    scored.sort_by_key(|(score, _)| std::cmp::Reverse(*score));

    scored.into_iter().take(5).map(|(_, key)| key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vocabulary_contains_letters_digits_and_named_keys() {
        let all = all();

        assert_eq!(all.len(), 26 * 2 + 10 + SPECIAL_KEYS.len());
        assert!(all.contains(&"A".to_owned()));
        assert!(all.contains(&"z".to_owned()));
        assert!(all.contains(&"7".to_owned()));
        assert!(all.contains(&"PrintScreen".to_owned()));
    }

    #[test]
    fn lookups_ignore_case() {
        assert!(is_known("shift"));
        assert!(is_known("PAGEUP"));
        assert!(is_known("Q"));
        assert!(is_known(";"));
        assert!(!is_known("hyper"));
        assert!(!is_known(""));
    }

    #[test]
    fn stored_tokens_map_back_to_picker_spelling() {
        assert_eq!(display_form("pageup"), "PageUp");
        assert_eq!(display_form("ctrl"), "Ctrl");
        assert_eq!(display_form("up"), "up");
        assert_eq!(display_form("x"), "x");
    }

    #[test]
    fn search_is_a_case_insensitive_substring_match() {
        let found = search("lock");

        assert_eq!(found, vec!["CapsLock", "NumLock", "ScrollLock"]);
    }

    #[test]
    fn suggestions_rank_the_closest_name_first() {
        assert_eq!(suggestions("escap")[0], "Escape");
        assert_eq!(suggestions("ctl")[0], "Ctrl");
    }
}
