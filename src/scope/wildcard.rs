//! Glob-style wildcard matching, the primitive behind all scope patterns.

/// The wildcard character, expanding to zero or more non-whitespace characters.
pub const WILDCARD: char = '*';

/// Performs a wildcard match of `text` against `pattern`.
///
/// The semantics are deliberately exact and minimal, not a full glob or regex
/// engine:
///
/// - a pattern of `"*"` matches anything; an empty pattern matches only empty
///   text
/// - the pattern is split on `*` into literal "cards"
/// - if the pattern does not start with `*`, the first card must occur at the
///   very start of the text
/// - if the pattern does not end with `*`, the *last occurrence* of the last
///   card must sit at the very end of the text
/// - every card must then occur in order, each search resuming immediately
///   after the previous match
///
/// The match is linear and greedy: there is no backtracking across ambiguous
/// card placements, and the two endpoint checks may overlap the occurrences
/// consumed by the in-order scan. Callers relying on this matcher must rely on
/// exactly these semantics, not on "any valid glob interpretation".
///
/// # Examples
///
/// ```rust
/// use classweave::scope::wildcard_match;
///
/// assert!(wildcard_match("java.lang.String", "*.String"));
/// assert!(wildcard_match("java.lang.String", "java.*"));
/// assert!(wildcard_match("clinit", "*init"));
/// assert!(!wildcard_match("main", "init"));
/// ```
#[must_use]
pub fn wildcard_match(text: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }

    if pattern.is_empty() {
        return text.is_empty();
    }

    // Split into cards, dropping trailing empty cards so that "a*" yields
    // exactly ["a"].
    let mut cards: Vec<&str> = pattern.split(WILDCARD).collect();
    while cards.last().is_some_and(|card| card.is_empty()) {
        cards.pop();
    }

    if !pattern.starts_with(WILDCARD) {
        // First card must be at the beginning.
        if let Some(first) = cards.first() {
            if text.find(first) != Some(0) {
                return false;
            }
        }
    }

    if !pattern.ends_with(WILDCARD) {
        // Last card must be at the end.
        if let Some(last) = cards.last() {
            match text.rfind(last) {
                Some(idx) if idx == text.len() - last.len() => {}
                _ => return false,
            }
        }
    }

    // Consume the cards in order, moving right through the text.
    let mut rest = text;
    for card in cards {
        match rest.find(card) {
            Some(idx) => rest = &rest[idx + card.len()..],
            None => return false,
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_matches_everything() {
        assert!(wildcard_match("", "*"));
        assert!(wildcard_match("anything at all", "*"));
    }

    #[test]
    fn test_empty_pattern() {
        assert!(wildcard_match("", ""));
        assert!(!wildcard_match("x", ""));
    }

    #[test]
    fn test_literal_pattern() {
        assert!(wildcard_match("main", "main"));
        assert!(!wildcard_match("main", "init"));
    }

    #[test]
    fn test_prefix_and_suffix() {
        assert!(wildcard_match("java.lang.String", "java.*"));
        assert!(wildcard_match("java.lang.String", "*String"));
        assert!(wildcard_match("my.package.BigString", "*String"));
        assert!(!wildcard_match("StringBuilder", "*String"));
    }

    #[test]
    fn test_anchored_first_card() {
        assert!(!wildcard_match("xjava.lang", "java*"));
        assert!(wildcard_match("java.lang", "java*"));
    }

    #[test]
    fn test_cards_in_order() {
        assert!(wildcard_match("my.pkg.FastMath", "my.pkg.*Math"));
        assert!(wildcard_match("my.pkg.deep.Math", "my.pkg.*Math"));
        assert!(!wildcard_match("my.Math.pkg", "my.pkg.*Math"));
    }

    #[test]
    fn test_inner_wildcards() {
        assert!(wildcard_match("java.util.String", "java.*.String"));
        assert!(!wildcard_match("javaString", "java.*.String"));
    }
}
