//! Filter helpers shared by the domain repositories

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use regex::Regex;

/// A LIKE-style pattern: `%` matches any run of characters, `_` exactly one
///
/// Matching is case-insensitive and anchored at both ends.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut translated = String::with_capacity(pattern.len() + 8);
        translated.push_str("(?is)^");
        let mut literal = [0u8; 4];
        for c in pattern.chars() {
            match c {
                '%' => translated.push_str(".*"),
                '_' => translated.push('.'),
                other => translated.push_str(&regex::escape(other.encode_utf8(&mut literal))),
            }
        }
        translated.push('$');

        let regex = Regex::new(&translated).map_err(|e| Error::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

/// Case-insensitive substring search over several fields
pub(crate) fn contains_text<'a>(needle: &str, haystacks: impl IntoIterator<Item = &'a str>) -> bool {
    let needle = needle.to_lowercase();
    haystacks
        .into_iter()
        .any(|h| h.to_lowercase().contains(&needle))
}

/// Whether `at` falls inside the optional, inclusive bounds
pub(crate) fn within(
    at: Option<DateTime<Utc>>,
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
) -> bool {
    if after.is_none() && before.is_none() {
        return true;
    }
    let Some(at) = at else {
        return false;
    };
    after.map_or(true, |a| at >= a) && before.map_or(true, |b| at <= b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_wildcards() {
        let pattern = Pattern::new("Login%").unwrap();
        assert!(pattern.is_match("Login works"));
        assert!(pattern.is_match("login"));
        assert!(!pattern.is_match("Logout"));

        let single = Pattern::new("step_1").unwrap();
        assert!(single.is_match("step-1"));
        assert!(!single.is_match("step--1"));
    }

    #[test]
    fn test_wildcards_span_newlines() {
        assert!(Pattern::new("login%done").unwrap().is_match("Login\nthen done"));
        assert!(Pattern::new("a_b").unwrap().is_match("a\nb"));
    }

    #[test]
    fn test_regex_characters_are_literal() {
        let pattern = Pattern::new("a.b (c)").unwrap();
        assert!(pattern.is_match("A.B (C)"));
        assert!(!pattern.is_match("axb (c)"));
    }

    #[test]
    fn test_contains_text() {
        assert!(contains_text("CART", ["Checkout", "adds to cart"]));
        assert!(!contains_text("cart", ["Checkout", ""]));
    }

    #[test]
    fn test_within_bounds() {
        let now = Utc::now();
        let hour = Duration::hours(1);
        assert!(within(Some(now), None, None));
        assert!(within(None, None, None));
        assert!(within(Some(now), Some(now - hour), Some(now + hour)));
        assert!(!within(Some(now), Some(now + hour), None));
        assert!(!within(None, Some(now), None));
    }
}
