use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

static READING_TIME: OnceLock<Regex> = OnceLock::new();

fn reading_time_re() -> &'static Regex {
    READING_TIME.get_or_init(|| {
        // "(4 minute read)", "(12 min read)", "(GitHub Repo)" is not matched
        Regex::new(r"(?i)\(\s*(\d{1,3})\s*(?:minutes?|mins?)\s*read\s*\)").expect("static regex")
    })
}

/// Collapses every run of whitespace (including newlines) into one space and trims.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts the "(N minute read)" annotation digests attach to headlines.
///
/// ```
/// use tldr_harvest::util::extract_reading_time;
///
/// assert_eq!(extract_reading_time("Rust 2024 ships (6 minute read)"), Some(6));
/// assert_eq!(extract_reading_time("No annotation"), None);
/// ```
pub fn extract_reading_time(s: &str) -> Option<u32> {
    reading_time_re()
        .captures(s)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Removes the reading-time annotation and normalizes whitespace in a headline.
pub fn clean_title(s: &str) -> String {
    let stripped = reading_time_re().replace_all(s, "");
    collapse_whitespace(&stripped)
}

/// Truncates to at most `max_chars` characters, appending "..." when cut.
///
/// Used to bound error strings persisted in `last_error`. Counts chars, not
/// bytes, so multi-byte text is never split mid-codepoint.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    if s.chars().count() <= max_chars {
        return Cow::Borrowed(s);
    }
    let keep = max_chars.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b   c "), "a b c");
        assert_eq!(collapse_whitespace(""), "");
    }

    #[test]
    fn test_reading_time_variants() {
        assert_eq!(extract_reading_time("x (1 minute read)"), Some(1));
        assert_eq!(extract_reading_time("x (15 minutes read)"), Some(15));
        assert_eq!(extract_reading_time("x (3 min read)"), Some(3));
        assert_eq!(extract_reading_time("x (GitHub Repo)"), None);
    }

    #[test]
    fn test_clean_title_strips_annotation() {
        assert_eq!(
            clean_title("  OpenAI ships   a thing (4 minute read) "),
            "OpenAI ships a thing"
        );
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert!(matches!(truncate_chars("short", 10), Cow::Borrowed(_)));
        assert_eq!(truncate_chars("abcdefghij", 6), "abc...");
        // multi-byte safe
        assert_eq!(truncate_chars("ééééééé", 5), "éé...");
    }
}
