//! Shared helpers for turning raw feed content into post records.

use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));
static BLANK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\n+").expect("valid regex"));
static STATUS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/status/(\d+)").expect("valid regex"));

/// Normalize feed item markup into plain text.
///
/// Strips tags, decodes the standard HTML entities, and collapses runs of
/// blank lines into a single line break.
#[must_use]
pub fn clean_text(html: &str) -> String {
    let text = TAG_RE.replace_all(html, "");
    let text = decode_entities(&text);
    let text = BLANK_RE.replace_all(&text, "\n");
    text.trim().to_string()
}

fn decode_entities(text: &str) -> String {
    text.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Extract the numeric status identifier from a post link, e.g.
/// `https://nitter.net/someone/status/1234567890` yields `1234567890`.
#[must_use]
pub fn extract_status_id(link: &str) -> Option<String> {
    STATUS_RE.captures(link).map(|c| c[1].to_string())
}

/// Compare two post identifiers, numerically when both parse as integers.
///
/// Real identifiers are numeric and monotonic with creation time. If either
/// side fails to parse the comparison degrades to lexicographic string order,
/// which does not match creation order for mixed-width ids.
#[must_use]
pub fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u128>(), b.parse::<u128>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_round_trip() {
        assert_eq!(clean_text("<p>A &amp; B</p>\n\n\nC"), "A & B\nC");
    }

    #[test]
    fn test_clean_text_decodes_entities() {
        assert_eq!(
            clean_text("&lt;b&gt; &quot;hi&quot; it&#39;s"),
            "<b> \"hi\" it's"
        );
    }

    #[test]
    fn test_clean_text_strips_nested_tags() {
        assert_eq!(
            clean_text("<div><a href=\"x\">link</a> text</div>"),
            "link text"
        );
    }

    #[test]
    fn test_extract_status_id() {
        assert_eq!(
            extract_status_id("https://nitter.net/someone/status/1234567890"),
            Some("1234567890".to_string())
        );
        assert_eq!(extract_status_id("https://nitter.net/someone"), None);
        assert_eq!(extract_status_id("/status/abc"), None);
    }

    #[test]
    fn test_compare_ids_numeric() {
        // Lexicographically "9" > "10"; numeric comparison must win.
        assert_eq!(compare_ids("9", "10"), Ordering::Less);
        assert_eq!(compare_ids("10", "9"), Ordering::Greater);
        assert_eq!(compare_ids("5", "5"), Ordering::Equal);
    }

    #[test]
    fn test_compare_ids_large_values() {
        // Real status ids exceed u32/i64 ranges comfortably.
        assert_eq!(
            compare_ids("18446744073709551616", "18446744073709551617"),
            Ordering::Less
        );
    }

    #[test]
    fn test_compare_ids_lexicographic_fallback() {
        // Non-numeric ids silently degrade to string order: "abc" > "Zzz"
        // despite no meaningful creation-time relation. Documented behavior,
        // not an endorsement.
        assert_eq!(compare_ids("abc", "Zzz"), Ordering::Greater);
        assert_eq!(compare_ids("2", "1x"), Ordering::Greater);
    }
}
