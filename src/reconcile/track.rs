//! Track and assignment title conventions.
//!
//! A track title is `<letters><number><suffix>`, e.g. `AA101a`: assignment
//! letters, assignment number, then a per-team suffix letter. Spaces are
//! ignored. The owning outing key is `"<LETTERS> <number>"`.

use std::sync::LazyLock;

use regex::Regex;

/// Key used when a source assignment has a blank title.
pub const PLACEHOLDER_TITLE: &str = "NO TITLE";

/// Stroke colors indexed by suffix letter (`a` = 0).
pub const TRACK_PALETTE: [&str; 12] = [
    "#FF0000", "#0000FF", "#00A000", "#FF8000", "#A000A0", "#00B0B0", "#A05000", "#FF00FF",
    "#808000", "#000080", "#008080", "#800000",
];

/// Color for suffixes past the end of the palette.
pub const FALLBACK_TRACK_COLOR: &str = "#808080";

static TRACK_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z]+)(\d+)([A-Za-z]+)$").unwrap());

static TRAILING_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+$").unwrap());

/// A parsed track title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackName {
    pub prefix: String,
    pub number: String,
    pub suffix: String,
}

impl TrackName {
    /// Key of the outing this track belongs to.
    pub fn outing_key(&self) -> String {
        format!("{} {}", self.prefix.to_uppercase(), self.number)
    }

    pub fn color(&self) -> &'static str {
        track_color(&self.suffix)
    }
}

/// Split a title into letter prefix, number and suffix. Titles that do not
/// have all three parts are not tracks.
pub fn parse_track_name(title: &str) -> Option<TrackName> {
    let compact: String = title.chars().filter(|c| !c.is_whitespace()).collect();
    let caps = TRACK_TITLE.captures(&compact)?;
    Some(TrackName {
        prefix: caps[1].to_string(),
        number: caps[2].to_string(),
        suffix: caps[3].to_string(),
    })
}

/// Stable color for a suffix: the same first letter always maps to the same entry.
pub fn track_color(suffix: &str) -> &'static str {
    suffix
        .chars()
        .next()
        .filter(char::is_ascii_alphabetic)
        .map(|c| (c.to_ascii_lowercase() as u8 - b'a') as usize)
        .and_then(|i| TRACK_PALETTE.get(i).copied())
        .unwrap_or(FALLBACK_TRACK_COLOR)
}

/// Upper-cased, trimmed assignment title; blank becomes the placeholder.
pub fn normalize_title(title: &str) -> String {
    let t = title.trim();
    if t.is_empty() {
        PLACEHOLDER_TITLE.to_string()
    } else {
        t.to_uppercase()
    }
}

pub fn is_placeholder(title: &str) -> bool {
    title.trim().is_empty() || title == PLACEHOLDER_TITLE
}

/// Whether the title ends in an assignment number.
pub fn has_number(title: &str) -> bool {
    TRAILING_NUMBER.is_match(title.trim())
}

/// Title with whitespace removed, for matching `AA 101` against `AA101`.
pub fn compact(title: &str) -> String {
    title.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_track_titles() {
        assert_eq!(
            parse_track_name("AA101a"),
            Some(TrackName {
                prefix: "AA".into(),
                number: "101".into(),
                suffix: "a".into(),
            })
        );
        assert_eq!(parse_track_name("aa 101 B").unwrap().outing_key(), "AA 101");
        assert_eq!(parse_track_name("CURRENT TRACK"), None);
        assert_eq!(parse_track_name("AA101"), None);
        assert_eq!(parse_track_name("101a"), None);
        assert_eq!(parse_track_name("AA101a2"), None);
    }

    #[test]
    fn suffix_colors_are_stable() {
        assert_eq!(track_color("a"), TRACK_PALETTE[0]);
        assert_eq!(track_color("A"), TRACK_PALETTE[0]);
        assert_eq!(track_color("c"), TRACK_PALETTE[2]);
        assert_eq!(track_color("l"), TRACK_PALETTE[11]);
        assert_eq!(track_color("m"), FALLBACK_TRACK_COLOR);
        assert_eq!(track_color("z"), FALLBACK_TRACK_COLOR);
        assert_eq!(track_color(""), FALLBACK_TRACK_COLOR);
    }

    #[test]
    fn title_normalization() {
        assert_eq!(normalize_title("  aa101 "), "AA101");
        assert_eq!(normalize_title("   "), PLACEHOLDER_TITLE);
        assert!(is_placeholder(""));
        assert!(is_placeholder(PLACEHOLDER_TITLE));
        assert!(!is_placeholder("AA101"));
    }

    #[test]
    fn trailing_numbers() {
        assert!(has_number("AA101"));
        assert!(has_number("AA 101"));
        assert!(!has_number("AA"));
        assert!(!has_number(""));
        assert_eq!(compact("AA 101"), "AA101");
    }
}
