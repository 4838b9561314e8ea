use regex::Regex;
use std::sync::OnceLock;

static VOLUME_SUFFIX: OnceLock<Regex> = OnceLock::new();

/// Largest volume number a file stem can yield; longer suffixes are clamped.
pub const MAX_VOLUME: i64 = 1_000_000;

/// Title and volume inferred from a PDF file stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub title: String,
    pub volume: i64,
}

fn volume_suffix() -> &'static Regex {
    VOLUME_SUFFIX.get_or_init(|| {
        // prefix, optional separator, number with optional fraction, optional
        // qualifier such as "_special"
        Regex::new(
            r"^(?P<title>.*?)(?:\s*-\s*|_|\s+)?(?P<number>\d+(?:\.\d+)?)(?:[_-][A-Za-z][A-Za-z0-9_-]*)?$",
        )
        .expect("volume suffix pattern is valid")
    })
}

/// Splits a file stem (no directory, no extension) into `(title, volume)`.
///
/// The volume is the integer part of the trailing number. A stem whose
/// prefix is empty or only digits ("2024", "01_02") is kept whole as the
/// title with volume 1. Stems without a trailing number are volume 1.
/// Only a parsed prefix is trimmed; callers normalize whole stems themselves.
pub fn parse_file_stem(stem: &str) -> ParsedName {
    let whole = || ParsedName {
        title: stem.to_string(),
        volume: 1,
    };

    let Some(captures) = volume_suffix().captures(stem) else {
        return whole();
    };

    let title = captures
        .name("title")
        .map(|value| value.as_str().trim())
        .unwrap_or("");
    if title.is_empty() || title.chars().all(|ch| ch.is_ascii_digit()) {
        return whole();
    }

    let volume = captures
        .name("number")
        .map(|value| integer_part(value.as_str()))
        .filter(|value| *value >= 1)
        .unwrap_or(1);

    ParsedName {
        title: title.to_string(),
        volume,
    }
}

/// Integer part of a `\d+(\.\d+)?` match. Digits only, so a failed parse
/// means the value does not fit.
fn integer_part(number: &str) -> i64 {
    let digits = number.split('.').next().unwrap_or(number);
    digits
        .parse::<i64>()
        .map_or(MAX_VOLUME, |value| value.min(MAX_VOLUME))
}

#[cfg(test)]
mod tests {
    use super::{parse_file_stem, MAX_VOLUME};

    fn parsed(stem: &str) -> (String, i64) {
        let name = parse_file_stem(stem);
        (name.title, name.volume)
    }

    #[test]
    fn hyphen_separator_with_padding() {
        assert_eq!(parsed("Great Book - 01"), ("Great Book".to_string(), 1));
    }

    #[test]
    fn underscore_separator() {
        assert_eq!(parsed("Great Book_02"), ("Great Book".to_string(), 2));
    }

    #[test]
    fn space_separator() {
        assert_eq!(parsed("Great Book 3"), ("Great Book".to_string(), 3));
    }

    #[test]
    fn fractional_volume_is_truncated() {
        assert_eq!(parsed("Great Book_01.5"), ("Great Book".to_string(), 1));
        assert_eq!(parsed("Great Book 12.5"), ("Great Book".to_string(), 12));
    }

    #[test]
    fn pure_number_keeps_whole_stem() {
        assert_eq!(parsed("2024"), ("2024".to_string(), 1));
        assert_eq!(parsed("01_02"), ("01_02".to_string(), 1));
    }

    #[test]
    fn no_suffix_is_volume_one() {
        assert_eq!(parsed("Standalone"), ("Standalone".to_string(), 1));
    }

    #[test]
    fn qualifier_after_number_is_ignored() {
        assert_eq!(parsed("Great Book_02_special"), ("Great Book".to_string(), 2));
        assert_eq!(parsed("Great Book - 04-extra"), ("Great Book".to_string(), 4));
    }

    #[test]
    fn digits_inside_title_are_kept() {
        assert_eq!(parsed("Area 51 - 02"), ("Area 51".to_string(), 2));
        assert_eq!(parsed("Area 51 Special"), ("Area 51 Special".to_string(), 1));
    }

    #[test]
    fn zero_volume_falls_back_to_one() {
        assert_eq!(parsed("Prologue 0"), ("Prologue".to_string(), 1));
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        assert_eq!(parsed("  Great Book  -  7"), ("Great Book".to_string(), 7));
    }

    #[test]
    fn whole_stem_is_kept_verbatim() {
        assert_eq!(parsed(" 2024 "), (" 2024 ".to_string(), 1));
        assert_eq!(parsed("Standalone "), ("Standalone ".to_string(), 1));
    }

    #[test]
    fn oversized_volume_is_clamped() {
        assert_eq!(
            parsed("Saga 99999999999999999999"),
            ("Saga".to_string(), MAX_VOLUME)
        );
        assert_eq!(parsed("Saga 1000001.5"), ("Saga".to_string(), MAX_VOLUME));
        assert_eq!(parsed("Saga 9007199254740993"), ("Saga".to_string(), MAX_VOLUME));
        assert_eq!(parsed("Saga 999999"), ("Saga".to_string(), 999_999));
    }
}
