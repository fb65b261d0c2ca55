use once_cell::sync::Lazy;
use regex::Regex;

static VERSION_NOISE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v|\+.*$").expect("version noise pattern is valid"));

const PART_WIDTH: usize = 5;

/// Normalizes a semver-like string so plain string comparison orders versions.
///
/// `"v1.2.3-rc.1+build123"` becomes `"    1-    2-    3-rc-    1"`. A release without a
/// pre-release tag gets a trailing `~`, which sorts after any tag, so `1.0.0 > 1.0.0-beta`.
pub fn pad_version(input: &str) -> String {
    let cleaned = VERSION_NOISE.replace_all(input, "");

    let mut parts: Vec<&str> = cleaned.split(['-', '.']).collect();
    while parts.last().is_some_and(|part| part.is_empty()) {
        parts.pop();
    }

    if parts.len() == 3 {
        parts.push("~");
    }

    parts
        .iter()
        .map(|part| {
            if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                format!("{part:>width$}", width = PART_WIDTH)
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
