//! Human-readable byte sizes
//!
//! Settings such as `maximumBytesBilled` accept values like `10k`, `2GB` or
//! `1kib`. Suffixes are binary multiples: `k` is 1024, `m` is 1024², up to
//! `p` for 1024⁵.

use std::sync::OnceLock;

use regex::Regex;

const SUFFIXES: [char; 5] = ['k', 'm', 'g', 't', 'p'];

fn byte_size_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        // digits, then an optional unit letter with an optional "b" or "ib"
        Regex::new(r"(?i)^(\d+)(?:([kmgtp])(?:i?b)?)?$").expect("Invalid regex")
    })
}

/// Convert a byte-size string into a plain decimal byte count
///
/// Inputs without a suffix, inputs that do not match the grammar, and inputs
/// whose value does not fit in 128 bits are returned unchanged.
///
/// ```
/// use malloy_bridge::convert_to_bytes;
///
/// assert_eq!(convert_to_bytes("10k"), "10240");
/// assert_eq!(convert_to_bytes("2GB"), "2147483648");
/// assert_eq!(convert_to_bytes("500"), "500");
/// assert_eq!(convert_to_bytes("abc"), "abc");
/// ```
pub fn convert_to_bytes(input: &str) -> String {
    let Some(captures) = byte_size_regex().captures(input) else {
        return input.to_string();
    };
    let Some(suffix) = captures.get(2) else {
        return input.to_string();
    };

    let rank = suffix
        .as_str()
        .chars()
        .next()
        .map(|c| c.to_ascii_lowercase())
        .and_then(|c| SUFFIXES.iter().position(|s| *s == c));

    let converted = rank.and_then(|rank| {
        let value: u128 = captures[1].parse().ok()?;
        let multiplier = 1024u128.checked_pow(rank as u32 + 1)?;
        value.checked_mul(multiplier)
    });

    match converted {
        Some(bytes) => bytes.to_string(),
        None => input.to_string(),
    }
}
