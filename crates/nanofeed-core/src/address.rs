//! Currency address grammar, extraction, and unit conversion.
//!
//! An address is the prefix `nano_` or `xno_`, one of `1` or `3`, then exactly
//! 59 characters from `13456789abcdefghijkmnopqrstuwxyz`. Matching is
//! case-insensitive; extracted addresses are returned lowercased. Only the
//! format is checked, never the checksum.
//!
//! Extraction runs one optional label pre-pass (`Nano:`, `XNO:`, `Currency:`,
//! `Address:`) and otherwise falls back to the first bare address in the text.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};

/// Raw units per whole NANO (10^30).
pub const RAW_PER_NANO: u128 = 1_000_000_000_000_000_000_000_000_000_000;

/// Number of fractional decimal digits a NANO amount can carry.
pub const NANO_DECIMALS: usize = 30;

/// The body alphabet (after the prefix and the leading `1`/`3`).
pub const ADDRESS_ALPHABET: &str = "13456789abcdefghijkmnopqrstuwxyz";

const ADDRESS_BODY: &str = r"(?:nano|xno)_[13][13456789abcdefghijkmnopqrstuwxyz]{59}";

static ADDRESS_EXACT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)^{ADDRESS_BODY}$")).expect("address regex should compile")
});

static ADDRESS_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b{ADDRESS_BODY}\b")).expect("bare address regex should compile")
});

static ADDRESS_LABELED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:nano|xno|currency|address)\s*:\s*({ADDRESS_BODY})\b"
    ))
    .expect("labeled address regex should compile")
});

static LABELED_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\n?[ \t]*\b(?:nano|xno|currency|address)\s*:\s*{ADDRESS_BODY}\b[ \t]*"
    ))
    .expect("labeled line regex should compile")
});

/// Whether `address` is exactly one well-formed currency address.
pub fn validate_nano_address(address: &str) -> bool {
    ADDRESS_EXACT.is_match(address)
}

/// Validate and normalize (lowercase) an address supplied by a user.
pub fn parse_nano_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    if validate_nano_address(trimmed) {
        Ok(trimmed.to_ascii_lowercase())
    } else {
        Err(Error::InvalidAddress(trimmed.to_string()))
    }
}

/// Undo the escaped newlines some clients leave in profile text.
fn clean_text(text: &str) -> String {
    text.replace("\\n", "\n")
}

/// Find an address that is explicitly labeled (e.g. `Nano: nano_...`).
///
/// A labeled address is one the author binds to themselves rather than
/// merely mentions.
pub fn find_labeled_currency_address(text: &str) -> Option<String> {
    let text = clean_text(text);
    ADDRESS_LABELED
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Find the first currency address in free text.
///
/// Labeled addresses take precedence over bare ones. Total over all inputs:
/// returns `None` or a string that passes [`validate_nano_address`].
pub fn find_currency_address(text: &str) -> Option<String> {
    if text.is_empty() {
        return None;
    }
    if let Some(labeled) = find_labeled_currency_address(text) {
        return Some(labeled);
    }
    let text = clean_text(text);
    ADDRESS_BARE
        .find(&text)
        .map(|m| m.as_str().to_ascii_lowercase())
}

/// Remove every labeled address line from `text`.
pub fn strip_labeled_addresses(text: &str) -> String {
    let text = clean_text(text);
    LABELED_LINE.replace_all(&text, "").trim().to_string()
}

/// Convert a decimal NANO amount (e.g. `"0.133"`) to raw units exactly.
pub fn nano_to_raw(amount: &str) -> Result<u128> {
    let input = amount.trim();
    let invalid = |reason: &str| Error::InvalidAmount {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if input.is_empty() {
        return Err(invalid("empty amount"));
    }

    let (whole, fraction) = match input.split_once('.') {
        Some((w, f)) => (w, f),
        None => (input, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("no digits"));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid("expected a non-negative decimal number"));
    }
    if fraction.len() > NANO_DECIMALS {
        return Err(invalid("more than 30 fractional digits"));
    }

    let whole_raw = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .ok()
            .and_then(|w| w.checked_mul(RAW_PER_NANO))
            .ok_or_else(|| invalid("amount too large"))?
    };

    let fraction_raw = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{fraction:0<width$}", width = NANO_DECIMALS);
        padded
            .parse::<u128>()
            .map_err(|_| invalid("bad fractional part"))?
    };

    whole_raw
        .checked_add(fraction_raw)
        .ok_or_else(|| invalid("amount too large"))
}

/// Whole NANO contained in `raw` (integer division).
pub fn raw_to_nano(raw: u128) -> u128 {
    raw / RAW_PER_NANO
}

/// Exact decimal rendering of `raw` in NANO, without trailing zeros.
pub fn format_raw(raw: u128) -> String {
    let whole = raw / RAW_PER_NANO;
    let fraction = raw % RAW_PER_NANO;
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:0>width$}", width = NANO_DECIMALS);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "nano_1111111111111111111111111111111111111111111111111111hifc8npp";
    const ADDR2: &str = "nano_3t6k35gi95xu6tergt6p69ck76ogmitsa8mnijtpxm9fkcm736xtoncuohr3";

    #[test]
    fn validates_exact_format() {
        assert!(validate_nano_address(ADDR));
        assert!(validate_nano_address(ADDR2));
        assert!(validate_nano_address(
            "XNO_1111111111111111111111111111111111111111111111111111HIFC8NPP"
        ));
    }

    #[test]
    fn rejects_bad_alphabet_prefix_and_length() {
        // 'l' and '0' and '2' and 'v' are not in the alphabet
        let bad_char = ADDR.replacen("hifc", "hilc", 1);
        assert!(!validate_nano_address(&bad_char));
        assert!(!validate_nano_address(&ADDR.replacen("1111", "0111", 1)));
        // leading digit must be 1 or 3
        assert!(!validate_nano_address(&ADDR.replacen("nano_1", "nano_4", 1)));
        assert!(!validate_nano_address(&ADDR.replacen("nano_", "xrb_", 1)));
        assert!(!validate_nano_address(&ADDR[..ADDR.len() - 1]));
        assert!(!validate_nano_address(&format!("{ADDR}1")));
        assert!(!validate_nano_address(""));
    }

    #[test]
    fn finds_labeled_address_in_bio() {
        let bio = format!("hello world\nNano: {ADDR}");
        assert_eq!(find_currency_address(&bio).as_deref(), Some(ADDR));
        assert_eq!(find_labeled_currency_address(&bio).as_deref(), Some(ADDR));
    }

    #[test]
    fn labeled_wins_over_earlier_bare() {
        let text = format!("tip {ADDR2} or Address: {ADDR}");
        assert_eq!(find_currency_address(&text).as_deref(), Some(ADDR));
    }

    #[test]
    fn bare_address_and_escaped_newline() {
        assert_eq!(
            find_currency_address(&format!("send to {ADDR} thanks")).as_deref(),
            Some(ADDR)
        );
        let escaped = format!("gm\\n{ADDR}");
        assert_eq!(find_currency_address(&escaped).as_deref(), Some(ADDR));
        assert_eq!(find_labeled_currency_address(&escaped), None);
    }

    #[test]
    fn extraction_is_case_insensitive_and_lowercases() {
        let upper = ADDR.to_uppercase();
        assert_eq!(
            find_currency_address(&format!("NANO: {upper}")).as_deref(),
            Some(ADDR)
        );
    }

    #[test]
    fn embedded_address_with_extra_chars_is_ignored() {
        assert_eq!(find_currency_address(&format!("{ADDR}abc")), None);
        assert_eq!(find_currency_address(&format!("x{ADDR}")), None);
    }

    #[test]
    fn extraction_is_total_and_idempotent() {
        for text in ["", "no address here", "nano_", "xno_3", &format!("{ADDR} {ADDR2}")] {
            let first = find_currency_address(text);
            assert_eq!(first, find_currency_address(text));
            if let Some(found) = first {
                assert!(validate_nano_address(&found));
                assert_eq!(find_currency_address(&found), Some(found.clone()));
            }
        }
    }

    #[test]
    fn parse_normalizes_or_errors() {
        assert_eq!(parse_nano_address(&format!("  {}  ", ADDR.to_uppercase())).unwrap(), ADDR);
        assert!(matches!(
            parse_nano_address("nano_nope"),
            Err(Error::InvalidAddress(_))
        ));
    }

    #[test]
    fn strips_labeled_lines() {
        let bio = format!("builder of things\nNano: {ADDR}");
        assert_eq!(strip_labeled_addresses(&bio), "builder of things");
        let escaped = format!("a\\nXNO: {ADDR2}\\nb");
        assert_eq!(strip_labeled_addresses(&escaped), "a\nb");
        assert_eq!(strip_labeled_addresses("plain"), "plain");
    }

    #[test]
    fn nano_to_raw_is_exact() {
        assert_eq!(nano_to_raw("1").unwrap(), RAW_PER_NANO);
        assert_eq!(nano_to_raw("0.133").unwrap(), 133 * RAW_PER_NANO / 1000);
        assert_eq!(nano_to_raw(".5").unwrap(), RAW_PER_NANO / 2);
        assert_eq!(nano_to_raw("2.").unwrap(), 2 * RAW_PER_NANO);
        assert_eq!(nano_to_raw("0.000000000000000000000000000001").unwrap(), 1);
    }

    #[test]
    fn nano_to_raw_rejects_garbage() {
        for bad in ["", ".", "-1", "1e5", "abc", "1.2.3", "0.0000000000000000000000000000001"] {
            assert!(
                matches!(nano_to_raw(bad), Err(Error::InvalidAmount { .. })),
                "{bad} should be rejected"
            );
        }
        assert!(nano_to_raw("999999999999").is_err());
    }

    #[test]
    fn raw_back_to_nano() {
        assert_eq!(raw_to_nano(RAW_PER_NANO * 3 + 5), 3);
        assert_eq!(raw_to_nano(5), 0);
        assert_eq!(format_raw(nano_to_raw("0.133").unwrap()), "0.133");
        assert_eq!(format_raw(RAW_PER_NANO * 2), "2");
    }
}
