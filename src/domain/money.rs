//! Local-currency amounts are carried as `i64` minor units (cents) everywhere
//! inside the core. These helpers convert at the edges.

use bigdecimal::{BigDecimal, ToPrimitive};
use std::str::FromStr;

pub const CURRENCY_SYMBOL: &str = "R";

/// Renders minor units the way the user typed them, e.g. `500000` -> `R5000.00`.
pub fn format_minor(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{}{}{}.{:02}", sign, CURRENCY_SYMBOL, abs / 100, abs % 100)
}

/// Longest accepted integer part; keeps the minor-unit value well inside `i64`.
const MAX_MAJOR_DIGITS: usize = 15;

/// Parses a decimal major-unit string (`"1000"`, `"1000.5"`, `"1000.50"`)
/// into minor units. More than two decimals is rejected rather than rounded.
/// Only plain digits with an optional fraction are accepted; signs and
/// exponents (`"1e5"`) never reach the decimal parser.
pub fn parse_major(input: &str) -> Option<i64> {
    let input = input.trim();
    let (whole, fraction) = match input.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (input, None),
    };
    let digits = |part: &str, max: usize| {
        !part.is_empty() && part.len() <= max && part.bytes().all(|b| b.is_ascii_digit())
    };
    if !digits(whole, MAX_MAJOR_DIGITS) || !fraction.map_or(true, |f| digits(f, 2)) {
        return None;
    }

    let value = BigDecimal::from_str(input).ok()?;
    let scaled = value * BigDecimal::from(100);
    if scaled.with_scale(0) != scaled {
        return None;
    }
    scaled.to_i64()
}

/// Minor units as a major-unit decimal (`92500` -> `925.00`).
pub fn minor_to_decimal(amount: i64) -> BigDecimal {
    BigDecimal::new(amount.into(), 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_minor_units() {
        assert_eq!(format_minor(500_000), "R5000.00");
        assert_eq!(format_minor(7_505), "R75.05");
        assert_eq!(format_minor(-99), "-R0.99");
    }

    #[test]
    fn parses_major_units() {
        assert_eq!(parse_major("1000"), Some(100_000));
        assert_eq!(parse_major("1000.5"), Some(100_050));
        assert_eq!(parse_major(" 0.01 "), Some(1));
        assert_eq!(parse_major("1.001"), None);
        assert_eq!(parse_major("abc"), None);
    }

    #[test]
    fn rejects_exponents_signs_and_oversized_input() {
        assert_eq!(parse_major("1e5"), None);
        assert_eq!(parse_major("1E5"), None);
        assert_eq!(parse_major("1e300000"), None);
        assert_eq!(parse_major("-10"), None);
        assert_eq!(parse_major("+10"), None);
        assert_eq!(parse_major(".5"), None);
        assert_eq!(parse_major("10."), None);
        assert_eq!(parse_major("1 000"), None);
        assert_eq!(parse_major(&"9".repeat(16)), None);
        assert_eq!(parse_major(&"9".repeat(15)), Some(99_999_999_999_999_900));
    }

    #[test]
    fn converts_minor_to_decimal() {
        assert_eq!(minor_to_decimal(92_500), BigDecimal::from_str("925.00").unwrap());
    }
}
