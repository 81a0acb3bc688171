//! Amount parsing for mixed-locale invoices.

use rust_decimal::Decimal;
use std::str::FromStr;

/// Parse a printed amount such as `"1.234,56"`, `"1,234.56"`, `"€ 150.00"`
/// or `"12 345"`.
///
/// Currency symbols and grouping spaces are dropped. When both `,` and `.`
/// appear, the later one is the decimal separator. When only one appears,
/// it is a thousands separator if it repeats or is followed by exactly
/// three digits (unless the integer part is `0`), and the decimal separator
/// otherwise. Returns `None` when no number can be recovered.
pub fn parse_amount(s: &str) -> Option<Decimal> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    let cleaned = cleaned.trim_matches(|c| c == ',' || c == '.');

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let normalized = match (cleaned.rfind(','), cleaned.rfind('.')) {
        (Some(comma), Some(dot)) => {
            let (decimal, grouping) = if comma > dot { (',', '.') } else { ('.', ',') };
            let without_grouping = cleaned.replace(grouping, "");
            if without_grouping.matches(decimal).count() > 1 {
                return None;
            }
            without_grouping.replace(decimal, ".")
        }
        (Some(_), None) => resolve_single_separator(cleaned, ','),
        (None, Some(_)) => resolve_single_separator(cleaned, '.'),
        (None, None) => cleaned.to_string(),
    };

    Decimal::from_str(&normalized).ok()
}

fn resolve_single_separator(s: &str, sep: char) -> String {
    if s.matches(sep).count() > 1 {
        return s.replace(sep, "");
    }

    let (integer, fraction) = s.split_once(sep).unwrap_or((s, ""));
    if fraction.len() == 3 && integer != "0" {
        format!("{}{}", integer, fraction)
    } else {
        format!("{}.{}", integer, fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dec(s: &str) -> Option<Decimal> {
        Some(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_parse_plain_amounts() {
        assert_eq!(parse_amount("150.00"), dec("150.00"));
        assert_eq!(parse_amount("150,00"), dec("150.00"));
        assert_eq!(parse_amount("42"), dec("42"));
        assert_eq!(parse_amount("2.5"), dec("2.5"));
    }

    #[test]
    fn test_parse_grouped_amounts() {
        assert_eq!(parse_amount("1.234,56"), dec("1234.56"));
        assert_eq!(parse_amount("1,234.56"), dec("1234.56"));
        assert_eq!(parse_amount("12 345,67"), dec("12345.67"));
        assert_eq!(parse_amount("1.234.567"), dec("1234567"));
        assert_eq!(parse_amount("1,234"), dec("1234"));
        assert_eq!(parse_amount("0,125"), dec("0.125"));
    }

    #[test]
    fn test_parse_strips_currency() {
        assert_eq!(parse_amount("€ 99,90"), dec("99.90"));
        assert_eq!(parse_amount("$1,500.00"), dec("1500.00"));
        assert_eq!(parse_amount("150.00 EUR"), dec("150.00"));
        assert_eq!(parse_amount("12.50."), dec("12.50"));
    }

    #[test]
    fn test_parse_failures() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("EUR"), None);
        assert_eq!(parse_amount(".,"), None);
        assert_eq!(parse_amount("1.2,3.4"), None);
    }
}
