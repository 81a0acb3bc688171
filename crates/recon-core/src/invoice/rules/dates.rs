//! Date parsing for invoice headers.

use chrono::NaiveDate;

/// Layouts for dates whose year comes last with four digits.
/// Day-first wins over month-first when both are valid.
const FOUR_DIGIT_YEAR_LAYOUTS: &[&str] = &["%d/%m/%Y", "%m/%d/%Y"];

/// Layouts for dates whose year comes last with two digits.
const TWO_DIGIT_YEAR_LAYOUTS: &[&str] = &["%d/%m/%y"];

/// Layouts for dates whose year comes first.
const YEAR_FIRST_LAYOUTS: &[&str] = &["%Y/%m/%d"];

/// Parse a printed date such as `05/03/2024`, `05-03-24` or `2024-03-05`.
///
/// `/`, `-` and `.` are accepted as separators. Returns `None` when no
/// layout produces a valid calendar date.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let unified: String = raw
        .trim()
        .chars()
        .map(|c| if c == '-' || c == '.' { '/' } else { c })
        .collect();

    let parts: Vec<&str> = unified.split('/').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_digit())) {
        return None;
    }

    let layouts = match (parts[0].len(), parts[2].len()) {
        (4, 1..=2) => YEAR_FIRST_LAYOUTS,
        (1..=2, 4) => FOUR_DIGIT_YEAR_LAYOUTS,
        (1..=2, 2) => TWO_DIGIT_YEAR_LAYOUTS,
        _ => return None,
    };

    layouts
        .iter()
        .find_map(|layout| NaiveDate::parse_from_str(&unified, layout).ok())
}

/// Normalize a printed date to ISO-8601 (`YYYY-MM-DD`).
///
/// Normalizing an already normalized date returns it unchanged.
pub fn normalize_date(raw: &str) -> Option<String> {
    parse_date(raw).map(|date| date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ymd(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_day_first() {
        assert_eq!(parse_date("05/03/2024"), ymd(2024, 3, 5));
        assert_eq!(parse_date("05-03-2024"), ymd(2024, 3, 5));
        assert_eq!(parse_date("5.3.2024"), ymd(2024, 3, 5));
    }

    #[test]
    fn test_month_first_when_day_first_is_invalid() {
        assert_eq!(parse_date("03/25/2024"), ymd(2024, 3, 25));
        assert_eq!(parse_date("12-31-2023"), ymd(2023, 12, 31));
    }

    #[test]
    fn test_two_digit_year() {
        assert_eq!(parse_date("05/03/24"), ymd(2024, 3, 5));
        assert_eq!(parse_date("31-12-99"), ymd(1999, 12, 31));
    }

    #[test]
    fn test_year_first() {
        assert_eq!(parse_date("2024-03-05"), ymd(2024, 3, 5));
    }

    #[test]
    fn test_invalid_dates() {
        assert_eq!(parse_date("45/45/2024"), None);
        assert_eq!(parse_date("30/02/2024"), None);
        assert_eq!(parse_date("05/03"), None);
        assert_eq!(parse_date("05/03/202"), None);
        assert_eq!(parse_date("today"), None);
        assert_eq!(parse_date(""), None);
    }

    #[test]
    fn test_normalize_round_trip() {
        let normalized = normalize_date("05/03/2024").unwrap();
        assert_eq!(normalized, "2024-03-05");
        assert_eq!(normalize_date(&normalized).unwrap(), normalized);
    }
}
