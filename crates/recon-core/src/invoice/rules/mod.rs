//! Rule-based field extractors for supplier invoices.

pub mod amounts;
pub mod confidence;
pub mod dates;
pub mod header;
pub mod line_items;
pub mod patterns;

pub use amounts::parse_amount;
pub use confidence::score;
pub use dates::{normalize_date, parse_date};
pub use header::HeaderExtractor;
pub use line_items::LineItemExtractor;

use regex::Regex;

/// Trait for field extractors.
///
/// Extractors never fail: anything they cannot recover is reported as
/// absent in their output.
pub trait FieldExtractor {
    /// The type of value this extractor produces.
    type Output;

    /// Extract from a block of recognized text.
    fn extract(&self, text: &str) -> Self::Output;
}

/// Header field a pattern recovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderField {
    InvoiceNumber,
    Date,
    Provider,
    Subtotal,
    Tax,
    Total,
}

impl HeaderField {
    pub const ALL: [HeaderField; 6] = [
        HeaderField::InvoiceNumber,
        HeaderField::Date,
        HeaderField::Provider,
        HeaderField::Subtotal,
        HeaderField::Tax,
        HeaderField::Total,
    ];
}

/// One row of a header pattern table. Capture group 1 holds the value.
#[derive(Debug)]
pub struct FieldPattern {
    pub field: HeaderField,
    pub regex: Regex,
}

/// Expected shape of a positional capture group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Text,
    Number,
}

/// A positional line-item layout with four capture groups.
#[derive(Debug)]
pub struct LinePattern {
    pub regex: Regex,
    pub columns: [Column; 4],
}

/// Collapse runs of whitespace and cap the length in characters.
pub(crate) fn clean_text(raw: &str, max_chars: usize) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  Distribuidora \t Andina\n S.A. ", 100), "Distribuidora Andina S.A.");
        assert_eq!(clean_text("abcdef", 3), "abc");
        assert_eq!(clean_text("ab cd", 3), "ab");
        assert_eq!(clean_text("", 10), "");
    }
}
