//! Header field extraction driven by the pattern table.

use tracing::trace;

use super::patterns::HEADER_PATTERNS;
use super::{FieldExtractor, FieldPattern, HeaderField, clean_text, parse_amount, parse_date};
use crate::models::invoice::ExtractedHeader;

/// Recovers invoice header fields.
///
/// For each field the table rows are tried in order and the first match
/// that converts to a valid value wins.
pub struct HeaderExtractor {
    patterns: &'static [FieldPattern],
    max_field_len: usize,
}

impl HeaderExtractor {
    pub fn new() -> Self {
        Self {
            patterns: &HEADER_PATTERNS,
            max_field_len: 100,
        }
    }

    pub fn with_max_field_len(mut self, max_field_len: usize) -> Self {
        self.max_field_len = max_field_len;
        self
    }

    fn first_match<T>(
        &self,
        text: &str,
        field: HeaderField,
        convert: impl Fn(&str) -> Option<T>,
    ) -> Option<T> {
        self.patterns
            .iter()
            .filter(|pattern| pattern.field == field)
            .find_map(|pattern| {
                pattern.regex.captures_iter(text).find_map(|caps| {
                    let raw = caps.get(1)?.as_str();
                    let value = convert(&clean_text(raw, self.max_field_len));
                    if value.is_some() {
                        trace!("{:?} matched {:?} via {}", field, raw, pattern.regex.as_str());
                    }
                    value
                })
            })
    }
}

impl Default for HeaderExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for HeaderExtractor {
    type Output = ExtractedHeader;

    fn extract(&self, text: &str) -> ExtractedHeader {
        ExtractedHeader {
            invoice_number: self.first_match(text, HeaderField::InvoiceNumber, non_empty),
            invoice_date: self.first_match(text, HeaderField::Date, parse_date),
            provider_name: self.first_match(text, HeaderField::Provider, readable_name),
            subtotal: self.first_match(text, HeaderField::Subtotal, parse_amount),
            tax: self.first_match(text, HeaderField::Tax, parse_amount),
            total: self.first_match(text, HeaderField::Total, parse_amount),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

/// Names must carry at least one letter; signature lines and rulers do not.
fn readable_name(s: &str) -> Option<String> {
    let trimmed = s.trim_matches(|c: char| c == ':' || c == '-' || c.is_whitespace());
    trimmed
        .chars()
        .any(char::is_alphabetic)
        .then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(s: &str) -> Option<Decimal> {
        Some(Decimal::from_str(s).unwrap())
    }

    #[test]
    fn test_spanish_invoice_header() {
        let text = "Distribuidora Andina S.A.\n\
                    Factura No: INV-2024-001\n\
                    Fecha: 05/03/2024\n\
                    Subtotal: 150,00\n\
                    IVA 21%: 31,50\n\
                    Total: 181,50\n";

        let header = HeaderExtractor::new().extract(text);

        assert_eq!(header.invoice_number.as_deref(), Some("INV-2024-001"));
        assert_eq!(header.invoice_date, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(header.provider_name.as_deref(), Some("Distribuidora Andina S.A."));
        assert_eq!(header.subtotal, dec("150.00"));
        assert_eq!(header.tax, dec("31.50"));
        assert_eq!(header.total, dec("181.50"));
    }

    #[test]
    fn test_german_invoice_header() {
        let text = "Lieferant: Bäckerei Müller GmbH\n\
                    Rechnungsnummer: RE-7781\n\
                    Rechnungsdatum: 12.01.2024\n\
                    Netto: 1.000,00\n\
                    MwSt 19%: 190,00\n\
                    Gesamtbetrag: 1.190,00\n";

        let header = HeaderExtractor::new().extract(text);

        assert_eq!(header.invoice_number.as_deref(), Some("RE-7781"));
        assert_eq!(header.invoice_date, NaiveDate::from_ymd_opt(2024, 1, 12));
        assert_eq!(header.provider_name.as_deref(), Some("Bäckerei Müller GmbH"));
        assert_eq!(header.subtotal, dec("1000.00"));
        assert_eq!(header.tax, dec("190.00"));
        assert_eq!(header.total, dec("1190.00"));
    }

    #[test]
    fn test_subtotal_is_not_taken_as_total() {
        let text = "Subtotal: 100.00\nTotal: 121.00";
        let header = HeaderExtractor::new().extract(text);
        assert_eq!(header.subtotal, dec("100.00"));
        assert_eq!(header.total, dec("121.00"));

        let only_subtotal = HeaderExtractor::new().extract("Sub-total: 100.00");
        assert_eq!(only_subtotal.total, None);
    }

    #[test]
    fn test_total_fallback_to_currency_line() {
        let header = HeaderExtractor::new().extract("Gracias por su compra\n€ 45,90\n");
        assert_eq!(header.total, dec("45.90"));
    }

    #[test]
    fn test_invalid_labeled_date_falls_back() {
        let text = "Fecha: 45/45/2024\nEntregado el 07/08/2024";
        let header = HeaderExtractor::new().extract(text);
        assert_eq!(header.invoice_date, NaiveDate::from_ymd_opt(2024, 8, 7));
    }

    #[test]
    fn test_provider_requires_letters() {
        let header = HeaderExtractor::new().extract("Firma: ________\n");
        assert_eq!(header.provider_name, None);
    }

    #[test]
    fn test_field_length_is_capped() {
        let long_name = "X".repeat(300);
        let text = format!("Proveedor: {}", long_name);
        let header = HeaderExtractor::new().with_max_field_len(20).extract(&text);
        assert_eq!(header.provider_name.map(|n| n.chars().count()), Some(20));
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(HeaderExtractor::new().extract(""), ExtractedHeader::default());
    }
}
