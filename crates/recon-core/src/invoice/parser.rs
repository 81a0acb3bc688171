//! Rule-based invoice parser combining header, line-item and confidence rules.

use std::time::Instant;

use tracing::{debug, info};

use crate::models::config::ExtractionConfig;
use crate::models::invoice::ExtractedInvoice;

use super::rules::{FieldExtractor, HeaderExtractor, LineItemExtractor, score};

/// Message attached to results built from blank text.
pub const EMPTY_TEXT: &str = "no text recognized";

/// Trait for invoice parsing.
///
/// Parsing never fails: anything that cannot be recovered is absent from
/// the result and lowers its confidence.
pub trait InvoiceParser: Send + Sync {
    /// Parse an invoice from recognized text.
    fn parse(&self, text: &str) -> ExtractedInvoice;
}

/// Parser driven by the pattern tables in [`super::rules::patterns`].
pub struct RuleInvoiceParser {
    header: HeaderExtractor,
    line_items: LineItemExtractor,
}

impl RuleInvoiceParser {
    /// Create a parser with default limits.
    pub fn new() -> Self {
        Self::from_config(&ExtractionConfig::default())
    }

    /// Create a parser with the given limits.
    pub fn from_config(config: &ExtractionConfig) -> Self {
        Self {
            header: HeaderExtractor::new().with_max_field_len(config.max_field_len),
            line_items: LineItemExtractor::new()
                .with_min_line_len(config.min_line_len)
                .with_max_items(config.max_items)
                .with_max_name_len(config.max_name_len),
        }
    }
}

impl Default for RuleInvoiceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl InvoiceParser for RuleInvoiceParser {
    fn parse(&self, text: &str) -> ExtractedInvoice {
        if text.trim().is_empty() {
            return ExtractedInvoice::failed(EMPTY_TEXT);
        }

        let start = Instant::now();
        info!("Parsing invoice from {} characters of text", text.len());

        let header = self.header.extract(text);
        let items = self.line_items.extract(text);
        let confidence = score(&header, &items);

        debug!(
            "Recovered {} header fields and {} items in {}ms (confidence {:.2})",
            header.recovered_fields(),
            items.len(),
            start.elapsed().as_millis(),
            confidence
        );

        ExtractedInvoice {
            success: true,
            header,
            items,
            confidence,
            raw_text: text.to_string(),
            suggestions: Vec::new(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const SAMPLE: &str = r#"
        Distribuidora Andina S.A.
        Factura No: INV-2024-001
        Fecha: 05/03/2024

        Tomates frescos 10 2.50 25.00
        Queso manchego 12.50 3 37.50
        3 Botellas de vino tinto 8.00 24.00

        Subtotal: 86.50
        IVA 21%: 18.17
        Total: 150.00
    "#;

    #[test]
    fn test_parse_end_to_end() {
        let text = "Factura No: INV-2024-001\nFecha: 05/03/2024\nTotal: 150.00";
        let result = RuleInvoiceParser::new().parse(text);

        assert!(result.success);
        assert_eq!(result.header.invoice_number.as_deref(), Some("INV-2024-001"));
        assert_eq!(result.header.invoice_date, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(result.header.total, Some(Decimal::from_str("150.00").unwrap()));
        assert_eq!(result.raw_text, text);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["invoice_date"], "2024-03-05");
        assert_eq!(json["total"], "150.00");
    }

    #[test]
    fn test_parse_full_invoice() {
        let result = RuleInvoiceParser::new().parse(SAMPLE);

        assert_eq!(result.header.recovered_fields(), 6);
        assert_eq!(result.items.len(), 3);
        assert_eq!(result.items[2].product_name, "Botellas de vino tinto");
        // 4.0 for header fields plus 0.3 for items, out of 5.
        assert!((result.confidence - 0.86).abs() < 1e-6);
    }

    #[test]
    fn test_parse_is_deterministic() {
        let parser = RuleInvoiceParser::new();
        assert_eq!(parser.parse(SAMPLE), parser.parse(SAMPLE));
    }

    #[test]
    fn test_confidence_stays_in_range() {
        let long_items: String = (0..100).map(|i| format!("Item number {} 1 2.00 2.00\n", i)).collect();
        let inputs = [
            "",
            "   \n\t",
            "garbage ### %%% @@@",
            "Total: 1.2.3.4,5,6",
            "Fecha: 99/99/9999",
            SAMPLE,
            long_items.as_str(),
        ];

        let parser = RuleInvoiceParser::new();
        for input in inputs {
            let confidence = parser.parse(input).confidence;
            assert!((0.0..=1.0).contains(&confidence), "{} for {:?}", confidence, input);
        }
    }

    #[test]
    fn test_blank_text_fails() {
        let result = RuleInvoiceParser::new().parse("  \n ");
        assert!(!result.success);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.error.as_deref(), Some(EMPTY_TEXT));
    }

    #[test]
    fn test_config_limits_apply() {
        let config = ExtractionConfig {
            max_items: 2,
            ..Default::default()
        };
        let result = RuleInvoiceParser::from_config(&config).parse(SAMPLE);
        assert_eq!(result.items.len(), 2);
    }
}
