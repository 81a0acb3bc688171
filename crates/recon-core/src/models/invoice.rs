//! Extraction result models.
//!
//! Everything here is transient: an extraction result is returned to the
//! caller for review and is never persisted as-is.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::catalog::Suggestion;

/// Header fields recovered from recognized text.
///
/// Every field is optional; a missing value means the field was not
/// recovered, never that it was recovered as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedHeader {
    /// Invoice number/identifier.
    pub invoice_number: Option<String>,

    /// Issue date (serialized as ISO-8601).
    pub invoice_date: Option<NaiveDate>,

    /// Provider name as printed on the document.
    pub provider_name: Option<String>,

    /// Amount before tax.
    pub subtotal: Option<Decimal>,

    /// Tax amount.
    pub tax: Option<Decimal>,

    /// Amount due.
    pub total: Option<Decimal>,
}

impl ExtractedHeader {
    /// Number of fields that were recovered.
    pub fn recovered_fields(&self) -> usize {
        [
            self.invoice_number.is_some(),
            self.invoice_date.is_some(),
            self.provider_name.is_some(),
            self.subtotal.is_some(),
            self.tax.is_some(),
            self.total.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// A single product line recovered from recognized text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedLineItem {
    /// Product name as printed on the document.
    pub product_name: String,

    /// Quantity, if it could be parsed.
    pub quantity: Option<Decimal>,

    /// Unit price, if it could be parsed.
    pub unit_price: Option<Decimal>,

    /// Line total, if it could be parsed.
    pub total_price: Option<Decimal>,
}

/// Result of one extraction call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    /// Whether recognition produced usable text.
    pub success: bool,

    /// Recovered header fields.
    #[serde(flatten)]
    pub header: ExtractedHeader,

    /// Recovered line items (at most the configured cap).
    pub items: Vec<ExtractedLineItem>,

    /// Heuristic trust signal in `[0, 1]`.
    pub confidence: f32,

    /// Text produced by recognition.
    pub raw_text: String,

    /// Catalog suggestions for the provider and item names.
    #[serde(default)]
    pub suggestions: Vec<Suggestion>,

    /// Reason recognition failed, when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExtractedInvoice {
    /// Build the result returned when recognition failed or produced nothing.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            header: ExtractedHeader::default(),
            items: Vec::new(),
            confidence: 0.0,
            raw_text: String::new(),
            suggestions: Vec::new(),
            error: Some(error.into()),
        }
    }
}
