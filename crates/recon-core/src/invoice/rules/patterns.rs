//! Pattern tables for invoice extraction.
//!
//! Header patterns are an ordered list of `(regex, field)` pairs: for each
//! field, label variants come first (Spanish, German and English synonyms)
//! and a bare fallback comes last. Adding a synonym means adding a row, not
//! touching extraction control flow.

use lazy_static::lazy_static;
use regex::Regex;

use super::{Column, FieldPattern, HeaderField, LinePattern};

/// Invoice-number token: must contain at least one digit.
const DOC_NUMBER: &str = r"([A-Z0-9\-/]*\d[A-Z0-9\-/]*)";

/// Day-first, month-first or ISO date token.
const DATE_TOKEN: &str = r"(\d{4}-\d{1,2}-\d{1,2}|\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4})";

/// Optional currency marker in front of an amount.
const CURRENCY: &str = r"(?:[€$£]|EUR|USD)?\s*";

/// Amount with optional thousands groups and up to two decimals.
const AMOUNT: &str = r"(\d{1,3}(?:[.,\x{00a0} ]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)";

/// Line-item quantity (integer or up to three decimals).
const QUANTITY: &str = r"(\d+(?:[.,]\d{1,3})?)";

/// Line-item price, optionally preceded by a currency symbol.
const PRICE: &str = r"[$€£]?\s*(\d{1,3}(?:[.,]\d{3})+(?:[.,]\d{1,2})?|\d+(?:[.,]\d{1,2})?)";

/// Free-text product name.
const NAME: &str = r"(.{5,40})";

fn header(field: HeaderField, pattern: String) -> FieldPattern {
    FieldPattern {
        field,
        regex: Regex::new(&pattern).unwrap(),
    }
}

fn line(pattern: String, columns: [Column; 4]) -> LinePattern {
    LinePattern {
        regex: Regex::new(&pattern).unwrap(),
        columns,
    }
}

lazy_static! {
    pub static ref HEADER_PATTERNS: Vec<FieldPattern> = vec![
        // Invoice number
        header(
            HeaderField::InvoiceNumber,
            format!(
                r"(?i)\b(?:n[°º]\s*factura|nro\.?\s*factura|rechnungsnummer|rechnung|factura|invoice)\b[\s:.#]*(?:(?:n[o°º]|nro|nr|n[uú]m(?:ero)?|number)\.?[\s:#]+)?{DOC_NUMBER}"
            ),
        ),
        header(
            HeaderField::InvoiceNumber,
            format!(r"(?i)\bn[°º]\s*[:.]?\s*{DOC_NUMBER}"),
        ),
        header(
            HeaderField::InvoiceNumber,
            format!(r"(?i)\b(?:referencia|ref)\b\.?[\s:]*{DOC_NUMBER}"),
        ),
        header(
            HeaderField::InvoiceNumber,
            r"(?i)\b((?:inv|fact|fac|fv|fa|re)[\-/]\d[A-Z0-9\-/]*)".to_string(),
        ),

        // Date
        header(
            HeaderField::Date,
            format!(
                r"(?i)\b(?:fecha\s+de\s+emisi[óo]n|fecha\s+factura|rechnungsdatum|invoice\s+date|fecha|datum|date)\b[\s:]*{DATE_TOKEN}"
            ),
        ),
        header(HeaderField::Date, format!(r"\b{DATE_TOKEN}\b")),

        // Provider
        header(
            HeaderField::Provider,
            r"(?i)\b(?:proveedor|vendedor|lieferant|raz[óo]n\s+social|firma|supplier|vendor|emisor)\b[\s:]*([^\n]{5,50})".to_string(),
        ),
        header(
            HeaderField::Provider,
            r"(?i)\b(?:nombre|empresa|company|name)\b[\s:]*([^\n]{5,50})".to_string(),
        ),
        header(
            HeaderField::Provider,
            r"(?im)^[ \t]*([^\n]{2,48}?\b(?:S\.?A\.?C?\.?|S\.?R\.?L\.?|S\.?L\.?|E\.?I\.?R\.?L\.?|GmbH|Ltd\.?|LLC|Inc\.?))[ \t]*$".to_string(),
        ),

        // Subtotal
        header(
            HeaderField::Subtotal,
            format!(
                r"(?i)\b(?:sub-?total|base\s+imponible|netto(?:-?betrag)?|neto|net\s+amount)\b[\s:]*{CURRENCY}{AMOUNT}"
            ),
        ),

        // Tax
        header(
            HeaderField::Tax,
            format!(
                r"(?i)\b(?:iva|igv|mwst|mehrwertsteuer|impuesto)\b(?:\s*\(?\s*\d{{1,2}}(?:[.,]\d{{1,2}})?\s*%\s*\)?)?[\s:]*{CURRENCY}{AMOUNT}"
            ),
        ),
        header(
            HeaderField::Tax,
            format!(
                r"(?i)\b(?:ust|vat|tax)\b(?:\s*\(?\s*\d{{1,2}}(?:[.,]\d{{1,2}})?\s*%\s*\)?)?[\s:]*{CURRENCY}{AMOUNT}"
            ),
        ),

        // Total
        header(
            HeaderField::Total,
            format!(
                r"(?im)(?:^|[^\w\-])(?:total\s+a\s+pagar|importe\s+total|total\s+due|amount\s+due|gesamtbetrag|gesamtsumme|total)\b[\s:]*{CURRENCY}{AMOUNT}"
            ),
        ),
        header(
            HeaderField::Total,
            format!(r"(?i)\b(?:summe|suma)\b[\s:]*{CURRENCY}{AMOUNT}"),
        ),
        header(
            HeaderField::Total,
            format!(r"(?im)^[ \t]*(?:[€$£]|EUR|USD)[ \t]*{AMOUNT}[ \t]*$"),
        ),
    ];

    /// Positional line-item layouts, tried in order.
    pub static ref LINE_PATTERNS: Vec<LinePattern> = vec![
        // name, quantity, unit price, total
        line(
            format!(r"(?i){NAME}\s+{QUANTITY}\s+(?:x\s*)?{PRICE}\s+{PRICE}"),
            [Column::Text, Column::Number, Column::Number, Column::Number],
        ),
        // name, unit price, quantity, total
        line(
            format!(r"(?i){NAME}\s+{PRICE}\s+{QUANTITY}\s+{PRICE}"),
            [Column::Text, Column::Number, Column::Number, Column::Number],
        ),
        // quantity, name, unit price, total
        line(
            format!(r"(?i){QUANTITY}\s+{NAME}\s+{PRICE}\s+{PRICE}"),
            [Column::Number, Column::Text, Column::Number, Column::Number],
        ),
    ];

    /// A token made only of digits.
    pub static ref BARE_INTEGER: Regex = Regex::new(r"^\d+$").unwrap();

    /// Any numeric token, including grouped and decimal forms.
    pub static ref NUMBER_TOKEN: Regex = Regex::new(r"\d+(?:[.,]\d+)*").unwrap();

    /// Header, summary and date lines that never describe a product.
    pub static ref SUMMARY_LINE: Regex = Regex::new(
        r"(?i)\b(?:sub-?total|total|iva|igv|vat|mwst|ust|tax|summe|suma|factura|invoice|rechnung|fecha|datum|date|nif|cif|ruc)\b|\d{1,2}[/\-.]\d{1,2}[/\-.]\d{2,4}"
    ).unwrap();
}
