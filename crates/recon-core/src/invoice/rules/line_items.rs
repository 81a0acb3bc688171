//! Line-item extraction.
//!
//! Each line is tried against the positional layouts first; lines that fit
//! none of them go through a looser token heuristic.

use rust_decimal::Decimal;
use tracing::trace;

use super::patterns::{BARE_INTEGER, LINE_PATTERNS, NUMBER_TOKEN, SUMMARY_LINE};
use super::{Column, FieldExtractor, LinePattern, clean_text, parse_amount};
use crate::models::invoice::ExtractedLineItem;

/// Quantities at or above this value in a heuristic line are misreads.
const IMPLAUSIBLE_QUANTITY: i64 = 100;

/// Numeric tokens considered by the heuristic fallback.
const FALLBACK_TOKENS: usize = 3;

/// Recovers `(name, quantity, unit price, total price)` tuples.
pub struct LineItemExtractor {
    patterns: &'static [LinePattern],
    min_line_len: usize,
    max_items: usize,
    max_name_len: usize,
}

impl LineItemExtractor {
    pub fn new() -> Self {
        Self {
            patterns: &LINE_PATTERNS,
            min_line_len: 10,
            max_items: 20,
            max_name_len: 50,
        }
    }

    pub fn with_min_line_len(mut self, min_line_len: usize) -> Self {
        self.min_line_len = min_line_len;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_max_name_len(mut self, max_name_len: usize) -> Self {
        self.max_name_len = max_name_len;
        self
    }

    /// Extract a single line, or `None` if it does not look like a product.
    pub fn extract_line(&self, line: &str) -> Option<ExtractedLineItem> {
        let line = line.trim();
        if line.chars().count() < self.min_line_len || SUMMARY_LINE.is_match(line) {
            return None;
        }

        self.patterns
            .iter()
            .find_map(|pattern| self.positional(pattern, line))
            .or_else(|| self.heuristic(line))
    }

    fn positional(&self, pattern: &LinePattern, line: &str) -> Option<ExtractedLineItem> {
        let caps = pattern.regex.captures(line)?;

        let mut name = None;
        let mut numbers: Vec<(&str, Decimal)> = Vec::with_capacity(3);
        for (index, column) in pattern.columns.iter().enumerate() {
            let raw = caps.get(index + 1)?.as_str();
            match column {
                Column::Text => name = Some(self.tidy_name(raw)?),
                Column::Number => numbers.push((raw, parse_amount(raw)?)),
            }
        }

        // Quantity is the first bare integer. Without one the layout does
        // not apply and later layouts or the heuristic decide.
        let quantity_index = numbers
            .iter()
            .position(|(raw, _)| BARE_INTEGER.is_match(raw))?;
        let (_, quantity) = numbers.remove(quantity_index);

        let unit_price = numbers.iter().map(|(_, v)| *v).min();
        let total_price = numbers.iter().map(|(_, v)| *v).max();

        trace!("positional match {:?} on {:?}", pattern.regex.as_str(), line);
        Some(ExtractedLineItem {
            product_name: name?,
            quantity: Some(quantity),
            unit_price,
            total_price,
        })
    }

    fn heuristic(&self, line: &str) -> Option<ExtractedLineItem> {
        if line.chars().filter(|c| c.is_alphabetic()).count() < 3 {
            return None;
        }

        let tokens: Vec<_> = NUMBER_TOKEN.find_iter(line).take(FALLBACK_TOKENS).collect();
        if tokens.len() < 2 {
            return None;
        }

        let name = self.tidy_name(&line[..tokens[0].start()])?;

        let quantity = parse_amount(tokens[0].as_str()).map(|q| {
            if q >= Decimal::from(IMPLAUSIBLE_QUANTITY) {
                Decimal::ONE
            } else {
                q
            }
        });
        let prices: Vec<Decimal> = tokens[1..]
            .iter()
            .filter_map(|t| parse_amount(t.as_str()))
            .collect();

        trace!("heuristic match on {:?}", line);
        Some(ExtractedLineItem {
            product_name: name,
            quantity,
            unit_price: prices.iter().min().copied(),
            total_price: prices.iter().max().copied(),
        })
    }

    /// Whitespace-collapse and trim separators; a name needs a letter.
    fn tidy_name(&self, raw: &str) -> Option<String> {
        let cleaned = clean_text(raw, self.max_name_len);
        let trimmed = cleaned.trim_matches(|c: char| {
            c.is_whitespace() || matches!(c, ':' | '-' | '|' | '*' | '.' | ',' | '$' | '€' | '£')
        });
        trimmed
            .chars()
            .any(char::is_alphabetic)
            .then(|| trimmed.to_string())
    }
}

impl Default for LineItemExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldExtractor for LineItemExtractor {
    type Output = Vec<ExtractedLineItem>;

    fn extract(&self, text: &str) -> Vec<ExtractedLineItem> {
        text.lines()
            .filter_map(|line| self.extract_line(line))
            .take(self.max_items)
            .collect()
    }
}
