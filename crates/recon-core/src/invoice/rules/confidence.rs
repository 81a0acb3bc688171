//! Extraction confidence scoring.

use crate::models::invoice::{ExtractedHeader, ExtractedLineItem};

const NUMBER_WEIGHT: f32 = 1.0;
const DATE_WEIGHT: f32 = 1.0;
const TOTAL_WEIGHT: f32 = 1.0;
const PROVIDER_WEIGHT: f32 = 0.5;
const BREAKDOWN_WEIGHT: f32 = 0.5;
const PER_ITEM_BONUS: f32 = 0.1;
const MAX_ITEM_BONUS: f32 = 1.0;
const DENOMINATOR: f32 = 5.0;

/// Score an extraction in `[0, 1]`.
///
/// Depends only on which fields were recovered and how many items were
/// found, never on their values.
pub fn score(header: &ExtractedHeader, items: &[ExtractedLineItem]) -> f32 {
    let mut weighted = 0.0;

    if header.invoice_number.is_some() {
        weighted += NUMBER_WEIGHT;
    }
    if header.invoice_date.is_some() {
        weighted += DATE_WEIGHT;
    }
    if header.total.is_some() {
        weighted += TOTAL_WEIGHT;
    }
    if header.provider_name.is_some() {
        weighted += PROVIDER_WEIGHT;
    }
    if header.subtotal.is_some() || header.tax.is_some() {
        weighted += BREAKDOWN_WEIGHT;
    }

    weighted += (items.len() as f32 * PER_ITEM_BONUS).min(MAX_ITEM_BONUS);

    (weighted / DENOMINATOR).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn line() -> ExtractedLineItem {
        ExtractedLineItem {
            product_name: "Harina".to_string(),
            quantity: Some(Decimal::ONE),
            unit_price: None,
            total_price: None,
        }
    }

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_empty_extraction_scores_zero() {
        assert_eq!(score(&ExtractedHeader::default(), &[]), 0.0);
    }

    #[test]
    fn test_core_fields() {
        let header = ExtractedHeader {
            invoice_number: Some("INV-1".to_string()),
            invoice_date: NaiveDate::from_ymd_opt(2024, 3, 5),
            total: Some(Decimal::new(15000, 2)),
            ..Default::default()
        };
        assert!(approx(score(&header, &[]), 0.6));
    }

    #[test]
    fn test_subtotal_or_tax_counts_once() {
        let header = ExtractedHeader {
            subtotal: Some(Decimal::ONE),
            tax: Some(Decimal::ONE),
            ..Default::default()
        };
        assert!(approx(score(&header, &[]), 0.1));
    }

    #[test]
    fn test_item_bonus_is_capped() {
        let items: Vec<_> = (0..3).map(|_| line()).collect();
        assert!(approx(score(&ExtractedHeader::default(), &items), 0.06));

        let many: Vec<_> = (0..40).map(|_| line()).collect();
        assert!(approx(score(&ExtractedHeader::default(), &many), 0.2));
    }

    #[test]
    fn test_full_extraction_is_capped_at_one() {
        let header = ExtractedHeader {
            invoice_number: Some("INV-1".to_string()),
            invoice_date: NaiveDate::from_ymd_opt(2024, 3, 5),
            provider_name: Some("Andina".to_string()),
            subtotal: Some(Decimal::ONE),
            tax: Some(Decimal::ONE),
            total: Some(Decimal::ONE),
        };
        let items: Vec<_> = (0..20).map(|_| line()).collect();
        assert_eq!(score(&header, &items), 1.0);
    }
}
