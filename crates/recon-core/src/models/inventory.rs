//! Confirmed invoices, persisted invoice records and the stock ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::catalog::{InvoiceId, InvoiceItemId, MovementId, ProductId, ProviderId, TenantId};

/// An invoice confirmed by an operator, ready to be reconciled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmedInvoice {
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub provider_id: ProviderId,
    pub subtotal: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    pub total: Decimal,

    /// Recognized text the confirmation was based on.
    #[serde(default)]
    pub ocr_text: String,

    /// Extraction confidence the operator saw.
    #[serde(default)]
    pub ocr_confidence: f32,

    pub items: Vec<ConfirmedItem>,
}

/// A confirmed line, optionally bound to a catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedItem {
    pub product_name: String,

    /// Product chosen by the operator. `None` leaves the line unresolved.
    #[serde(default)]
    pub product_id: Option<ProductId>,

    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

/// Lifecycle of a persisted invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvoiceStatus {
    Pending,
    Processed,
    Failed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "PENDING",
            InvoiceStatus::Processed => "PROCESSED",
            InvoiceStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(InvoiceStatus::Pending),
            "PROCESSED" => Some(InvoiceStatus::Processed),
            "FAILED" => Some(InvoiceStatus::Failed),
            _ => None,
        }
    }
}

/// Invoice header row as written by a reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewInvoice {
    pub tenant: TenantId,
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub provider_id: ProviderId,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub ocr_text: String,
    pub ocr_confidence: f32,
    pub status: InvoiceStatus,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Persisted invoice header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: InvoiceId,
    #[serde(flatten)]
    pub invoice: NewInvoice,
}

/// Invoice line as written by a reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewInvoiceItem {
    pub invoice_id: InvoiceId,
    pub product_id: Option<ProductId>,
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,

    /// Whether this line has already been applied to stock.
    pub stock_updated: bool,
}

/// Persisted invoice line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceItemRecord {
    pub id: InvoiceItemId,
    #[serde(flatten)]
    pub item: NewInvoiceItem,
}

/// Direction of a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementType {
    In,
    Out,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::In => "IN",
            MovementType::Out => "OUT",
            MovementType::Adjustment => "ADJUSTMENT",
        }
    }
}

/// Requested change to a product's quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMutation {
    pub movement_type: MovementType,
    /// Signed quantity delta.
    pub delta: Decimal,
    pub reason: String,
    /// Reference to the originating document (invoice id).
    pub reference: String,
}

/// Immutable stock ledger row.
///
/// `new_quantity == previous_quantity + quantity` holds for every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub tenant: TenantId,
    pub product_id: ProductId,
    pub movement_type: MovementType,
    pub quantity: Decimal,
    pub previous_quantity: Decimal,
    pub new_quantity: Decimal,
    pub reason: String,
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

/// Action proposed for an unresolved line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyAction {
    CreateNew,
}

/// A confirmed line that could not be bound to a product of the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub product_name: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub action: DiscrepancyAction,
}

/// Response of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    pub invoice_id: InvoiceId,
    pub discrepancies: Vec<Discrepancy>,
    pub items_processed: usize,
    pub stock_updated_count: usize,
}

/// Response of a retry over the unresolved lines of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOutcome {
    pub invoice_id: InvoiceId,
    pub updated_count: usize,
    pub still_unresolved: Vec<String>,
}
