//! Transactional inventory storage.
//!
//! The reconciliation engine only talks to these traits. A transaction owns
//! every lock it takes until [`StockTransaction::commit`] or
//! [`StockTransaction::rollback`]; dropping it unfinished rolls it back.

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

pub use memory::{MemoryStore, MemoryTransaction, ProductRow, ProviderRow, StoreSnapshot};
#[cfg(feature = "postgres")]
pub use postgres::{PgStore, PgTransaction, SCHEMA};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::catalog::{InvoiceId, InvoiceItemId, ProductId, TenantId};
use crate::models::inventory::{
    InvoiceItemRecord, InvoiceRecord, NewInvoice, NewInvoiceItem, StockMovement, StockMutation,
};

/// How a product name is matched when binding a stored line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameMatch {
    /// Case-insensitive equality.
    Exact,
    /// Case-insensitive substring.
    Contains,
}

/// Opens transactions.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    type Tx: StockTransaction;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;
}

/// One all-or-nothing unit of work.
#[async_trait]
pub trait StockTransaction: Send {
    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<InvoiceId, StoreError>;

    async fn insert_item(&mut self, item: &NewInvoiceItem) -> Result<InvoiceItemId, StoreError>;

    /// Exclusively lock the product row owned by `tenant`, apply the
    /// mutation and append a ledger row.
    ///
    /// Returns `Ok(None)` without touching anything when no product with
    /// this id belongs to `tenant`. The lock is held until the transaction
    /// ends.
    async fn lock_and_update(
        &mut self,
        tenant: TenantId,
        product: ProductId,
        mutation: &StockMutation,
    ) -> Result<Option<StockMovement>, StoreError>;

    /// Exclusively lock an invoice of `tenant`. `Ok(None)` when it does not
    /// exist within that tenant.
    async fn lock_invoice(
        &mut self,
        tenant: TenantId,
        invoice: InvoiceId,
    ) -> Result<Option<InvoiceRecord>, StoreError>;

    /// Lines of an invoice that were never applied to stock, in id order.
    async fn unresolved_items(&mut self, invoice: InvoiceId) -> Result<Vec<InvoiceItemRecord>, StoreError>;

    /// First product of `tenant` whose name matches, lowest id first.
    async fn find_product(
        &mut self,
        tenant: TenantId,
        name: &str,
        mode: NameMatch,
    ) -> Result<Option<ProductId>, StoreError>;

    /// Bind a stored line to a product and mark it applied to stock.
    async fn mark_item_applied(&mut self, item: InvoiceItemId, product: ProductId) -> Result<(), StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}
