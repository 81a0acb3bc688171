//! Applies confirmed invoices to stock.
//!
//! A reconciliation is one store transaction: the invoice header, every line
//! and every stock movement commit together or not at all. Product locks are
//! taken in ascending id order so two reconciliations touching the same
//! products cannot deadlock.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{ReconcileError, StoreError};
use crate::models::catalog::{InvoiceId, ProductId, TenantId};
use crate::models::inventory::{
    ConfirmedInvoice, ConfirmedItem, Discrepancy, DiscrepancyAction, InvoiceItemRecord, InvoiceStatus,
    MovementType, NewInvoice, NewInvoiceItem, ReconcileOutcome, RetryOutcome, StockMutation,
};
use crate::resolve::name_fragment;
use crate::store::{InventoryStore, NameMatch, StockTransaction};

/// Characters of a stored line name used for the substring fallback on retry.
pub const DEFAULT_MATCH_PREFIX: usize = 15;

/// Reconciles confirmed invoices against an inventory store.
#[derive(Clone)]
pub struct ReconciliationEngine<S> {
    store: S,
    match_prefix_len: usize,
}

impl<S: InventoryStore> ReconciliationEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            match_prefix_len: DEFAULT_MATCH_PREFIX,
        }
    }

    /// Set how many leading characters of a line name the retry substring
    /// search uses.
    pub fn with_match_prefix(mut self, chars: usize) -> Self {
        self.match_prefix_len = chars.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persist a confirmed invoice and raise stock for every line bound to
    /// a product of `tenant`.
    ///
    /// Lines without a product, or bound to a product `tenant` does not own,
    /// are stored unapplied and reported as discrepancies.
    pub async fn reconcile(
        &self,
        confirmed: &ConfirmedInvoice,
        tenant: TenantId,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        validate(confirmed)?;

        let mut tx = self.store.begin().await.map_err(ReconcileError::TransactionFailure)?;
        match apply_invoice(&mut tx, confirmed, tenant).await {
            Ok(outcome) => {
                tx.commit().await.map_err(ReconcileError::TransactionFailure)?;
                info!(
                    "Reconciled invoice {} ({}): {} of {} lines applied, {} discrepancies",
                    outcome.invoice_id,
                    confirmed.invoice_number,
                    outcome.stock_updated_count,
                    outcome.items_processed,
                    outcome.discrepancies.len()
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!("Reconciliation of {} failed: {}", confirmed.invoice_number, e);
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(ReconcileError::TransactionFailure(e))
            }
        }
    }

    /// Re-attempt the lines of a stored invoice that were never applied.
    ///
    /// Each line is bound to the tenant's product with the same name
    /// (case-insensitive), falling back to a product whose name contains
    /// the line's leading characters. Running it again once everything is
    /// applied changes nothing.
    pub async fn retry_unresolved(
        &self,
        invoice: InvoiceId,
        tenant: TenantId,
    ) -> Result<RetryOutcome, ReconcileError> {
        let mut tx = self.store.begin().await.map_err(ReconcileError::TransactionFailure)?;
        match retry_in(&mut tx, invoice, tenant, self.match_prefix_len).await {
            Ok(Some(outcome)) => {
                tx.commit().await.map_err(ReconcileError::TransactionFailure)?;
                info!(
                    "Retried invoice {}: {} lines applied, {} still unresolved",
                    invoice,
                    outcome.updated_count,
                    outcome.still_unresolved.len()
                );
                Ok(outcome)
            }
            Ok(None) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(ReconcileError::InvoiceNotFound(invoice))
            }
            Err(e) => {
                warn!("Retry of invoice {} failed: {}", invoice, e);
                if let Err(rollback) = tx.rollback().await {
                    warn!("Rollback failed: {}", rollback);
                }
                Err(ReconcileError::TransactionFailure(e))
            }
        }
    }
}

fn validate(confirmed: &ConfirmedInvoice) -> Result<(), ReconcileError> {
    if confirmed.invoice_number.trim().is_empty() {
        return Err(ReconcileError::InvalidInvoice("invoice number is empty".to_string()));
    }
    if let Some(item) = confirmed.items.iter().find(|i| i.quantity.is_sign_negative() || i.quantity.is_zero()) {
        return Err(ReconcileError::InvalidInvoice(format!(
            "quantity for {} must be positive, got {}",
            item.product_name, item.quantity
        )));
    }
    Ok(())
}

fn intake(quantity: rust_decimal::Decimal, reason: String, invoice: InvoiceId) -> StockMutation {
    StockMutation {
        movement_type: MovementType::In,
        delta: quantity,
        reason,
        reference: invoice.to_string(),
    }
}

/// Bound lines by ascending product id, unbound lines last in input order.
fn lock_order(items: &[ConfirmedItem]) -> Vec<&ConfirmedItem> {
    let mut ordered: Vec<&ConfirmedItem> = items.iter().collect();
    ordered.sort_by_key(|item| (item.product_id.is_none(), item.product_id));
    ordered
}

async fn apply_invoice<T: StockTransaction>(
    tx: &mut T,
    confirmed: &ConfirmedInvoice,
    tenant: TenantId,
) -> Result<ReconcileOutcome, StoreError> {
    let invoice_id = tx
        .insert_invoice(&NewInvoice {
            tenant,
            invoice_number: confirmed.invoice_number.trim().to_string(),
            invoice_date: confirmed.invoice_date,
            provider_id: confirmed.provider_id,
            subtotal: confirmed.subtotal,
            tax: confirmed.tax,
            total: confirmed.total,
            ocr_text: confirmed.ocr_text.clone(),
            ocr_confidence: confirmed.ocr_confidence,
            status: InvoiceStatus::Processed,
            processed_at: Some(Utc::now()),
        })
        .await?;

    let reason = format!("Invoice {}", confirmed.invoice_number.trim());
    let mut discrepancies = Vec::new();
    let mut applied = 0;

    for item in lock_order(&confirmed.items) {
        let movement = match item.product_id {
            Some(product) => {
                let mutation = intake(item.quantity, reason.clone(), invoice_id);
                tx.lock_and_update(tenant, product, &mutation).await?
            }
            None => None,
        };

        let product_id = movement.as_ref().map(|m| m.product_id);
        tx.insert_item(&NewInvoiceItem {
            invoice_id,
            product_id,
            product_name: item.product_name.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            total_price: item.total_price,
            stock_updated: movement.is_some(),
        })
        .await?;

        match movement {
            Some(movement) => {
                applied += 1;
                debug!(
                    "Product {}: {} -> {}",
                    movement.product_id, movement.previous_quantity, movement.new_quantity
                );
            }
            None => {
                debug!("No product of tenant {} for line {}", tenant, item.product_name);
                discrepancies.push(Discrepancy {
                    product_name: item.product_name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    action: DiscrepancyAction::CreateNew,
                });
            }
        }
    }

    Ok(ReconcileOutcome {
        invoice_id,
        discrepancies,
        items_processed: confirmed.items.len(),
        stock_updated_count: applied,
    })
}

async fn resolve_line<T: StockTransaction>(
    tx: &mut T,
    tenant: TenantId,
    name: &str,
    prefix_len: usize,
) -> Result<Option<ProductId>, StoreError> {
    if let Some(product) = tx.find_product(tenant, name, NameMatch::Exact).await? {
        return Ok(Some(product));
    }
    match name_fragment(name, prefix_len) {
        Some(fragment) => tx.find_product(tenant, &fragment, NameMatch::Contains).await,
        None => Ok(None),
    }
}

async fn retry_in<T: StockTransaction>(
    tx: &mut T,
    invoice: InvoiceId,
    tenant: TenantId,
    prefix_len: usize,
) -> Result<Option<RetryOutcome>, StoreError> {
    let Some(record) = tx.lock_invoice(tenant, invoice).await? else {
        return Ok(None);
    };

    let mut resolved: Vec<(ProductId, InvoiceItemRecord)> = Vec::new();
    let mut still_unresolved = Vec::new();
    for item in tx.unresolved_items(invoice).await? {
        match resolve_line(tx, tenant, &item.item.product_name, prefix_len).await? {
            Some(product) => resolved.push((product, item)),
            None => still_unresolved.push(item.item.product_name),
        }
    }
    resolved.sort_by_key(|(product, _)| *product);

    let reason = format!("Invoice update {}", record.invoice.invoice_number);
    let mut updated_count = 0;
    for (product, item) in resolved {
        let mutation = intake(item.item.quantity, reason.clone(), invoice);
        match tx.lock_and_update(tenant, product, &mutation).await? {
            Some(_) => {
                tx.mark_item_applied(item.id, product).await?;
                updated_count += 1;
            }
            None => still_unresolved.push(item.item.product_name),
        }
    }

    Ok(Some(RetryOutcome {
        invoice_id: invoice,
        updated_count,
        still_unresolved,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::{InvoiceItemId, ProviderId};
    use crate::models::inventory::{InvoiceRecord, StockMovement};
    use crate::store::{MemoryStore, MemoryTransaction};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;

    const TENANT: TenantId = TenantId(1);
    const OTHER_TENANT: TenantId = TenantId(2);

    fn item(name: &str, product: Option<ProductId>, quantity: i64) -> ConfirmedItem {
        ConfirmedItem {
            product_name: name.to_string(),
            product_id: product,
            quantity: Decimal::from(quantity),
            unit_price: Decimal::from(2),
            total_price: Decimal::from(2 * quantity),
        }
    }

    fn invoice(number: &str, items: Vec<ConfirmedItem>) -> ConfirmedInvoice {
        ConfirmedInvoice {
            invoice_number: number.to_string(),
            invoice_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            provider_id: ProviderId(1),
            subtotal: Decimal::from(100),
            tax: Decimal::from(21),
            total: Decimal::from(121),
            ocr_text: String::new(),
            ocr_confidence: 0.8,
            items,
        }
    }

    async fn quantity(store: &MemoryStore, product: ProductId) -> Decimal {
        store.product_quantity(product).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_reconcile_applies_bound_lines() {
        let store = MemoryStore::new();
        let flour = store.insert_product(TENANT, "Harina", Decimal::from(5)).unwrap();
        let salt = store.insert_product(TENANT, "Sal", Decimal::ZERO).unwrap();
        let engine = ReconciliationEngine::new(store.clone());

        let outcome = engine
            .reconcile(
                &invoice(
                    "F-1",
                    vec![
                        item("Sal fina", Some(salt), 3),
                        item("Aceite", None, 2),
                        item("Harina 000", Some(flour), 10),
                    ],
                ),
                TENANT,
            )
            .await
            .unwrap();

        assert_eq!(outcome.items_processed, 3);
        assert_eq!(outcome.stock_updated_count, 2);
        assert_eq!(
            outcome.discrepancies,
            vec![Discrepancy {
                product_name: "Aceite".to_string(),
                quantity: Decimal::from(2),
                unit_price: Decimal::from(2),
                action: DiscrepancyAction::CreateNew,
            }]
        );
        assert_eq!(quantity(&store, flour).await, Decimal::from(15));
        assert_eq!(quantity(&store, salt).await, Decimal::from(3));

        let movements = store.movements().unwrap();
        let products: Vec<ProductId> = movements.iter().map(|m| m.product_id).collect();
        assert_eq!(products, vec![flour, salt]);
        assert!(movements.iter().all(|m| m.reason == "Invoice F-1"));
        assert!(movements.iter().all(|m| m.reference == outcome.invoice_id.to_string()));
        assert!(movements.iter().all(|m| m.new_quantity == m.previous_quantity + m.quantity));

        let header = store.invoice(outcome.invoice_id).unwrap().unwrap();
        assert_eq!(header.invoice.status, InvoiceStatus::Processed);
        assert!(header.invoice.processed_at.is_some());

        let items = store.invoice_items(outcome.invoice_id).unwrap();
        let flags: Vec<(String, bool)> = items
            .iter()
            .map(|i| (i.item.product_name.clone(), i.item.stock_updated))
            .collect();
        assert_eq!(
            flags,
            vec![
                ("Harina 000".to_string(), true),
                ("Sal fina".to_string(), true),
                ("Aceite".to_string(), false),
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_invoice_opens_no_transaction() {
        let store = MemoryStore::new();
        let flour = store.insert_product(TENANT, "Harina", Decimal::from(5)).unwrap();
        let engine = ReconciliationEngine::new(store.clone());

        let zero = engine
            .reconcile(&invoice("F-1", vec![item("Harina", Some(flour), 0)]), TENANT)
            .await;
        assert!(matches!(zero, Err(ReconcileError::InvalidInvoice(_))));

        let negative = engine
            .reconcile(&invoice("F-1", vec![item("Harina", Some(flour), -4)]), TENANT)
            .await;
        assert!(matches!(negative, Err(ReconcileError::InvalidInvoice(_))));

        let unnumbered = engine
            .reconcile(&invoice("  ", vec![item("Harina", Some(flour), 1)]), TENANT)
            .await;
        assert!(matches!(unnumbered, Err(ReconcileError::InvalidInvoice(_))));

        assert_eq!(quantity(&store, flour).await, Decimal::from(5));
        assert!(store.snapshot().await.unwrap().invoices.is_empty());
    }

    #[tokio::test]
    async fn test_foreign_product_becomes_discrepancy() {
        let store = MemoryStore::new();
        let theirs = store.insert_product(OTHER_TENANT, "Harina", Decimal::from(50)).unwrap();
        let engine = ReconciliationEngine::new(store.clone());

        let outcome = engine
            .reconcile(&invoice("F-1", vec![item("Harina", Some(theirs), 10)]), TENANT)
            .await
            .unwrap();

        assert_eq!(outcome.stock_updated_count, 0);
        assert_eq!(outcome.discrepancies.len(), 1);
        assert_eq!(quantity(&store, theirs).await, Decimal::from(50));
        assert!(store.movements().unwrap().is_empty());

        let items = store.invoice_items(outcome.invoice_id).unwrap();
        assert_eq!(items[0].item.product_id, None);
        assert!(!items[0].item.stock_updated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reconciliations_do_not_lose_updates() {
        let store = MemoryStore::new();
        let flour = store.insert_product(TENANT, "Harina", Decimal::from(100)).unwrap();
        let engine = ReconciliationEngine::new(store.clone());

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .reconcile(&invoice("F-1", vec![item("Harina", Some(flour), 10)]), TENANT)
                    .await
            })
        };
        let second = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .reconcile(&invoice("F-2", vec![item("Harina", Some(flour), 20)]), TENANT)
                    .await
            })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(quantity(&store, flour).await, Decimal::from(130));
        let movements = store.movements().unwrap();
        assert_eq!(movements.len(), 2);
        assert!(movements.iter().all(|m| m.new_quantity == m.previous_quantity + m.quantity));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_invoices_lock_in_id_order() {
        let store = MemoryStore::new();
        let a = store.insert_product(TENANT, "Harina", Decimal::ZERO).unwrap();
        let b = store.insert_product(TENANT, "Sal", Decimal::ZERO).unwrap();
        let engine = ReconciliationEngine::new(store.clone());

        let mut handles = Vec::new();
        for n in 0..8 {
            let engine = engine.clone();
            let items = if n % 2 == 0 {
                vec![item("Harina", Some(a), 1), item("Sal", Some(b), 1)]
            } else {
                vec![item("Sal", Some(b), 1), item("Harina", Some(a), 1)]
            };
            handles.push(tokio::spawn(async move {
                engine.reconcile(&invoice(&format!("F-{}", n), items), TENANT).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(quantity(&store, a).await, Decimal::from(8));
        assert_eq!(quantity(&store, b).await, Decimal::from(8));
        assert_eq!(store.movements().unwrap().len(), 16);
    }

    /// Delegates to a memory transaction but fails the n-th stock update.
    struct FailingStore {
        inner: MemoryStore,
        fail_at: usize,
    }

    struct FailingTransaction {
        inner: MemoryTransaction,
        updates: usize,
        fail_at: usize,
    }

    #[async_trait]
    impl InventoryStore for FailingStore {
        type Tx = FailingTransaction;

        async fn begin(&self) -> Result<FailingTransaction, StoreError> {
            Ok(FailingTransaction {
                inner: self.inner.begin().await?,
                updates: 0,
                fail_at: self.fail_at,
            })
        }
    }

    #[async_trait]
    impl StockTransaction for FailingTransaction {
        async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<InvoiceId, StoreError> {
            self.inner.insert_invoice(invoice).await
        }

        async fn insert_item(&mut self, item: &NewInvoiceItem) -> Result<InvoiceItemId, StoreError> {
            self.inner.insert_item(item).await
        }

        async fn lock_and_update(
            &mut self,
            tenant: TenantId,
            product: ProductId,
            mutation: &StockMutation,
        ) -> Result<Option<StockMovement>, StoreError> {
            self.updates += 1;
            if self.updates == self.fail_at {
                return Err(StoreError::Backend("connection reset".to_string()));
            }
            self.inner.lock_and_update(tenant, product, mutation).await
        }

        async fn lock_invoice(
            &mut self,
            tenant: TenantId,
            invoice: InvoiceId,
        ) -> Result<Option<InvoiceRecord>, StoreError> {
            self.inner.lock_invoice(tenant, invoice).await
        }

        async fn unresolved_items(&mut self, invoice: InvoiceId) -> Result<Vec<InvoiceItemRecord>, StoreError> {
            self.inner.unresolved_items(invoice).await
        }

        async fn find_product(
            &mut self,
            tenant: TenantId,
            name: &str,
            mode: NameMatch,
        ) -> Result<Option<ProductId>, StoreError> {
            self.inner.find_product(tenant, name, mode).await
        }

        async fn mark_item_applied(&mut self, item: InvoiceItemId, product: ProductId) -> Result<(), StoreError> {
            self.inner.mark_item_applied(item, product).await
        }

        async fn commit(self) -> Result<(), StoreError> {
            self.inner.commit().await
        }

        async fn rollback(self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_failure_mid_invoice_rolls_back_everything() {
        let store = MemoryStore::new();
        let products: Vec<ProductId> = (0..5)
            .map(|n| store.insert_product(TENANT, format!("Producto {}", n), Decimal::from(100)).unwrap())
            .collect();
        let engine = ReconciliationEngine::new(FailingStore {
            inner: store.clone(),
            fail_at: 3,
        });

        let items = products
            .iter()
            .enumerate()
            .map(|(n, id)| item(&format!("Producto {}", n), Some(*id), 10))
            .collect();
        let result = engine.reconcile(&invoice("F-1", items), TENANT).await;

        assert!(matches!(result, Err(ReconcileError::TransactionFailure(_))));
        for product in products {
            assert_eq!(quantity(&store, product).await, Decimal::from(100));
        }
        assert!(store.movements().unwrap().is_empty());
        let snapshot = store.snapshot().await.unwrap();
        assert!(snapshot.invoices.is_empty());
        assert!(snapshot.items.is_empty());
    }

    #[tokio::test]
    async fn test_retry_binds_new_products_once() {
        let store = MemoryStore::new();
        let engine = ReconciliationEngine::new(store.clone());

        let outcome = engine
            .reconcile(
                &invoice(
                    "F-7",
                    vec![
                        item("HARINA DE TRIGO 000 x 1KG", None, 4),
                        item("Aceite de oliva", None, 2),
                        item("Levadura", None, 1),
                    ],
                ),
                TENANT,
            )
            .await
            .unwrap();
        assert_eq!(outcome.discrepancies.len(), 3);

        let flour = store.insert_product(TENANT, "Harina de trigo", Decimal::from(1)).unwrap();
        let oil = store.insert_product(TENANT, "aceite de oliva", Decimal::ZERO).unwrap();
        store.insert_product(OTHER_TENANT, "Levadura", Decimal::ZERO).unwrap();

        let retry = engine.retry_unresolved(outcome.invoice_id, TENANT).await.unwrap();
        assert_eq!(retry.updated_count, 2);
        assert_eq!(retry.still_unresolved, vec!["Levadura".to_string()]);
        assert_eq!(quantity(&store, flour).await, Decimal::from(5));
        assert_eq!(quantity(&store, oil).await, Decimal::from(2));

        let movements = store.movements().unwrap();
        assert_eq!(movements.len(), 2);
        assert!(movements.iter().all(|m| m.reason == "Invoice update F-7"));

        let again = engine.retry_unresolved(outcome.invoice_id, TENANT).await.unwrap();
        assert_eq!(again.updated_count, 0);
        assert_eq!(again.still_unresolved, vec!["Levadura".to_string()]);
        assert_eq!(quantity(&store, flour).await, Decimal::from(5));
        assert_eq!(store.movements().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retry_respects_prefix_length() {
        let store = MemoryStore::new();
        let engine = ReconciliationEngine::new(store.clone()).with_match_prefix(6);

        let outcome = engine
            .reconcile(&invoice("F-8", vec![item("Harina integral", None, 2)]), TENANT)
            .await
            .unwrap();
        let flour = store.insert_product(TENANT, "Harina 000", Decimal::ZERO).unwrap();

        let retry = engine.retry_unresolved(outcome.invoice_id, TENANT).await.unwrap();
        assert_eq!(retry.updated_count, 1);
        assert_eq!(quantity(&store, flour).await, Decimal::from(2));
    }

    #[tokio::test]
    async fn test_retry_unknown_or_foreign_invoice() {
        let store = MemoryStore::new();
        let engine = ReconciliationEngine::new(store.clone());
        let outcome = engine
            .reconcile(&invoice("F-9", vec![item("Harina", None, 1)]), TENANT)
            .await
            .unwrap();

        let foreign = engine.retry_unresolved(outcome.invoice_id, OTHER_TENANT).await;
        assert!(matches!(foreign, Err(ReconcileError::InvoiceNotFound(id)) if id == outcome.invoice_id));

        let missing = engine.retry_unresolved(InvoiceId(9_999), TENANT).await;
        assert!(matches!(missing, Err(ReconcileError::InvoiceNotFound(_))));
    }
}
