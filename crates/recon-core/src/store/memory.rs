//! In-process inventory store.
//!
//! Each product quantity sits behind its own `tokio::sync::Mutex`; a
//! transaction holds the owned guards of every product it touched until it
//! ends, so concurrent reconciliations on the same product serialize. Ledger
//! writes are buffered in the transaction and published at commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::{InventoryStore, NameMatch, StockTransaction};
use crate::error::StoreError;
use crate::models::catalog::{
    CatalogEntity, InvoiceId, InvoiceItemId, MovementId, ProductId, ProviderId, TenantId,
};
use crate::models::inventory::{
    InvoiceItemRecord, InvoiceRecord, NewInvoice, NewInvoiceItem, StockMovement, StockMutation,
};
use crate::resolve::CatalogSnapshot;

struct ProductSlot {
    tenant: TenantId,
    name: String,
    quantity: Arc<AsyncMutex<Decimal>>,
}

#[derive(Default)]
struct Ledger {
    invoices: BTreeMap<InvoiceId, InvoiceRecord>,
    items: BTreeMap<InvoiceItemId, InvoiceItemRecord>,
    movements: Vec<StockMovement>,
}

#[derive(Default)]
struct Inner {
    products: RwLock<BTreeMap<ProductId, Arc<ProductSlot>>>,
    providers: RwLock<BTreeMap<ProviderId, String>>,
    invoice_locks: Mutex<HashMap<InvoiceId, Arc<AsyncMutex<()>>>>,
    ledger: Mutex<Ledger>,
    next_id: AtomicI64,
}

impl Inner {
    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn ledger(&self) -> Result<MutexGuard<'_, Ledger>, StoreError> {
        self.ledger
            .lock()
            .map_err(|_| StoreError::Backend("ledger lock poisoned".to_string()))
    }

    fn product(&self, id: ProductId) -> Result<Option<Arc<ProductSlot>>, StoreError> {
        let products = self
            .products
            .read()
            .map_err(|_| StoreError::Backend("product index poisoned".to_string()))?;
        Ok(products.get(&id).cloned())
    }
}

/// Serializable image of a [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub providers: Vec<ProviderRow>,
    #[serde(default)]
    pub products: Vec<ProductRow>,
    #[serde(default)]
    pub invoices: Vec<InvoiceRecord>,
    #[serde(default)]
    pub items: Vec<InvoiceItemRecord>,
    #[serde(default)]
    pub movements: Vec<StockMovement>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRow {
    pub id: ProviderId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRow {
    pub id: ProductId,
    pub tenant: TenantId,
    pub name: String,
    pub quantity: Decimal,
}

/// Inventory store kept in memory. Cloning shares the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot. Ids keep increasing past the
    /// largest id in the snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let max_id = snapshot
            .providers
            .iter()
            .map(|p| p.id.0)
            .chain(snapshot.products.iter().map(|p| p.id.0))
            .chain(snapshot.invoices.iter().map(|i| i.id.0))
            .chain(snapshot.items.iter().map(|i| i.id.0))
            .chain(snapshot.movements.iter().map(|m| m.id.0))
            .max()
            .unwrap_or(0);

        let products = snapshot
            .products
            .into_iter()
            .map(|row| {
                let slot = ProductSlot {
                    tenant: row.tenant,
                    name: row.name,
                    quantity: Arc::new(AsyncMutex::new(row.quantity)),
                };
                (row.id, Arc::new(slot))
            })
            .collect();

        let ledger = Ledger {
            invoices: snapshot.invoices.into_iter().map(|i| (i.id, i)).collect(),
            items: snapshot.items.into_iter().map(|i| (i.id, i)).collect(),
            movements: snapshot.movements,
        };

        Self {
            inner: Arc::new(Inner {
                products: RwLock::new(products),
                providers: RwLock::new(snapshot.providers.into_iter().map(|p| (p.id, p.name)).collect()),
                invoice_locks: Mutex::new(HashMap::new()),
                ledger: Mutex::new(ledger),
                next_id: AtomicI64::new(max_id),
            }),
        }
    }

    /// Capture the committed state. Waits for in-flight transactions that
    /// hold product locks.
    pub async fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let slots: Vec<(ProductId, Arc<ProductSlot>)> = self
            .inner
            .products
            .read()
            .map_err(|_| StoreError::Backend("product index poisoned".to_string()))?
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        let mut products = Vec::with_capacity(slots.len());
        for (id, slot) in slots {
            let quantity = *slot.quantity.lock().await;
            products.push(ProductRow {
                id,
                tenant: slot.tenant,
                name: slot.name.clone(),
                quantity,
            });
        }

        let providers = self
            .inner
            .providers
            .read()
            .map_err(|_| StoreError::Backend("provider index poisoned".to_string()))?
            .iter()
            .map(|(id, name)| ProviderRow {
                id: *id,
                name: name.clone(),
            })
            .collect();

        let ledger = self.inner.ledger()?;
        Ok(StoreSnapshot {
            providers,
            products,
            invoices: ledger.invoices.values().cloned().collect(),
            items: ledger.items.values().cloned().collect(),
            movements: ledger.movements.clone(),
        })
    }

    pub fn insert_provider(&self, name: impl Into<String>) -> Result<ProviderId, StoreError> {
        let id = ProviderId(self.inner.next_id());
        self.inner
            .providers
            .write()
            .map_err(|_| StoreError::Backend("provider index poisoned".to_string()))?
            .insert(id, name.into());
        Ok(id)
    }

    pub fn insert_product(
        &self,
        tenant: TenantId,
        name: impl Into<String>,
        quantity: Decimal,
    ) -> Result<ProductId, StoreError> {
        let id = ProductId(self.inner.next_id());
        let slot = ProductSlot {
            tenant,
            name: name.into(),
            quantity: Arc::new(AsyncMutex::new(quantity)),
        };
        self.inner
            .products
            .write()
            .map_err(|_| StoreError::Backend("product index poisoned".to_string()))?
            .insert(id, Arc::new(slot));
        Ok(id)
    }

    /// Committed quantity of a product.
    pub async fn product_quantity(&self, id: ProductId) -> Result<Option<Decimal>, StoreError> {
        match self.inner.product(id)? {
            Some(slot) => Ok(Some(*slot.quantity.lock().await)),
            None => Ok(None),
        }
    }

    /// Committed ledger rows, oldest first.
    pub fn movements(&self) -> Result<Vec<StockMovement>, StoreError> {
        Ok(self.inner.ledger()?.movements.clone())
    }

    pub fn invoice(&self, id: InvoiceId) -> Result<Option<InvoiceRecord>, StoreError> {
        Ok(self.inner.ledger()?.invoices.get(&id).cloned())
    }

    /// Committed lines of an invoice, in id order.
    pub fn invoice_items(&self, invoice: InvoiceId) -> Result<Vec<InvoiceItemRecord>, StoreError> {
        Ok(self
            .inner
            .ledger()?
            .items
            .values()
            .filter(|i| i.item.invoice_id == invoice)
            .cloned()
            .collect())
    }

    /// Shared providers plus the products of every tenant.
    pub fn catalog(&self) -> Result<CatalogSnapshot, StoreError> {
        let mut entities: Vec<CatalogEntity> = self
            .inner
            .providers
            .read()
            .map_err(|_| StoreError::Backend("provider index poisoned".to_string()))?
            .iter()
            .map(|(id, name)| CatalogEntity::provider(*id, name.clone()))
            .collect();

        let products = self
            .inner
            .products
            .read()
            .map_err(|_| StoreError::Backend("product index poisoned".to_string()))?;
        entities.extend(
            products
                .iter()
                .map(|(id, slot)| CatalogEntity::product(*id, slot.tenant, slot.name.clone())),
        );

        Ok(CatalogSnapshot::new(entities))
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        Ok(MemoryTransaction {
            store: Arc::clone(&self.inner),
            products: BTreeMap::new(),
            invoice_guards: Vec::new(),
            locked_invoices: BTreeSet::new(),
            invoices: Vec::new(),
            items: BTreeMap::new(),
            movements: Vec::new(),
            finished: false,
        })
    }
}

/// Product lock held by a transaction, with the value to restore on rollback.
struct HeldProduct {
    guard: OwnedMutexGuard<Decimal>,
    original: Decimal,
}

/// Transaction over a [`MemoryStore`].
pub struct MemoryTransaction {
    store: Arc<Inner>,
    products: BTreeMap<ProductId, HeldProduct>,
    invoice_guards: Vec<OwnedMutexGuard<()>>,
    locked_invoices: BTreeSet<InvoiceId>,
    invoices: Vec<InvoiceRecord>,
    items: BTreeMap<InvoiceItemId, InvoiceItemRecord>,
    movements: Vec<StockMovement>,
    finished: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            Err(StoreError::Finished)
        } else {
            Ok(())
        }
    }

    fn restore(&mut self) {
        for held in self.products.values_mut() {
            *held.guard = held.original;
        }
    }

    /// Release invoice locks and forget the ones nobody else is waiting on.
    fn release_invoice_locks(&mut self) {
        self.invoice_guards.clear();
        let Ok(mut locks) = self.store.invoice_locks.lock() else {
            return;
        };
        for invoice in std::mem::take(&mut self.locked_invoices) {
            if locks.get(&invoice).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(&invoice);
            }
        }
    }

    fn invoice_record(&self, id: InvoiceId) -> Result<Option<InvoiceRecord>, StoreError> {
        if let Some(pending) = self.invoices.iter().find(|i| i.id == id) {
            return Ok(Some(pending.clone()));
        }
        Ok(self.store.ledger()?.invoices.get(&id).cloned())
    }
}

#[async_trait]
impl StockTransaction for MemoryTransaction {
    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<InvoiceId, StoreError> {
        self.ensure_open()?;
        let id = InvoiceId(self.store.next_id());
        self.invoices.push(InvoiceRecord {
            id,
            invoice: invoice.clone(),
        });
        Ok(id)
    }

    async fn insert_item(&mut self, item: &NewInvoiceItem) -> Result<InvoiceItemId, StoreError> {
        self.ensure_open()?;
        if self.invoice_record(item.invoice_id)?.is_none() {
            return Err(StoreError::MissingRow(format!("invoice {}", item.invoice_id)));
        }
        let id = InvoiceItemId(self.store.next_id());
        self.items.insert(id, InvoiceItemRecord { id, item: item.clone() });
        Ok(id)
    }

    async fn lock_and_update(
        &mut self,
        tenant: TenantId,
        product: ProductId,
        mutation: &StockMutation,
    ) -> Result<Option<StockMovement>, StoreError> {
        self.ensure_open()?;

        let Some(slot) = self.store.product(product)? else {
            return Ok(None);
        };
        if slot.tenant != tenant {
            warn!("Product {} is not owned by tenant {}", product, tenant);
            return Ok(None);
        }

        if !self.products.contains_key(&product) {
            let guard = Arc::clone(&slot.quantity).lock_owned().await;
            let original = *guard;
            debug!("Locked product {} at {}", product, original);
            self.products.insert(product, HeldProduct { guard, original });
        }
        let held = self
            .products
            .get_mut(&product)
            .ok_or_else(|| StoreError::Backend(format!("lost lock on product {}", product)))?;

        let previous_quantity = *held.guard;
        let new_quantity = previous_quantity + mutation.delta;
        *held.guard = new_quantity;

        let movement = StockMovement {
            id: MovementId(self.store.next_id()),
            tenant,
            product_id: product,
            movement_type: mutation.movement_type,
            quantity: mutation.delta,
            previous_quantity,
            new_quantity,
            reason: mutation.reason.clone(),
            reference: mutation.reference.clone(),
            created_at: Utc::now(),
        };
        self.movements.push(movement.clone());
        Ok(Some(movement))
    }

    async fn lock_invoice(
        &mut self,
        tenant: TenantId,
        invoice: InvoiceId,
    ) -> Result<Option<InvoiceRecord>, StoreError> {
        self.ensure_open()?;

        match self.invoice_record(invoice)? {
            Some(record) if record.invoice.tenant == tenant => {}
            _ => return Ok(None),
        }

        if self.locked_invoices.insert(invoice) {
            let lock = {
                let mut locks = self
                    .store
                    .invoice_locks
                    .lock()
                    .map_err(|_| StoreError::Backend("invoice locks poisoned".to_string()))?;
                Arc::clone(locks.entry(invoice).or_default())
            };
            self.invoice_guards.push(lock.lock_owned().await);
            debug!("Locked invoice {}", invoice);
        }

        // Re-read after acquiring the lock: a previous holder may have committed.
        self.invoice_record(invoice)
    }

    async fn unresolved_items(&mut self, invoice: InvoiceId) -> Result<Vec<InvoiceItemRecord>, StoreError> {
        self.ensure_open()?;

        let mut merged: BTreeMap<InvoiceItemId, InvoiceItemRecord> = self
            .store
            .ledger()?
            .items
            .iter()
            .filter(|(_, record)| record.item.invoice_id == invoice)
            .map(|(id, record)| (*id, record.clone()))
            .collect();
        for (id, record) in &self.items {
            if record.item.invoice_id == invoice {
                merged.insert(*id, record.clone());
            }
        }

        Ok(merged.into_values().filter(|r| !r.item.stock_updated).collect())
    }

    async fn find_product(
        &mut self,
        tenant: TenantId,
        name: &str,
        mode: NameMatch,
    ) -> Result<Option<ProductId>, StoreError> {
        self.ensure_open()?;

        let needle = name.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }

        let products = self
            .store
            .products
            .read()
            .map_err(|_| StoreError::Backend("product index poisoned".to_string()))?;
        Ok(products
            .iter()
            .filter(|(_, slot)| slot.tenant == tenant)
            .find(|(_, slot)| {
                let lowered = slot.name.to_lowercase();
                match mode {
                    NameMatch::Exact => lowered == needle,
                    NameMatch::Contains => lowered.contains(&needle),
                }
            })
            .map(|(id, _)| *id))
    }

    async fn mark_item_applied(&mut self, item: InvoiceItemId, product: ProductId) -> Result<(), StoreError> {
        self.ensure_open()?;

        if !self.items.contains_key(&item) {
            let committed = self
                .store
                .ledger()?
                .items
                .get(&item)
                .cloned()
                .ok_or_else(|| StoreError::MissingRow(format!("invoice item {}", item)))?;
            self.items.insert(item, committed);
        }

        let record = self
            .items
            .get_mut(&item)
            .ok_or_else(|| StoreError::MissingRow(format!("invoice item {}", item)))?;
        record.item.product_id = Some(product);
        record.item.stock_updated = true;
        Ok(())
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        self.ensure_open()?;

        {
            let mut ledger = self.store.ledger()?;
            for record in self.invoices.drain(..) {
                ledger.invoices.insert(record.id, record);
            }
            for (id, record) in std::mem::take(&mut self.items) {
                ledger.items.insert(id, record);
            }
            ledger.movements.append(&mut self.movements);
        }

        self.finished = true;
        debug!("Committed transaction holding {} product locks", self.products.len());
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.ensure_open()?;
        self.restore();
        self.finished = true;
        debug!("Rolled back transaction holding {} product locks", self.products.len());
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Transaction dropped without commit, rolling back");
            self.restore();
        }
        self.release_invoice_locks();
    }
}
