//! Postgres inventory store.
//!
//! Row locks come from `SELECT ... FOR UPDATE`; a dropped transaction is
//! rolled back by the driver.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, info};

use super::{InventoryStore, NameMatch, StockTransaction};
use crate::error::StoreError;
use crate::models::catalog::{
    CatalogEntity, InvoiceId, InvoiceItemId, MovementId, ProductId, ProviderId, TenantId,
};
use crate::models::inventory::{
    InvoiceItemRecord, InvoiceRecord, InvoiceStatus, NewInvoice, NewInvoiceItem, StockMovement,
    StockMutation,
};
use crate::resolve::CatalogSnapshot;

/// Tables used by [`PgStore`]. Amounts are unconstrained `NUMERIC` so
/// stored values keep every decimal place.
pub const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS providers (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS products (
        id BIGSERIAL PRIMARY KEY,
        tenant_id BIGINT NOT NULL,
        name TEXT NOT NULL,
        quantity NUMERIC NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoices (
        id BIGSERIAL PRIMARY KEY,
        tenant_id BIGINT NOT NULL,
        invoice_number TEXT NOT NULL,
        invoice_date DATE NOT NULL,
        provider_id BIGINT NOT NULL,
        subtotal NUMERIC NOT NULL,
        tax NUMERIC NOT NULL DEFAULT 0,
        total NUMERIC NOT NULL,
        ocr_text TEXT NOT NULL DEFAULT '',
        ocr_confidence REAL NOT NULL DEFAULT 0,
        status TEXT NOT NULL,
        processed_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS invoice_items (
        id BIGSERIAL PRIMARY KEY,
        invoice_id BIGINT NOT NULL REFERENCES invoices (id),
        product_id BIGINT REFERENCES products (id),
        product_name TEXT NOT NULL,
        quantity NUMERIC NOT NULL,
        unit_price NUMERIC NOT NULL,
        total_price NUMERIC NOT NULL,
        stock_updated BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS stock_movements (
        id BIGSERIAL PRIMARY KEY,
        tenant_id BIGINT NOT NULL,
        product_id BIGINT NOT NULL REFERENCES products (id),
        movement_type TEXT NOT NULL,
        quantity NUMERIC NOT NULL,
        previous_quantity NUMERIC NOT NULL,
        new_quantity NUMERIC NOT NULL,
        reason TEXT NOT NULL,
        reference_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];

/// Inventory store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!("Connected to Postgres with up to {} connections", max_connections);
        Ok(Self { pool })
    }

    /// Create missing tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Shared providers plus the products of `tenant`.
    pub async fn catalog(&self, tenant: TenantId) -> Result<CatalogSnapshot, StoreError> {
        let providers = sqlx::query("SELECT id, name FROM providers ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        let products = sqlx::query("SELECT id, name FROM products WHERE tenant_id = $1 ORDER BY id")
            .bind(tenant.0)
            .fetch_all(&self.pool)
            .await?;

        let mut entities = Vec::with_capacity(providers.len() + products.len());
        for row in providers {
            entities.push(CatalogEntity::provider(
                ProviderId(row.try_get("id")?),
                row.try_get::<String, _>("name")?,
            ));
        }
        for row in products {
            entities.push(CatalogEntity::product(
                ProductId(row.try_get("id")?),
                tenant,
                row.try_get::<String, _>("name")?,
            ));
        }
        Ok(CatalogSnapshot::new(entities))
    }
}

#[async_trait]
impl InventoryStore for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self) -> Result<PgTransaction, StoreError> {
        Ok(PgTransaction {
            tx: self.pool.begin().await?,
        })
    }
}

/// Transaction over a [`PgStore`].
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

fn invoice_from_row(row: &PgRow) -> Result<InvoiceRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let status = InvoiceStatus::parse(&status)
        .ok_or_else(|| StoreError::Backend(format!("unknown invoice status {}", status)))?;

    Ok(InvoiceRecord {
        id: InvoiceId(row.try_get("id")?),
        invoice: NewInvoice {
            tenant: TenantId(row.try_get("tenant_id")?),
            invoice_number: row.try_get("invoice_number")?,
            invoice_date: row.try_get("invoice_date")?,
            provider_id: ProviderId(row.try_get("provider_id")?),
            subtotal: row.try_get("subtotal")?,
            tax: row.try_get("tax")?,
            total: row.try_get("total")?,
            ocr_text: row.try_get("ocr_text")?,
            ocr_confidence: row.try_get("ocr_confidence")?,
            status,
            processed_at: row.try_get("processed_at")?,
        },
    })
}

fn item_from_row(row: &PgRow) -> Result<InvoiceItemRecord, StoreError> {
    Ok(InvoiceItemRecord {
        id: InvoiceItemId(row.try_get("id")?),
        item: NewInvoiceItem {
            invoice_id: InvoiceId(row.try_get("invoice_id")?),
            product_id: row.try_get::<Option<i64>, _>("product_id")?.map(ProductId),
            product_name: row.try_get("product_name")?,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
            total_price: row.try_get("total_price")?,
            stock_updated: row.try_get("stock_updated")?,
        },
    })
}

#[async_trait]
impl StockTransaction for PgTransaction {
    async fn insert_invoice(&mut self, invoice: &NewInvoice) -> Result<InvoiceId, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO invoices (tenant_id, invoice_number, invoice_date, provider_id,
                                  subtotal, tax, total, ocr_text, ocr_confidence,
                                  status, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(invoice.tenant.0)
        .bind(&invoice.invoice_number)
        .bind(invoice.invoice_date)
        .bind(invoice.provider_id.0)
        .bind(invoice.subtotal)
        .bind(invoice.tax)
        .bind(invoice.total)
        .bind(&invoice.ocr_text)
        .bind(invoice.ocr_confidence)
        .bind(invoice.status.as_str())
        .bind(invoice.processed_at)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(InvoiceId(row.try_get("id")?))
    }

    async fn insert_item(&mut self, item: &NewInvoiceItem) -> Result<InvoiceItemId, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO invoice_items (invoice_id, product_id, product_name, quantity,
                                       unit_price, total_price, stock_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(item.invoice_id.0)
        .bind(item.product_id.map(|p| p.0))
        .bind(&item.product_name)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.total_price)
        .bind(item.stock_updated)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(InvoiceItemId(row.try_get("id")?))
    }

    async fn lock_and_update(
        &mut self,
        tenant: TenantId,
        product: ProductId,
        mutation: &StockMutation,
    ) -> Result<Option<StockMovement>, StoreError> {
        let locked = sqlx::query("SELECT quantity FROM products WHERE id = $1 AND tenant_id = $2 FOR UPDATE")
            .bind(product.0)
            .bind(tenant.0)
            .fetch_optional(&mut *self.tx)
            .await?;
        let Some(locked) = locked else {
            return Ok(None);
        };

        let previous_quantity: rust_decimal::Decimal = locked.try_get("quantity")?;
        let new_quantity = previous_quantity + mutation.delta;

        sqlx::query("UPDATE products SET quantity = $1, updated_at = now() WHERE id = $2")
            .bind(new_quantity)
            .bind(product.0)
            .execute(&mut *self.tx)
            .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO stock_movements (tenant_id, product_id, movement_type, quantity,
                                         previous_quantity, new_quantity, reason, reference_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, created_at
            "#,
        )
        .bind(tenant.0)
        .bind(product.0)
        .bind(mutation.movement_type.as_str())
        .bind(mutation.delta)
        .bind(previous_quantity)
        .bind(new_quantity)
        .bind(&mutation.reason)
        .bind(&mutation.reference)
        .fetch_one(&mut *self.tx)
        .await?;

        debug!("Product {} moved {} -> {}", product, previous_quantity, new_quantity);

        Ok(Some(StockMovement {
            id: MovementId(row.try_get("id")?),
            tenant,
            product_id: product,
            movement_type: mutation.movement_type,
            quantity: mutation.delta,
            previous_quantity,
            new_quantity,
            reason: mutation.reason.clone(),
            reference: mutation.reference.clone(),
            created_at: row.try_get("created_at")?,
        }))
    }

    async fn lock_invoice(
        &mut self,
        tenant: TenantId,
        invoice: InvoiceId,
    ) -> Result<Option<InvoiceRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, invoice_number, invoice_date, provider_id, subtotal, tax,
                   total, ocr_text, ocr_confidence, status, processed_at
            FROM invoices
            WHERE id = $1 AND tenant_id = $2
            FOR UPDATE
            "#,
        )
        .bind(invoice.0)
        .bind(tenant.0)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn unresolved_items(&mut self, invoice: InvoiceId) -> Result<Vec<InvoiceItemRecord>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, invoice_id, product_id, product_name, quantity, unit_price,
                   total_price, stock_updated
            FROM invoice_items
            WHERE invoice_id = $1 AND stock_updated = FALSE
            ORDER BY id
            "#,
        )
        .bind(invoice.0)
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    async fn find_product(
        &mut self,
        tenant: TenantId,
        name: &str,
        mode: NameMatch,
    ) -> Result<Option<ProductId>, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }

        let sql = match mode {
            NameMatch::Exact => {
                "SELECT id FROM products WHERE tenant_id = $1 AND lower(name) = lower($2) ORDER BY id LIMIT 1"
            }
            NameMatch::Contains => {
                "SELECT id FROM products WHERE tenant_id = $1 AND strpos(lower(name), lower($2)) > 0 ORDER BY id LIMIT 1"
            }
        };

        let row = sqlx::query(sql)
            .bind(tenant.0)
            .bind(name)
            .fetch_optional(&mut *self.tx)
            .await?;

        match row {
            Some(row) => Ok(Some(ProductId(row.try_get("id")?))),
            None => Ok(None),
        }
    }

    async fn mark_item_applied(&mut self, item: InvoiceItemId, product: ProductId) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE invoice_items SET product_id = $1, stock_updated = TRUE WHERE id = $2")
            .bind(product.0)
            .bind(item.0)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::MissingRow(format!("invoice item {}", item)));
        }
        Ok(())
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
