//! Catalog identifiers, entities and resolver suggestions.

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// A tenant (restaurant account).
    TenantId
);
id_type!(
    /// A product in a tenant's catalog.
    ProductId
);
id_type!(
    /// A provider in the shared provider catalog.
    ProviderId
);
id_type!(
    /// A persisted invoice.
    InvoiceId
);
id_type!(
    /// A persisted invoice line.
    InvoiceItemId
);
id_type!(
    /// A stock movement ledger row.
    MovementId
);

/// Kind of catalog entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Supplier of goods; providers are shared between tenants.
    Provider,
    /// Stocked product; always owned by a single tenant.
    Product,
}

/// A catalog entry that extracted names can be matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntity {
    /// Provider or product id, depending on `kind`.
    pub id: i64,

    /// Display name.
    pub name: String,

    /// Entity kind.
    pub kind: EntityKind,

    /// Owning tenant. `None` for shared providers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<TenantId>,
}

impl CatalogEntity {
    pub fn provider(id: ProviderId, name: impl Into<String>) -> Self {
        Self {
            id: id.0,
            name: name.into(),
            kind: EntityKind::Provider,
            tenant: None,
        }
    }

    pub fn product(id: ProductId, tenant: TenantId, name: impl Into<String>) -> Self {
        Self {
            id: id.0,
            name: name.into(),
            kind: EntityKind::Product,
            tenant: Some(tenant),
        }
    }
}

/// Advisory match between an extracted name and a catalog entry.
///
/// Suggestions never bind anything; the operator picks the final id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: EntityKind,

    /// Catalog id of the suggested entity.
    pub id: i64,

    /// Catalog name of the suggested entity.
    pub name: String,

    /// Extracted text that produced this suggestion.
    #[serde(rename = "match")]
    pub matched_text: String,
}
