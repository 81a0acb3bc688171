//! Fuzzy resolution of extracted names against the catalog.
//!
//! Resolution is advisory: it produces ranked suggestions and never binds
//! an extracted line to a catalog entry.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::catalog::{CatalogEntity, EntityKind, Suggestion, TenantId};
use crate::models::config::ResolverConfig;
use crate::models::invoice::ExtractedInvoice;

/// Read access to a catalog.
pub trait CatalogLookup {
    /// Entities of `kind` visible to `tenant` whose name contains `fragment`
    /// (case-insensitive), best match first, at most `limit` of them.
    ///
    /// Providers are shared between tenants; products are only visible to
    /// their owner.
    fn search(&self, kind: EntityKind, tenant: TenantId, fragment: &str, limit: usize) -> Vec<CatalogEntity>;
}

/// An in-memory copy of a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub entities: Vec<CatalogEntity>,
}

impl CatalogSnapshot {
    pub fn new(entities: Vec<CatalogEntity>) -> Self {
        Self { entities }
    }
}

impl CatalogLookup for CatalogSnapshot {
    fn search(&self, kind: EntityKind, tenant: TenantId, fragment: &str, limit: usize) -> Vec<CatalogEntity> {
        let needle = fragment.to_lowercase();
        if needle.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut hits: Vec<(&CatalogEntity, String)> = self
            .entities
            .iter()
            .filter(|e| e.kind == kind)
            .filter(|e| match kind {
                EntityKind::Provider => true,
                EntityKind::Product => e.tenant == Some(tenant),
            })
            .map(|e| (e, e.name.to_lowercase()))
            .filter(|(_, lowered)| lowered.contains(&needle))
            .collect();

        hits.sort_by(|(a, a_lower), (b, b_lower)| rank(&needle, a, a_lower, b, b_lower));
        hits.into_iter().take(limit).map(|(e, _)| e.clone()).collect()
    }
}

/// Exact match, then prefix match, then shorter name, then lower id.
fn rank(needle: &str, a: &CatalogEntity, a_lower: &str, b: &CatalogEntity, b_lower: &str) -> Ordering {
    let exact = |s: &str| s != needle;
    let prefix = |s: &str| !s.starts_with(needle);

    exact(a_lower)
        .cmp(&exact(b_lower))
        .then_with(|| prefix(a_lower).cmp(&prefix(b_lower)))
        .then_with(|| a.name.chars().count().cmp(&b.name.chars().count()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Leading `max_chars` characters of a name, trimmed. `None` when blank.
pub fn name_fragment(name: &str, max_chars: usize) -> Option<String> {
    let fragment: String = name.trim().chars().take(max_chars).collect();
    let fragment = fragment.trim();
    (!fragment.is_empty()).then(|| fragment.to_string())
}

/// Produces catalog suggestions for an extraction result.
pub struct EntityResolver {
    config: ResolverConfig,
}

impl EntityResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    /// Providers matching `name`, at most the configured provider limit.
    pub fn suggest_providers<C: CatalogLookup + ?Sized>(
        &self,
        catalog: &C,
        tenant: TenantId,
        name: &str,
    ) -> Vec<Suggestion> {
        self.suggest_kind(
            catalog,
            tenant,
            EntityKind::Provider,
            name,
            self.config.provider_prefix_len,
            self.config.provider_limit,
        )
    }

    /// Products of `tenant` matching `name`, at most the configured product limit.
    pub fn suggest_products<C: CatalogLookup + ?Sized>(
        &self,
        catalog: &C,
        tenant: TenantId,
        name: &str,
    ) -> Vec<Suggestion> {
        self.suggest_kind(
            catalog,
            tenant,
            EntityKind::Product,
            name,
            self.config.product_prefix_len,
            self.config.product_limit,
        )
    }

    /// Provider suggestions for the header followed by product suggestions
    /// for each line, without duplicates.
    pub fn suggest<C: CatalogLookup + ?Sized>(
        &self,
        catalog: &C,
        tenant: TenantId,
        extraction: &ExtractedInvoice,
    ) -> Vec<Suggestion> {
        let mut suggestions = Vec::new();

        if let Some(provider) = &extraction.header.provider_name {
            suggestions.extend(self.suggest_providers(catalog, tenant, provider));
        }
        for item in &extraction.items {
            suggestions.extend(self.suggest_products(catalog, tenant, &item.product_name));
        }

        let mut seen = HashSet::new();
        suggestions.retain(|s| seen.insert((s.kind, s.id, s.matched_text.clone())));

        debug!("Resolved {} suggestions for tenant {}", suggestions.len(), tenant);
        suggestions
    }

    fn suggest_kind<C: CatalogLookup + ?Sized>(
        &self,
        catalog: &C,
        tenant: TenantId,
        kind: EntityKind,
        name: &str,
        prefix_len: usize,
        limit: usize,
    ) -> Vec<Suggestion> {
        let Some(fragment) = name_fragment(name, prefix_len) else {
            return Vec::new();
        };

        catalog
            .search(kind, tenant, &fragment, limit)
            .into_iter()
            .map(|entity| Suggestion {
                kind,
                id: entity.id,
                name: entity.name,
                matched_text: name.trim().to_string(),
            })
            .collect()
    }
}

impl Default for EntityResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::catalog::{ProductId, ProviderId};
    use crate::models::invoice::{ExtractedHeader, ExtractedLineItem};
    use pretty_assertions::assert_eq;

    const TENANT_A: TenantId = TenantId(1);
    const TENANT_B: TenantId = TenantId(2);

    fn catalog() -> CatalogSnapshot {
        CatalogSnapshot::new(vec![
            CatalogEntity::provider(ProviderId(1), "Distribuidora Andina Sur"),
            CatalogEntity::provider(ProviderId(2), "Distribuidora Andina"),
            CatalogEntity::provider(ProviderId(3), "Gran Distribuidora Andina"),
            CatalogEntity::provider(ProviderId(4), "Distribuidora Andina Norte"),
            CatalogEntity::product(ProductId(10), TENANT_A, "Tomate pera"),
            CatalogEntity::product(ProductId(11), TENANT_A, "Tomates frescos"),
            CatalogEntity::product(ProductId(12), TENANT_A, "Salsa de tomates frescos"),
            CatalogEntity::product(ProductId(20), TENANT_B, "Tomates frescos"),
        ])
    }

    fn ids(suggestions: &[Suggestion]) -> Vec<i64> {
        suggestions.iter().map(|s| s.id).collect()
    }

    #[test]
    fn test_name_fragment() {
        assert_eq!(name_fragment("  Distribuidora Andina S.A.  ", 20), Some("Distribuidora Andina".to_string()));
        assert_eq!(name_fragment("Queso manchego curado", 15), Some("Queso manchego".to_string()));
        assert_eq!(name_fragment("   ", 15), None);
    }

    #[test]
    fn test_provider_ranking_and_limit() {
        let resolver = EntityResolver::default();
        let suggestions = resolver.suggest_providers(&catalog(), TENANT_A, "DISTRIBUIDORA ANDINA S.A.");

        // exact, then prefix matches by length, then the substring match is cut
        assert_eq!(ids(&suggestions), vec![2, 1, 4]);
        assert!(suggestions.iter().all(|s| s.kind == EntityKind::Provider));
        assert_eq!(suggestions[0].matched_text, "DISTRIBUIDORA ANDINA S.A.");
    }

    #[test]
    fn test_products_are_tenant_scoped() {
        let resolver = EntityResolver::default();

        let for_a = resolver.suggest_products(&catalog(), TENANT_A, "Tomates frescos");
        assert_eq!(ids(&for_a), vec![11, 12]);

        let for_b = resolver.suggest_products(&catalog(), TENANT_B, "Tomates frescos");
        assert_eq!(ids(&for_b), vec![20]);

        let for_other = resolver.suggest_products(&catalog(), TenantId(99), "Tomates frescos");
        assert!(for_other.is_empty());
    }

    #[test]
    fn test_suggest_for_extraction() {
        let extraction = ExtractedInvoice {
            success: true,
            header: ExtractedHeader {
                provider_name: Some("Gran Distribuidora".to_string()),
                ..Default::default()
            },
            items: vec![
                ExtractedLineItem {
                    product_name: "Tomate pera".to_string(),
                    quantity: None,
                    unit_price: None,
                    total_price: None,
                },
                ExtractedLineItem {
                    product_name: "Tomate pera".to_string(),
                    quantity: None,
                    unit_price: None,
                    total_price: None,
                },
            ],
            confidence: 0.2,
            raw_text: String::new(),
            suggestions: Vec::new(),
            error: None,
        };

        let suggestions = EntityResolver::default().suggest(&catalog(), TENANT_A, &extraction);
        let kinds_and_ids: Vec<(EntityKind, i64)> = suggestions.iter().map(|s| (s.kind, s.id)).collect();
        assert_eq!(kinds_and_ids, vec![(EntityKind::Provider, 3), (EntityKind::Product, 10)]);
    }

    #[test]
    fn test_blank_names_do_not_search() {
        let resolver = EntityResolver::default();
        assert!(resolver.suggest_products(&catalog(), TENANT_A, "  ").is_empty());
        assert!(catalog().search(EntityKind::Provider, TENANT_A, "", 3).is_empty());
    }
}
