//! # Entity Cache
//!
//! Local mirror of quotes, customers and line items, keyed by the entity's
//! current id (temporary or real). The UI renders straight from here.

use std::sync::Arc;

use fieldquote_core::{Customer, EntityId, LineItem, Quote};

use crate::error::DbResult;
use crate::store::{Collection, DurableStore};

/// Repository for cached entities.
#[derive(Clone)]
pub struct EntityCache {
    store: Arc<dyn DurableStore>,
}

impl EntityCache {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        EntityCache { store }
    }

    // =========================================================================
    // Quotes
    // =========================================================================

    pub async fn put_quote(&self, quote: &Quote) -> DbResult<()> {
        self.store
            .put_as(Collection::Quotes, quote.id.as_str(), quote)
            .await
    }

    pub async fn get_quote(&self, id: &EntityId) -> DbResult<Option<Quote>> {
        self.store.get_as(Collection::Quotes, id.as_str()).await
    }

    pub async fn list_quotes(&self) -> DbResult<Vec<Quote>> {
        self.store.get_all_as(Collection::Quotes).await
    }

    /// Writes a quote and new line items together.
    pub async fn put_quote_with_items(&self, quote: &Quote, items: &[LineItem]) -> DbResult<()> {
        let mut tx = self
            .store
            .begin(&[Collection::Quotes, Collection::LineItems])
            .await?;
        tx.put_as(Collection::Quotes, quote.id.as_str(), quote).await?;
        for item in items {
            tx.put_as(Collection::LineItems, &item.id, item).await?;
        }
        tx.commit().await
    }

    // =========================================================================
    // Customers
    // =========================================================================

    pub async fn put_customer(&self, customer: &Customer) -> DbResult<()> {
        self.store
            .put_as(Collection::Customers, customer.id.as_str(), customer)
            .await
    }

    pub async fn get_customer(&self, id: &EntityId) -> DbResult<Option<Customer>> {
        self.store.get_as(Collection::Customers, id.as_str()).await
    }

    pub async fn list_customers(&self) -> DbResult<Vec<Customer>> {
        self.store.get_all_as(Collection::Customers).await
    }

    // =========================================================================
    // Line Items
    // =========================================================================

    /// Line items attached to a quote, oldest first.
    pub async fn line_items_for(&self, quote_id: &EntityId) -> DbResult<Vec<LineItem>> {
        let mut items: Vec<LineItem> = self
            .store
            .get_all_as::<LineItem>(Collection::LineItems)
            .await?
            .into_iter()
            .filter(|item| &item.quote_id == quote_id)
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sqlite_store;
    use fieldquote_core::{LineItemInput, QuoteInput};

    #[tokio::test]
    async fn test_quote_with_items() {
        let cache = EntityCache::new(sqlite_store().await);
        let mut quote = Quote::from_input(
            EntityId::from("tmp-q1"),
            QuoteInput {
                title: "Kitchen tap".to_string(),
                ..Default::default()
            },
        );
        let items: Vec<LineItem> = [("Tap", 1, 8900), ("Labour", 2, 4500)]
            .into_iter()
            .map(|(description, quantity, unit_price_cents)| {
                LineItem::from_input(
                    quote.id.clone(),
                    LineItemInput {
                        description: description.to_string(),
                        quantity,
                        unit_price_cents,
                    },
                )
            })
            .collect();
        quote.recompute_total(&items);
        cache.put_quote_with_items(&quote, &items).await.unwrap();

        let stored = cache.get_quote(&quote.id).await.unwrap().unwrap();
        assert_eq!(stored.total_cents, 17_900);
        assert_eq!(cache.line_items_for(&quote.id).await.unwrap().len(), 2);
        assert!(cache
            .line_items_for(&EntityId::from("q-other"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(cache.list_quotes().await.unwrap().len(), 1);
    }
}
