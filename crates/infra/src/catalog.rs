//! Read-only boundary to the item catalog.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use stockbook_core::{ItemId, StockError, StockResult};
use stockbook_inventory::Item;

/// Source of item conversion factors, thresholds and prices.
///
/// The catalog module owns items; the stock core only reads them.
pub trait ItemCatalog: Send + Sync {
    fn item(&self, item_id: ItemId) -> StockResult<Option<Item>>;

    fn items(&self) -> StockResult<Vec<Item>>;

    /// Like `item`, but a missing item is an error.
    fn require_item(&self, item_id: ItemId) -> StockResult<Item> {
        self.item(item_id)?
            .ok_or_else(|| StockError::not_found(format!("item {item_id}")))
    }
}

impl<C> ItemCatalog for Arc<C>
where
    C: ItemCatalog + ?Sized,
{
    fn item(&self, item_id: ItemId) -> StockResult<Option<Item>> {
        (**self).item(item_id)
    }

    fn items(&self) -> StockResult<Vec<Item>> {
        (**self).items()
    }
}

/// In-memory catalog for tests/dev and for callers that mirror the catalog locally.
#[derive(Debug, Default)]
pub struct InMemoryItemCatalog {
    items: RwLock<HashMap<ItemId, Item>>,
}

impl InMemoryItemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        Self {
            items: RwLock::new(items.into_iter().map(|i| (i.id, i)).collect()),
        }
    }

    pub fn upsert(&self, item: Item) -> StockResult<()> {
        let mut items = self
            .items
            .write()
            .map_err(|_| StockError::persistence("catalog lock poisoned"))?;
        items.insert(item.id, item);
        Ok(())
    }
}

impl ItemCatalog for InMemoryItemCatalog {
    fn item(&self, item_id: ItemId) -> StockResult<Option<Item>> {
        let items = self
            .items
            .read()
            .map_err(|_| StockError::persistence("catalog lock poisoned"))?;
        Ok(items.get(&item_id).cloned())
    }

    fn items(&self) -> StockResult<Vec<Item>> {
        let items = self
            .items
            .read()
            .map_err(|_| StockError::persistence("catalog lock poisoned"))?;
        let mut all: Vec<Item> = items.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(all)
    }
}
