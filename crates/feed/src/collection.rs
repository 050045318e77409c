use std::collections::HashMap;

use foundation::ItemId;

use crate::protocol::Item;

/// Session-local set of fetched items, deduplicated by identifier.
///
/// - Insertion order is kept so list views render rows in fetch order.
/// - The first copy of an identifier wins; later copies are ignored, which is
///   what makes merging overlapping fetch results idempotent.
#[derive(Debug, Default, Clone)]
pub struct ItemCollection {
    items: Vec<Item>,
    index: HashMap<ItemId, usize>,
}

impl ItemCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.index.get(id).map(|&i| &self.items[i])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Item> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[Item] {
        &self.items
    }

    /// Returns `true` if the item was new.
    pub fn insert(&mut self, item: Item) -> bool {
        if self.index.contains_key(&item.id) {
            return false;
        }
        self.index.insert(item.id.clone(), self.items.len());
        self.items.push(item);
        true
    }

    /// Inserts every item not already present and returns copies of the ones
    /// that were new, in input order.
    pub fn merge<I>(&mut self, items: I) -> Vec<Item>
    where
        I: IntoIterator<Item = Item>,
    {
        let mut added = Vec::new();
        for item in items {
            if self.contains(&item.id) {
                continue;
            }
            added.push(item.clone());
            self.insert(item);
        }
        added
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
    }
}

impl<'a> IntoIterator for &'a ItemCollection {
    type Item = &'a Item;
    type IntoIter = std::slice::Iter<'a, Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
