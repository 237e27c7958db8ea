//! Ordered item metadata, addressed by the same positions as the vector index.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

/// An indexed found item.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedItem {
    pub id: String,
    /// Raw description as supplied by the caller
    pub description: String,
    pub category: String,
    /// Cached output of `normalize(description)`
    pub normalized_text: String,
    /// Hash of id + normalized text, ties a cached vector to this item
    pub content_hash: u64,
    pub created_at: DateTime<Utc>,
}

/// Append-only list of item records plus an id lookup.
#[derive(Debug, Default)]
pub struct MetadataStore {
    items: Vec<IndexedItem>,
    by_id: HashMap<String, usize>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            by_id: HashMap::with_capacity(capacity),
        }
    }

    /// Append a record and return its position.
    ///
    /// Callers check `contains` first; a repeated id keeps pointing at the
    /// earliest position.
    pub fn append(&mut self, item: IndexedItem) -> usize {
        let position = self.items.len();
        self.by_id.entry(item.id.clone()).or_insert(position);
        self.items.push(item);
        position
    }

    pub fn get(&self, position: usize) -> Option<&IndexedItem> {
        self.items.get(position)
    }

    pub fn all(&self) -> &[IndexedItem] {
        &self.items
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
