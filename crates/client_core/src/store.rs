use std::{
    collections::{HashSet, VecDeque},
    fmt,
    hash::Hash,
};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use shared::domain::FeedOrder;

pub trait Entity: DeserializeOwned + Clone + Send + Sync + 'static {
    type Id: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    const COLLECTION: &'static str;
    const SELECT: &'static str = "*";
    const ORDER_COLUMN: &'static str = "created_at";
    const SEARCH_COLUMN: Option<&'static str> = None;

    fn id(&self) -> Self::Id;
    fn created_at(&self) -> DateTime<Utc>;

    /// True when a pushed row lacks joined columns and has to be re-read before display.
    fn needs_enrichment(&self) -> bool {
        false
    }

    fn matches_search(&self, _term: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageOutcome {
    pub inserted: usize,
    pub full: bool,
}

/// Ordered list of entities with at most one entry per id.
///
/// Every mutation checks and inserts in one synchronous call, so two
/// completions for the same id can never both observe it as absent.
#[derive(Debug, Clone)]
pub struct EntityListStore<T: Entity> {
    items: VecDeque<T>,
    ids: HashSet<T::Id>,
}

impl<T: Entity> Default for EntityListStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> EntityListStore<T> {
    pub fn new() -> Self {
        Self {
            items: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    pub fn append_if_absent(&mut self, entity: T) -> bool {
        if !self.ids.insert(entity.id()) {
            return false;
        }
        self.items.push_back(entity);
        true
    }

    pub fn prepend_if_absent(&mut self, entity: T) -> bool {
        if !self.ids.insert(entity.id()) {
            return false;
        }
        self.items.push_front(entity);
        true
    }

    pub fn append_page(&mut self, page: Vec<T>, page_size: usize) -> PageOutcome {
        let full = page.len() >= page_size;
        let mut inserted = 0;
        for entity in page {
            if self.ids.insert(entity.id()) {
                self.items.push_back(entity);
                inserted += 1;
            }
        }
        PageOutcome { inserted, full }
    }

    pub fn restore_order(&mut self, order: FeedOrder) {
        self.items
            .make_contiguous()
            .sort_by(|a, b| match order {
                FeedOrder::OldestFirst => a.created_at().cmp(&b.created_at()),
                FeedOrder::NewestFirst => b.created_at().cmp(&a.created_at()),
            });
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.ids.clear();
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
