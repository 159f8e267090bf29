//! Keeps one view's entity list consistent with the backend.
//!
//! Network work (page queries, point fetches for pushed rows) runs on spawned
//! tasks and reports back through a bounded completion queue. Only the task
//! owning the controller drains that queue, so the store has a single writer.
//! Each completion carries the generation it was issued under; anything from
//! an older generation (a previous filter, or a torn-down view) is dropped.

use std::sync::Arc;

use serde_json::Value;
use shared::domain::FeedOrder;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    backend::{Filter, RowQuery, RowStore},
    error::{ClientError, ClientResult},
    store::{Entity, EntityListStore},
};

const COMPLETION_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    LoadingInitial,
    Ready,
    LoadingMore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedConfig {
    pub order: FeedOrder,
    pub page_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page_size: usize,
    pub has_more: bool,
}

pub enum Completion<T> {
    Page {
        generation: u64,
        offset: usize,
        result: ClientResult<Vec<T>>,
    },
    Enriched {
        generation: u64,
        id: String,
        result: ClientResult<T>,
    },
}

pub struct ReconciliationController<T: Entity> {
    rows: Arc<dyn RowStore>,
    order: FeedOrder,
    store: EntityListStore<T>,
    cursor: PageCursor,
    phase: LoadPhase,
    search: Option<String>,
    generation: u64,
    last_error: Option<String>,
    completions_tx: mpsc::Sender<Completion<T>>,
    completions_rx: mpsc::Receiver<Completion<T>>,
    in_flight: Vec<JoinHandle<()>>,
}

impl<T: Entity> ReconciliationController<T> {
    pub fn new(rows: Arc<dyn RowStore>, config: FeedConfig) -> Self {
        let (completions_tx, completions_rx) = mpsc::channel(COMPLETION_QUEUE_CAPACITY);
        Self {
            rows,
            order: config.order,
            store: EntityListStore::new(),
            cursor: PageCursor {
                page_size: config.page_size.max(1),
                has_more: true,
            },
            phase: LoadPhase::Idle,
            search: None,
            generation: 0,
            last_error: None,
            completions_tx,
            completions_rx,
            in_flight: Vec::new(),
        }
    }

    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    pub fn store(&self) -> &EntityListStore<T> {
        &self.store
    }

    pub fn has_more(&self) -> bool {
        self.cursor.has_more
    }

    pub fn cursor(&self) -> PageCursor {
        self.cursor
    }

    pub fn search(&self) -> Option<&str> {
        self.search.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Issues the initial page. Only valid from `Idle`; after a failed load the
    /// caller re-triggers through here.
    pub fn start(&mut self) -> bool {
        if self.phase != LoadPhase::Idle {
            debug!(
                collection = T::COLLECTION,
                phase = ?self.phase,
                "initial load already issued"
            );
            return false;
        }
        self.phase = LoadPhase::LoadingInitial;
        self.spawn_page(0);
        true
    }

    pub fn load_more(&mut self) -> bool {
        if self.phase != LoadPhase::Ready || !self.cursor.has_more {
            debug!(
                collection = T::COLLECTION,
                phase = ?self.phase,
                has_more = self.cursor.has_more,
                "pagination trigger ignored"
            );
            return false;
        }
        self.phase = LoadPhase::LoadingMore;
        self.spawn_page(self.store.len());
        true
    }

    /// Switches the search term. A change drops the current list and cursor
    /// and issues page 0 for the new term in the same call.
    pub fn set_search(&mut self, term: &str) -> bool {
        let term = term.trim();
        let next = (!term.is_empty()).then(|| term.to_string());
        if next == self.search {
            return false;
        }
        self.search = next;
        self.restart();
        true
    }

    pub fn reload(&mut self) {
        self.restart();
    }

    fn restart(&mut self) {
        self.invalidate();
        self.store.clear();
        self.cursor.has_more = true;
        self.last_error = None;
        self.phase = LoadPhase::LoadingInitial;
        self.spawn_page(0);
    }

    pub fn handle_row_inserted(&mut self, collection: &str, record: Value) {
        if collection != T::COLLECTION {
            return;
        }

        let entity: T = match serde_json::from_value(record) {
            Ok(entity) => entity,
            Err(error) => {
                warn!(collection, %error, "dropping malformed pushed row");
                return;
            }
        };

        if let Some(term) = &self.search {
            if !entity.matches_search(term) {
                debug!(collection, id = %entity.id(), "pushed row outside active search");
                return;
            }
        }

        if entity.needs_enrichment() {
            self.spawn_enrichment(entity.id());
        } else {
            self.insert_pushed(entity);
        }
    }

    pub async fn next_completion(&mut self) -> Option<Completion<T>> {
        self.completions_rx.recv().await
    }

    pub fn apply(&mut self, completion: Completion<T>) {
        match completion {
            Completion::Page {
                generation,
                offset,
                result,
            } => {
                if generation != self.generation {
                    debug!(collection = T::COLLECTION, offset, "discarding stale page");
                    return;
                }
                self.apply_page(offset, result);
            }
            Completion::Enriched {
                generation,
                id,
                result,
            } => {
                if generation != self.generation {
                    debug!(collection = T::COLLECTION, %id, "discarding stale point fetch");
                    return;
                }
                match result {
                    Ok(entity) => self.insert_pushed(entity),
                    Err(error) => {
                        warn!(collection = T::COLLECTION, %id, %error, "failed to enrich pushed row");
                    }
                }
            }
        }
    }

    pub async fn pump(&mut self) -> bool {
        match self.next_completion().await {
            Some(completion) => {
                self.apply(completion);
                true
            }
            None => false,
        }
    }

    /// Tears the view down: pending work is aborted and its results ignored.
    pub fn shutdown(&mut self) {
        self.invalidate();
        self.store.clear();
        self.phase = LoadPhase::Idle;
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        for handle in self.in_flight.drain(..) {
            handle.abort();
        }
    }

    fn apply_page(&mut self, offset: usize, result: ClientResult<Vec<T>>) {
        let initial = self.phase == LoadPhase::LoadingInitial;
        match result {
            Ok(page) => {
                let pushed_first = initial && !self.store.is_empty();
                let outcome = self.store.append_page(page, self.cursor.page_size);
                if pushed_first {
                    self.store.restore_order(self.order);
                }
                self.cursor.has_more = outcome.full;
                self.phase = LoadPhase::Ready;
                self.last_error = None;
                info!(
                    collection = T::COLLECTION,
                    offset,
                    inserted = outcome.inserted,
                    total = self.store.len(),
                    has_more = self.cursor.has_more,
                    "page loaded"
                );
            }
            Err(error) => {
                warn!(collection = T::COLLECTION, offset, %error, "page load failed");
                self.last_error = Some(error.to_string());
                self.phase = if initial {
                    LoadPhase::Idle
                } else {
                    LoadPhase::Ready
                };
            }
        }
    }

    fn insert_pushed(&mut self, entity: T) {
        let id = entity.id();
        let inserted = match self.order {
            FeedOrder::OldestFirst => self.store.append_if_absent(entity),
            FeedOrder::NewestFirst => self.store.prepend_if_absent(entity),
        };
        debug!(collection = T::COLLECTION, %id, inserted, "pushed row merged");
    }

    fn page_query(&self, offset: usize) -> RowQuery {
        let mut query = RowQuery::select(T::SELECT)
            .order_by(T::ORDER_COLUMN, self.order.ascending())
            .range(offset, self.cursor.page_size);
        if let (Some(term), Some(column)) = (&self.search, T::SEARCH_COLUMN) {
            query = query.filter(Filter::contains(column, term));
        }
        query
    }

    fn spawn_page(&mut self, offset: usize) {
        let query = self.page_query(offset);
        let rows = Arc::clone(&self.rows);
        let tx = self.completions_tx.clone();
        let generation = self.generation;
        self.track(tokio::spawn(async move {
            let result = match rows.query(T::COLLECTION, &query).await {
                Ok(raw) => serde_json::from_value::<Vec<T>>(Value::Array(raw))
                    .map_err(|err| ClientError::malformed(T::COLLECTION, err)),
                Err(err) => Err(err),
            };
            let _ = tx
                .send(Completion::Page {
                    generation,
                    offset,
                    result,
                })
                .await;
        }));
    }

    fn spawn_enrichment(&mut self, id: T::Id) {
        let rows = Arc::clone(&self.rows);
        let tx = self.completions_tx.clone();
        let generation = self.generation;
        let id = id.to_string();
        self.track(tokio::spawn(async move {
            let result = match rows.point_fetch(T::COLLECTION, &id, T::SELECT).await {
                Ok(raw) => serde_json::from_value::<T>(raw)
                    .map_err(|err| ClientError::malformed(T::COLLECTION, err)),
                Err(err) => Err(err),
            };
            let _ = tx
                .send(Completion::Enriched {
                    generation,
                    id,
                    result,
                })
                .await;
        }));
    }

    fn track(&mut self, handle: JoinHandle<()>) {
        self.in_flight.retain(|pending| !pending.is_finished());
        self.in_flight.push(handle);
    }
}

impl<T: Entity> Drop for ReconciliationController<T> {
    fn drop(&mut self) {
        for handle in self.in_flight.drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
