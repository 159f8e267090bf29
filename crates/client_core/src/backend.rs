//! Seams to the hosted backend: row storage, object storage and realtime push.
//!
//! The view core only ever talks to these traits. `rest` and `realtime` hold
//! the network implementations; tests substitute in-memory ones.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use shared::protocol::PushEvent;
use tokio::sync::mpsc;

use crate::error::ClientResult;

pub const PUSH_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Eq { column: String, value: String },
    ILike { column: String, pattern: String },
}

impl Filter {
    pub fn eq(column: &str, value: impl ToString) -> Self {
        Filter::Eq {
            column: column.to_string(),
            value: value.to_string(),
        }
    }

    pub fn contains(column: &str, term: &str) -> Self {
        Filter::ILike {
            column: column.to_string(),
            pattern: format!("%{term}%"),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::ILike { column, .. } => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowQuery {
    pub select: String,
    pub filters: Vec<Filter>,
    pub order: Option<OrderBy>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl RowQuery {
    pub fn select(columns: &str) -> Self {
        Self {
            select: columns.to_string(),
            filters: Vec::new(),
            order: None,
            offset: 0,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn range(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait RowStore: Send + Sync {
    async fn query(&self, collection: &str, query: &RowQuery) -> ClientResult<Vec<Value>>;
    async fn insert(&self, collection: &str, record: Value) -> ClientResult<Value>;
    async fn update(&self, collection: &str, filter: &Filter, patch: Value) -> ClientResult<()>;
    async fn point_fetch(&self, collection: &str, id: &str, select: &str) -> ClientResult<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bucket: String,
    pub key: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> ClientResult<StoredObject>;
    fn public_url(&self, bucket: &str, key: &str) -> ClientResult<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelSpec {
    pub topic: String,
    pub row_inserts: Vec<String>,
    pub broadcasts: Vec<String>,
    /// Report presence; keys are assigned by the server per connection.
    pub presence: bool,
}

impl ChannelSpec {
    pub fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            ..Self::default()
        }
    }

    pub fn row_inserts(mut self, collection: &str) -> Self {
        self.row_inserts.push(collection.to_string());
        self
    }

    pub fn broadcast(mut self, event: &str) -> Self {
        self.broadcasts.push(event.to_string());
        self
    }

    pub fn with_presence(mut self) -> Self {
        self.presence = true;
        self
    }
}

#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    fn topic(&self) -> &str;
    async fn send_broadcast(&self, event: &str, payload: Value) -> ClientResult<()>;
    async fn track(&self, meta: Value) -> ClientResult<()>;
    async fn untrack(&self) -> ClientResult<()>;
    async fn unsubscribe(&self) -> ClientResult<()>;
}

pub struct Subscription {
    pub channel: Arc<dyn RealtimeChannel>,
    pub events: mpsc::Receiver<PushEvent>,
}

#[async_trait]
pub trait Realtime: Send + Sync {
    async fn subscribe(&self, spec: ChannelSpec) -> ClientResult<Subscription>;
}
