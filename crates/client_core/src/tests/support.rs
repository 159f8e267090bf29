//! In-memory stand-ins for the backend traits.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Value};
use shared::protocol::PushEvent;
use tokio::{sync::mpsc, time::Instant};

use crate::{
    backend::{
        ChannelSpec, Filter, ObjectStore, Realtime, RealtimeChannel, RowQuery, RowStore,
        StoredObject, Subscription, PUSH_QUEUE_CAPACITY,
    },
    error::{ClientError, ClientResult},
};

pub fn ts(offset_secs: i64) -> String {
    let base: DateTime<Utc> = Utc
        .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
        .single()
        .expect("base time");
    (base + Duration::seconds(offset_secs)).to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn message_row(id: i64, user_id: i64, content: &str) -> Value {
    json!({
        "id": id,
        "user_id": user_id,
        "content": content,
        "created_at": ts(id),
    })
}

pub fn image_row(id: i64, title: &str) -> Value {
    json!({
        "id": id,
        "image_url": format!("https://cdn.test/images/{id}.png"),
        "title": title,
        "user_id": null,
        "created_at": ts(id),
    })
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let cell = row.get(filter.column()).map(render).unwrap_or_default();
    match filter {
        Filter::Eq { value, .. } => &cell == value,
        Filter::ILike { pattern, .. } => cell
            .to_lowercase()
            .contains(&pattern.trim_matches('%').to_lowercase()),
    }
}

#[derive(Default)]
pub struct MemoryRows {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    pub queries: Mutex<Vec<(String, RowQuery)>>,
    pub point_fetches: Mutex<Vec<(String, String)>>,
    pub inserts: Mutex<Vec<(String, Value)>>,
    pub updates: Mutex<Vec<(String, Filter, Value)>>,
    pub fail_queries: AtomicBool,
    pub fail_inserts: AtomicBool,
}

impl MemoryRows {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed(&self, collection: &str, rows: Vec<Value>) {
        self.tables
            .lock()
            .expect("tables")
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, collection: &str) -> Vec<Value> {
        self.tables
            .lock()
            .expect("tables")
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().expect("queries").len()
    }

    fn join(&self, mut row: Value, select: &str) -> Value {
        if !select.contains("profiles(") {
            return row;
        }
        let user_id = row.get("user_id").map(render);
        let username = self
            .rows("profiles")
            .into_iter()
            .find(|profile| profile.get("id").map(render) == user_id)
            .and_then(|profile| profile.get("username").cloned());
        if let (Some(username), Some(obj)) = (username, row.as_object_mut()) {
            obj.insert("profiles".into(), json!({ "username": username }));
        }
        row
    }
}

#[async_trait]
impl RowStore for MemoryRows {
    async fn query(&self, collection: &str, query: &RowQuery) -> ClientResult<Vec<Value>> {
        self.queries
            .lock()
            .expect("queries")
            .push((collection.to_string(), query.clone()));
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(ClientError::query(collection, "backend unavailable"));
        }

        let mut rows: Vec<Value> = self
            .rows(collection)
            .into_iter()
            .filter(|row| query.filters.iter().all(|f| matches(row, f)))
            .collect();
        if let Some(order) = &query.order {
            rows.sort_by_key(|row| row.get(&order.column).map(render).unwrap_or_default());
            if !order.ascending {
                rows.reverse();
            }
        }
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(query.offset)
            .take(limit)
            .map(|row| self.join(row, &query.select))
            .collect())
    }

    async fn insert(&self, collection: &str, record: Value) -> ClientResult<Value> {
        self.inserts
            .lock()
            .expect("inserts")
            .push((collection.to_string(), record.clone()));
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(ClientError::insert(collection, "insert rejected"));
        }

        let mut tables = self.tables.lock().expect("tables");
        let table = tables.entry(collection.to_string()).or_default();
        let next_id = table
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_i64))
            .max()
            .unwrap_or(0)
            + 1;
        let mut row = record;
        if let Some(obj) = row.as_object_mut() {
            obj.entry("id").or_insert(json!(next_id));
            obj.entry("created_at").or_insert(json!(ts(next_id)));
        }
        table.push(row.clone());
        Ok(row)
    }

    async fn update(&self, collection: &str, filter: &Filter, patch: Value) -> ClientResult<()> {
        self.updates.lock().expect("updates").push((
            collection.to_string(),
            filter.clone(),
            patch.clone(),
        ));
        let mut tables = self.tables.lock().expect("tables");
        for row in tables.entry(collection.to_string()).or_default() {
            if !matches(row, filter) {
                continue;
            }
            if let (Some(obj), Some(changes)) = (row.as_object_mut(), patch.as_object()) {
                for (key, value) in changes {
                    obj.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(())
    }

    async fn point_fetch(&self, collection: &str, id: &str, select: &str) -> ClientResult<Value> {
        self.point_fetches
            .lock()
            .expect("point fetches")
            .push((collection.to_string(), id.to_string()));
        self.rows(collection)
            .into_iter()
            .find(|row| row.get("id").map(render).as_deref() == Some(id))
            .map(|row| self.join(row, select))
            .ok_or_else(|| ClientError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentBroadcast {
    pub at: Instant,
    pub event: String,
    pub payload: Value,
}

pub struct MemoryChannel {
    topic: String,
    pub broadcasts: Mutex<Vec<SentBroadcast>>,
    pub tracked: Mutex<Option<Value>>,
    pub untracked: AtomicBool,
    pub unsubscribes: AtomicUsize,
}

impl MemoryChannel {
    pub fn new(topic: &str) -> Arc<Self> {
        Arc::new(Self {
            topic: topic.to_string(),
            broadcasts: Mutex::new(Vec::new()),
            tracked: Mutex::new(None),
            untracked: AtomicBool::new(false),
            unsubscribes: AtomicUsize::new(0),
        })
    }

    pub fn sent(&self, event: &str) -> Vec<SentBroadcast> {
        self.broadcasts
            .lock()
            .expect("broadcasts")
            .iter()
            .filter(|b| b.event == event)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RealtimeChannel for MemoryChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send_broadcast(&self, event: &str, payload: Value) -> ClientResult<()> {
        self.broadcasts.lock().expect("broadcasts").push(SentBroadcast {
            at: Instant::now(),
            event: event.to_string(),
            payload,
        });
        Ok(())
    }

    async fn track(&self, meta: Value) -> ClientResult<()> {
        *self.tracked.lock().expect("tracked") = Some(meta);
        Ok(())
    }

    async fn untrack(&self) -> ClientResult<()> {
        self.untracked.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn unsubscribe(&self) -> ClientResult<()> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryRealtime {
    channels: Mutex<HashMap<String, Arc<MemoryChannel>>>,
    senders: Mutex<HashMap<String, mpsc::Sender<PushEvent>>>,
    pub specs: Mutex<Vec<ChannelSpec>>,
    pub fail: AtomicBool,
}

impl MemoryRealtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn channel(&self, topic: &str) -> Arc<MemoryChannel> {
        Arc::clone(
            self.channels
                .lock()
                .expect("channels")
                .get(topic)
                .expect("channel subscribed"),
        )
    }

    pub async fn push(&self, topic: &str, event: PushEvent) {
        let tx = self
            .senders
            .lock()
            .expect("senders")
            .get(topic)
            .cloned()
            .expect("channel subscribed");
        tx.send(event).await.expect("view still listening");
    }
}

#[async_trait]
impl Realtime for MemoryRealtime {
    async fn subscribe(&self, spec: ChannelSpec) -> ClientResult<Subscription> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ClientError::subscription(&spec.topic, "socket closed"));
        }
        let channel = MemoryChannel::new(&spec.topic);
        let (tx, events) = mpsc::channel(PUSH_QUEUE_CAPACITY);
        self.channels
            .lock()
            .expect("channels")
            .insert(spec.topic.clone(), Arc::clone(&channel));
        self.senders
            .lock()
            .expect("senders")
            .insert(spec.topic.clone(), tx);
        self.specs.lock().expect("specs").push(spec);
        Ok(Subscription { channel, events })
    }
}

#[derive(Default)]
pub struct MemoryObjects {
    pub uploads: Mutex<Vec<(String, String, usize)>>,
    pub fail_uploads: AtomicBool,
}

impl MemoryObjects {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjects {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        _content_type: Option<&str>,
    ) -> ClientResult<StoredObject> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(ClientError::upload(bucket, key, "storage quota exceeded"));
        }
        self.uploads.lock().expect("uploads").push((
            bucket.to_string(),
            key.to_string(),
            bytes.len(),
        ));
        Ok(StoredObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn public_url(&self, bucket: &str, key: &str) -> ClientResult<String> {
        Ok(format!("https://cdn.test/{bucket}/{key}"))
    }
}
