//! Websocket push transport speaking the Phoenix channel framing used by the
//! hosted realtime service.
//!
//! One socket carries every channel. A reader task routes incoming frames to
//! the owning channel's queue, a writer task serialises outbound frames, and a
//! heartbeat task keeps the connection alive.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared::protocol::{PresenceMember, PushEvent};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    backend::{ChannelSpec, Realtime, RealtimeChannel, Subscription, PUSH_QUEUE_CAPACITY},
    error::{ClientError, ClientResult},
};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);
const PHOENIX_TOPIC: &str = "phoenix";
const OUTBOUND_QUEUE_CAPACITY: usize = 64;
const PROTOCOL_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, rename = "ref")]
    pub reference: Option<String>,
}

pub fn channel_topic(name: &str) -> String {
    format!("realtime:{name}")
}

pub fn join_payload(spec: &ChannelSpec, access_token: &str) -> Value {
    let row_changes: Vec<Value> = spec
        .row_inserts
        .iter()
        .map(|table| json!({ "event": "INSERT", "schema": "public", "table": table }))
        .collect();
    json!({
        "config": {
            "broadcast": { "self": false, "ack": false },
            "presence": { "key": "", "enabled": spec.presence },
            "postgres_changes": row_changes,
            "private": false
        },
        "access_token": access_token
    })
}

#[derive(Debug, Default, Deserialize)]
struct PresenceEntry {
    #[serde(default)]
    metas: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PresenceDiff {
    #[serde(default)]
    joins: HashMap<String, PresenceEntry>,
    #[serde(default)]
    leaves: HashMap<String, PresenceEntry>,
}

fn phx_ref(meta: &Value) -> Option<&str> {
    meta.get("phx_ref").and_then(Value::as_str)
}

/// Server presence state for one channel, folded from full states and diffs.
#[derive(Debug, Default)]
pub struct PresenceAggregate {
    entries: BTreeMap<String, Vec<Value>>,
}

impl PresenceAggregate {
    pub fn apply_state(&mut self, payload: &Value) -> Result<(), serde_json::Error> {
        let state: HashMap<String, PresenceEntry> = HashMap::deserialize(payload)?;
        self.entries = state
            .into_iter()
            .map(|(key, entry)| (key, entry.metas))
            .filter(|(_, metas)| !metas.is_empty())
            .collect();
        Ok(())
    }

    pub fn apply_diff(&mut self, payload: &Value) -> Result<(), serde_json::Error> {
        let diff = PresenceDiff::deserialize(payload)?;
        for (key, entry) in diff.joins {
            let metas = self.entries.entry(key).or_default();
            for meta in entry.metas {
                let known = phx_ref(&meta)
                    .map(|r| metas.iter().any(|m| phx_ref(m) == Some(r)))
                    .unwrap_or(false);
                if !known {
                    metas.push(meta);
                }
            }
        }
        for (key, entry) in diff.leaves {
            let Some(metas) = self.entries.get_mut(&key) else {
                continue;
            };
            let gone: Vec<&str> = entry.metas.iter().filter_map(phx_ref).collect();
            metas.retain(|meta| !phx_ref(meta).is_some_and(|r| gone.contains(&r)));
            if metas.is_empty() {
                self.entries.remove(&key);
            }
        }
        Ok(())
    }

    pub fn members(&self) -> Vec<PresenceMember> {
        let mut members = Vec::new();
        for (key, metas) in &self.entries {
            for meta in metas {
                let Some(username) = meta.get("username").and_then(Value::as_str) else {
                    debug!(%key, "presence meta without username");
                    continue;
                };
                let online_at = meta
                    .get("online_at")
                    .and_then(Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|ts| ts.with_timezone(&Utc));
                members.push(PresenceMember {
                    session_id: phx_ref(meta).unwrap_or(key).to_string(),
                    username: username.to_string(),
                    online_at,
                });
            }
        }
        members
    }
}

/// Turns one channel frame into the push event the view cares about.
/// `Ok(None)` means the frame is valid but not something this channel wants.
pub fn decode_frame(
    frame: &PhoenixFrame,
    spec: &ChannelSpec,
    presence: &mut PresenceAggregate,
) -> Result<Option<PushEvent>, String> {
    match frame.event.as_str() {
        "postgres_changes" => {
            let data = frame
                .payload
                .get("data")
                .ok_or("postgres_changes frame without data")?;
            let kind = data.get("type").and_then(Value::as_str).unwrap_or_default();
            if kind != "INSERT" {
                return Ok(None);
            }
            let table = data
                .get("table")
                .and_then(Value::as_str)
                .ok_or("row change without table")?;
            if !spec.row_inserts.iter().any(|t| t == table) {
                return Ok(None);
            }
            let record = data.get("record").cloned().ok_or("row change without record")?;
            Ok(Some(PushEvent::RowInserted {
                collection: table.to_string(),
                record,
            }))
        }
        "broadcast" => {
            let event = frame
                .payload
                .get("event")
                .and_then(Value::as_str)
                .ok_or("broadcast without event name")?;
            if !spec.broadcasts.iter().any(|e| e == event) {
                return Ok(None);
            }
            Ok(Some(PushEvent::Broadcast {
                event: event.to_string(),
                payload: frame.payload.get("payload").cloned().unwrap_or(Value::Null),
            }))
        }
        "presence_state" | "presence_diff" if spec.presence => {
            let applied = if frame.event == "presence_state" {
                presence.apply_state(&frame.payload)
            } else {
                presence.apply_diff(&frame.payload)
            };
            applied.map_err(|err| err.to_string())?;
            Ok(Some(PushEvent::PresenceSync {
                members: presence.members(),
            }))
        }
        _ => Ok(None),
    }
}

struct ChannelRoute {
    spec: ChannelSpec,
    events: mpsc::Sender<PushEvent>,
    presence: PresenceAggregate,
}

struct SocketInner {
    access_token: String,
    outbound: mpsc::Sender<Message>,
    channels: Mutex<HashMap<String, ChannelRoute>>,
    replies: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    next_ref: AtomicU64,
}

impl SocketInner {
    async fn push(
        &self,
        topic: &str,
        event: &str,
        payload: Value,
        reply: Option<oneshot::Sender<Value>>,
    ) -> ClientResult<()> {
        let reference = self.next_ref.fetch_add(1, Ordering::Relaxed).to_string();
        if let Some(reply) = reply {
            self.replies.lock().await.insert(reference.clone(), reply);
        }
        let frame = PhoenixFrame {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference),
        };
        let text =
            serde_json::to_string(&frame).map_err(|err| ClientError::subscription(topic, err))?;
        self.outbound
            .send(Message::Text(text))
            .await
            .map_err(|_| ClientError::subscription(topic, "socket closed"))
    }

    async fn request(&self, topic: &str, event: &str, payload: Value) -> ClientResult<Value> {
        let (tx, rx) = oneshot::channel();
        self.push(topic, event, payload, Some(tx)).await?;
        rx.await
            .map_err(|_| ClientError::subscription(topic, "socket closed before reply"))
    }

    async fn dispatch(&self, text: &str) {
        let frame: PhoenixFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(%error, "dropping malformed realtime frame");
                return;
            }
        };

        match frame.event.as_str() {
            "phx_reply" => {
                if let Some(reference) = &frame.reference {
                    if let Some(reply) = self.replies.lock().await.remove(reference) {
                        let _ = reply.send(frame.payload);
                    }
                }
                return;
            }
            "phx_error" => {
                warn!(topic = %frame.topic, payload = %frame.payload, "channel error");
                return;
            }
            "phx_close" => {
                if self.channels.lock().await.remove(&frame.topic).is_some() {
                    info!(topic = %frame.topic, "channel closed by server");
                }
                return;
            }
            "system" => {
                debug!(topic = %frame.topic, payload = %frame.payload, "system message");
                return;
            }
            _ => {}
        }

        let mut channels = self.channels.lock().await;
        let Some(route) = channels.get_mut(&frame.topic) else {
            debug!(topic = %frame.topic, event = %frame.event, "frame for unknown channel");
            return;
        };
        match decode_frame(&frame, &route.spec, &mut route.presence) {
            Ok(Some(event)) => {
                // never block the shared reader on one channel's queue
                match route.events.try_send(event) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(topic = %frame.topic, event = %frame.event, "push queue full, dropping event")
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        debug!(topic = %frame.topic, "view stopped listening")
                    }
                }
            }
            Ok(None) => {}
            Err(reason) => {
                warn!(topic = %frame.topic, event = %frame.event, %reason, "dropping malformed push event")
            }
        }
    }

    async fn close_all(&self) {
        self.channels.lock().await.clear();
        self.replies.lock().await.clear();
    }
}

pub struct RealtimeClient {
    inner: Arc<SocketInner>,
    tasks: Vec<JoinHandle<()>>,
}

impl RealtimeClient {
    pub async fn connect(endpoint: &str, api_key: &str) -> ClientResult<Self> {
        let mut url = Url::parse(endpoint)
            .map_err(|err| ClientError::Config(format!("invalid realtime url '{endpoint}': {err}")))?;
        url.query_pairs_mut()
            .append_pair("apikey", api_key)
            .append_pair("vsn", PROTOCOL_VERSION);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| ClientError::subscription(PHOENIX_TOPIC, err))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(OUTBOUND_QUEUE_CAPACITY);

        let inner = Arc::new(SocketInner {
            access_token: api_key.to_string(),
            outbound,
            channels: Mutex::new(HashMap::new()),
            replies: Mutex::new(HashMap::new()),
            next_ref: AtomicU64::new(1),
        });

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(error) = ws_writer.send(message).await {
                    warn!(%error, "realtime socket send failed");
                    break;
                }
            }
        });

        let reader_inner = Arc::clone(&inner);
        let reader = tokio::spawn(async move {
            while let Some(message) = ws_reader.next().await {
                match message {
                    Ok(Message::Text(text)) => reader_inner.dispatch(&text).await,
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%error, "realtime socket receive failed");
                        break;
                    }
                }
            }
            info!("realtime socket closed");
            reader_inner.close_all().await;
        });

        let heartbeat_inner = Arc::clone(&inner);
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if heartbeat_inner
                    .push(PHOENIX_TOPIC, "heartbeat", json!({}), None)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        info!(endpoint, "realtime socket connected");
        Ok(Self {
            inner,
            tasks: vec![writer, reader, heartbeat],
        })
    }

    pub async fn close(&self) {
        self.inner.close_all().await;
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

#[async_trait]
impl Realtime for RealtimeClient {
    async fn subscribe(&self, spec: ChannelSpec) -> ClientResult<Subscription> {
        let topic = channel_topic(&spec.topic);
        let (tx, events) = mpsc::channel(PUSH_QUEUE_CAPACITY);
        self.inner.channels.lock().await.insert(
            topic.clone(),
            ChannelRoute {
                spec: spec.clone(),
                events: tx,
                presence: PresenceAggregate::default(),
            },
        );

        let payload = join_payload(&spec, &self.inner.access_token);
        let joined = match self.inner.request(&topic, "phx_join", payload).await {
            Ok(reply) if reply.get("status").and_then(Value::as_str) == Some("ok") => Ok(()),
            Ok(reply) => Err(ClientError::subscription(
                &topic,
                reply
                    .get("response")
                    .map(Value::to_string)
                    .unwrap_or_else(|| "join refused".into()),
            )),
            Err(error) => Err(error),
        };
        if let Err(error) = joined {
            self.inner.channels.lock().await.remove(&topic);
            return Err(error);
        }

        info!(%topic, "channel joined");
        Ok(Subscription {
            channel: Arc::new(PhoenixChannel {
                topic,
                inner: Arc::clone(&self.inner),
                left: AtomicBool::new(false),
            }),
            events,
        })
    }
}

pub struct PhoenixChannel {
    topic: String,
    inner: Arc<SocketInner>,
    left: AtomicBool,
}

#[async_trait]
impl RealtimeChannel for PhoenixChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send_broadcast(&self, event: &str, payload: Value) -> ClientResult<()> {
        if self.left.load(Ordering::Acquire) {
            return Err(ClientError::subscription(&self.topic, "channel left"));
        }
        let frame = json!({ "type": "broadcast", "event": event, "payload": payload });
        self.inner.push(&self.topic, "broadcast", frame, None).await
    }

    async fn track(&self, meta: Value) -> ClientResult<()> {
        let frame = json!({ "type": "presence", "event": "track", "payload": meta });
        self.inner.push(&self.topic, "presence", frame, None).await
    }

    async fn untrack(&self) -> ClientResult<()> {
        let frame = json!({ "type": "presence", "event": "untrack" });
        self.inner.push(&self.topic, "presence", frame, None).await
    }

    async fn unsubscribe(&self) -> ClientResult<()> {
        if self.left.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.channels.lock().await.remove(&self.topic);
        if let Err(error) = self.inner.push(&self.topic, "phx_leave", json!({}), None).await {
            debug!(topic = %self.topic, %error, "leave not sent, socket already closed");
        }
        info!(topic = %self.topic, "channel left");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/realtime_tests.rs"]
mod tests;
