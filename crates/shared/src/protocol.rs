use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::domain::{ImageId, MessageId, UserId};

pub const TYPING_EVENT: &str = "typing";
pub const STOP_TYPING_EVENT: &str = "stop_typing";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewProfile {
    pub username: String,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProfileStatusUpdate {
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorRef {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub user_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, rename = "profiles", skip_serializing_if = "Option::is_none")]
    pub author: Option<AuthorRef>,
}

impl ChatMessage {
    pub fn author_name(&self) -> &str {
        self.author
            .as_ref()
            .map(|author| author.username.as_str())
            .filter(|name| !name.is_empty())
            .unwrap_or("Unknown")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub user_id: UserId,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryImage {
    pub id: ImageId,
    pub image_url: String,
    pub title: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewGalleryImage {
    pub image_url: String,
    pub title: String,
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMember {
    pub session_id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub online_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceMeta {
    pub username: String,
    pub online_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    RowInserted { collection: String, record: Value },
    Broadcast { event: String, payload: Value },
    PresenceSync { members: Vec<PresenceMember> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityEvent {
    Typing { username: String },
    StopTyping { username: String },
}

impl ActivityEvent {
    pub fn from_broadcast(event: &str, payload: &Value) -> Result<Option<Self>, serde_json::Error> {
        let parse = || TypingPayload::deserialize(payload);
        match event {
            TYPING_EVENT => Ok(Some(ActivityEvent::Typing {
                username: parse()?.username,
            })),
            STOP_TYPING_EVENT => Ok(Some(ActivityEvent::StopTyping {
                username: parse()?.username,
            })),
            _ => Ok(None),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ActivityEvent::Typing { .. } => TYPING_EVENT,
            ActivityEvent::StopTyping { .. } => STOP_TYPING_EVENT,
        }
    }

    pub fn payload(&self) -> Value {
        let username = match self {
            ActivityEvent::Typing { username } | ActivityEvent::StopTyping { username } => username,
        };
        serde_json::json!({ "username": username })
    }
}

/// Flat sample served by the metrics endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    #[serde(alias = "cpu")]
    pub cpu_percent: f64,
    #[serde(alias = "memory")]
    pub mem_percent: f64,
    #[serde(alias = "disk")]
    pub disk_percent: f64,
    #[serde(default)]
    pub net_in_bps: f64,
    #[serde(default)]
    pub net_out_bps: f64,
    #[serde(default)]
    pub temperature_c: f64,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Numeric(f64),
    Text(String),
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match RawTimestamp::deserialize(deserializer)? {
        // Anything past the year 33658 in seconds is taken to be milliseconds.
        RawTimestamp::Numeric(value) if value.abs() >= 1e12 => Utc
            .timestamp_millis_opt(value as i64)
            .single()
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {value}"))),
        RawTimestamp::Numeric(value) => {
            let secs = value.trunc() as i64;
            let nanos = (value.fract().abs() * 1e9) as u32;
            Utc.timestamp_opt(secs, nanos)
                .single()
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {value}")))
        }
        RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(D::Error::custom),
    }
}
