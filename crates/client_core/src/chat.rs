//! Chat room view: message history, live inserts, presence and typing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{
    domain::{FeedOrder, MessageId},
    protocol::{
        ChatMessage, NewMessage, NewProfile, PresenceMeta, Profile, ProfileStatusUpdate, PushEvent,
        STOP_TYPING_EVENT, TYPING_EVENT,
    },
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    backend::{ChannelSpec, Filter, RealtimeChannel, RowQuery, RowStore, Subscription},
    error::{ClientError, ClientResult},
    presence::{typing_banner, PresenceTracker},
    reconcile::{FeedConfig, LoadPhase, ReconciliationController},
    session::BackendSession,
    store::Entity,
};

pub const PROFILES: &str = "profiles";

impl Entity for ChatMessage {
    type Id = MessageId;

    const COLLECTION: &'static str = "messages";
    const SELECT: &'static str = "*, profiles(username)";

    fn id(&self) -> MessageId {
        self.id.clone()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn needs_enrichment(&self) -> bool {
        self.author.is_none()
    }
}

/// Looks the name up and marks that profile online, creating it on first use.
pub async fn join(rows: &dyn RowStore, username: &str) -> ClientResult<Profile> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ClientError::InvalidInput("username is required".into()));
    }

    let lookup = RowQuery::select("*")
        .filter(Filter::eq("username", username))
        .range(0, 1);
    let existing = rows.query(PROFILES, &lookup).await?;

    if let Some(raw) = existing.into_iter().next() {
        let mut profile: Profile =
            serde_json::from_value(raw).map_err(|err| ClientError::malformed(PROFILES, err))?;
        let update = ProfileStatusUpdate {
            is_online: true,
            last_seen: Utc::now(),
        };
        let patch =
            serde_json::to_value(&update).map_err(|err| ClientError::update(PROFILES, err))?;
        rows.update(PROFILES, &Filter::eq("id", &profile.id), patch)
            .await?;
        profile.is_online = true;
        profile.last_seen = Some(update.last_seen);
        info!(user_id = %profile.id, username, "existing profile joined");
        return Ok(profile);
    }

    let record = serde_json::to_value(NewProfile {
        username: username.to_string(),
        is_online: true,
    })
    .map_err(|err| ClientError::insert(PROFILES, err))?;
    let created = rows.insert(PROFILES, record).await?;
    let profile: Profile =
        serde_json::from_value(created).map_err(|err| ClientError::malformed(PROFILES, err))?;
    info!(user_id = %profile.id, username, "profile created");
    Ok(profile)
}

pub struct ChatView {
    profile: Profile,
    rows: Arc<dyn RowStore>,
    channel: Arc<dyn RealtimeChannel>,
    events: mpsc::Receiver<PushEvent>,
    controller: ReconciliationController<ChatMessage>,
    presence: PresenceTracker,
    draft: String,
}

impl ChatView {
    pub async fn mount(session: &BackendSession, profile: Profile) -> ClientResult<Self> {
        let settings = session.settings();
        let spec = ChannelSpec::new(&settings.chat_channel)
            .row_inserts(ChatMessage::COLLECTION)
            .broadcast(TYPING_EVENT)
            .broadcast(STOP_TYPING_EVENT)
            .with_presence();
        let Subscription { channel, events } = session.realtime().subscribe(spec).await?;

        let meta = PresenceMeta {
            username: profile.username.clone(),
            online_at: Utc::now(),
        };
        match serde_json::to_value(&meta) {
            Ok(meta) => {
                if let Err(error) = channel.track(meta).await {
                    warn!(topic = channel.topic(), %error, "presence track failed");
                }
            }
            Err(error) => warn!(%error, "presence meta not serializable"),
        }

        let mut controller = ReconciliationController::new(
            session.rows(),
            FeedConfig {
                order: FeedOrder::OldestFirst,
                page_size: settings.chat_history_limit,
            },
        );
        controller.start();

        let presence = PresenceTracker::new(
            Arc::clone(&channel),
            profile.username.clone(),
            settings.typing_idle(),
        );
        info!(topic = channel.topic(), username = %profile.username, "chat mounted");

        Ok(Self {
            profile,
            rows: session.rows(),
            channel,
            events,
            controller,
            presence,
            draft: String::new(),
        })
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn phase(&self) -> LoadPhase {
        self.controller.phase()
    }

    pub fn messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.controller.store().iter()
    }

    pub fn is_own(&self, message: &ChatMessage) -> bool {
        message.user_id == self.profile.id
    }

    pub fn online_users(&self) -> Vec<String> {
        self.presence.online_users()
    }

    pub fn typing_users(&self) -> &[String] {
        self.presence.typing_users()
    }

    pub fn typing_banner(&self) -> Option<String> {
        typing_banner(self.presence.typing_users())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.controller.last_error()
    }

    pub fn retry_history(&mut self) -> bool {
        self.controller.start()
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub async fn set_draft(&mut self, text: &str) {
        self.draft = text.to_string();
        self.presence.on_local_typing().await;
    }

    /// Inserts the draft as a message. Blank drafts are not sent; the draft is
    /// cleared only once the insert succeeds.
    pub async fn send(&mut self) -> ClientResult<bool> {
        if self.draft.trim().is_empty() {
            return Ok(false);
        }
        let record = serde_json::to_value(NewMessage {
            user_id: self.profile.id.clone(),
            content: self.draft.clone(),
        })
        .map_err(|err| ClientError::insert(ChatMessage::COLLECTION, err))?;

        match self.rows.insert(ChatMessage::COLLECTION, record).await {
            Ok(_) => {
                self.draft.clear();
                Ok(true)
            }
            Err(error) => {
                warn!(%error, "message send failed");
                Err(error)
            }
        }
    }

    pub async fn step(&mut self) -> bool {
        tokio::select! {
            event = self.events.recv() => match event {
                Some(event) => {
                    self.handle_push(event);
                    true
                }
                None => {
                    warn!(topic = self.channel.topic(), "push stream closed");
                    false
                }
            },
            Some(completion) = self.controller.next_completion() => {
                self.controller.apply(completion);
                true
            }
        }
    }

    pub fn handle_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::RowInserted { collection, record } => {
                self.controller.handle_row_inserted(&collection, record)
            }
            PushEvent::Broadcast { event, payload } => {
                self.presence.handle_broadcast(&event, &payload)
            }
            PushEvent::PresenceSync { members } => self.presence.apply_presence_sync(members),
        }
    }

    pub async fn unmount(mut self) {
        self.presence.clear();
        self.controller.shutdown();
        if let Err(error) = self.channel.untrack().await {
            debug!(%error, "presence untrack failed");
        }
        if let Err(error) = self.channel.unsubscribe().await {
            warn!(topic = self.channel.topic(), %error, "unsubscribe failed");
        }
        info!(username = %self.profile.username, "chat unmounted");
    }
}

#[cfg(test)]
#[path = "tests/chat_tests.rs"]
mod tests;
