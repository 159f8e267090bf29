use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde_json::Value;
use shared::protocol::{ActivityEvent, PresenceMember};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::RealtimeChannel;

/// Who is on the channel and who is typing. Nothing here is persisted; the
/// member set only changes on presence snapshots and the typing set only on
/// activity broadcasts.
pub struct PresenceTracker {
    channel: Arc<dyn RealtimeChannel>,
    self_name: String,
    idle: Duration,
    members: BTreeMap<String, PresenceMember>,
    typing: Vec<String>,
    stop_timer: Option<JoinHandle<()>>,
}

impl PresenceTracker {
    pub fn new(channel: Arc<dyn RealtimeChannel>, self_name: impl Into<String>, idle: Duration) -> Self {
        Self {
            channel,
            self_name: self_name.into(),
            idle,
            members: BTreeMap::new(),
            typing: Vec::new(),
            stop_timer: None,
        }
    }

    pub fn apply_presence_sync(&mut self, members: Vec<PresenceMember>) {
        self.members = members
            .into_iter()
            .map(|member| (member.session_id.clone(), member))
            .collect();
        debug!(members = self.members.len(), "presence synced");
    }

    pub fn members(&self) -> impl Iterator<Item = &PresenceMember> {
        self.members.values()
    }

    pub fn online_users(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .members
            .values()
            .map(|member| member.username.clone())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn typing_users(&self) -> &[String] {
        &self.typing
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    pub fn handle_broadcast(&mut self, event: &str, payload: &Value) {
        match ActivityEvent::from_broadcast(event, payload) {
            Ok(Some(activity)) => self.apply_activity(activity),
            Ok(None) => debug!(event, "ignoring unrelated broadcast"),
            Err(error) => warn!(event, %error, "dropping malformed activity broadcast"),
        }
    }

    pub fn apply_activity(&mut self, activity: ActivityEvent) {
        match activity {
            ActivityEvent::Typing { username } => {
                if username != self.self_name && !self.typing.contains(&username) {
                    self.typing.push(username);
                }
            }
            ActivityEvent::StopTyping { username } => {
                self.typing.retain(|name| *name != username);
            }
        }
    }

    /// Announces a local keystroke and re-arms the single stop timer. The stop
    /// broadcast only goes out once the input has been quiet for `idle`.
    pub async fn on_local_typing(&mut self) {
        let typing = ActivityEvent::Typing {
            username: self.self_name.clone(),
        };
        if let Err(error) = self
            .channel
            .send_broadcast(typing.event_name(), typing.payload())
            .await
        {
            warn!(topic = self.channel.topic(), %error, "typing broadcast failed");
        }

        if let Some(previous) = self.stop_timer.take() {
            previous.abort();
        }

        let channel = Arc::clone(&self.channel);
        let idle = self.idle;
        let stop = ActivityEvent::StopTyping {
            username: self.self_name.clone(),
        };
        self.stop_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            if let Err(error) = channel.send_broadcast(stop.event_name(), stop.payload()).await {
                warn!(topic = channel.topic(), %error, "stop_typing broadcast failed");
            }
        }));
    }

    pub fn clear(&mut self) {
        if let Some(timer) = self.stop_timer.take() {
            timer.abort();
        }
        self.members.clear();
        self.typing.clear();
    }
}

impl Drop for PresenceTracker {
    fn drop(&mut self) {
        if let Some(timer) = self.stop_timer.take() {
            timer.abort();
        }
    }
}

pub fn typing_banner(names: &[String]) -> Option<String> {
    match names.len() {
        0 => None,
        1 => Some(format!("{} is typing...", names[0])),
        _ => Some(format!("{} are typing...", names.join(", "))),
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
