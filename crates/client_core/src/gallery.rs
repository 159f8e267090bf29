//! Image gallery view: newest-first feed with infinite scroll, title search
//! and an upload form that reloads the feed when an upload lands.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use shared::{
    domain::{FeedOrder, ImageId},
    protocol::{GalleryImage, PushEvent},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    backend::{ChannelSpec, RealtimeChannel, Subscription},
    error::ClientResult,
    reconcile::{FeedConfig, LoadPhase, ReconciliationController},
    session::BackendSession,
    store::Entity,
    upload::{ReloadRequest, UploadCoordinator},
};

const RELOAD_QUEUE_CAPACITY: usize = 4;

impl Entity for GalleryImage {
    type Id = ImageId;

    const COLLECTION: &'static str = "gallery";
    const SEARCH_COLUMN: Option<&'static str> = Some("title");

    fn id(&self) -> ImageId {
        self.id.clone()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn matches_search(&self, term: &str) -> bool {
        self.title.to_lowercase().contains(&term.to_lowercase())
    }
}

pub struct GalleryView {
    channel: Arc<dyn RealtimeChannel>,
    events: mpsc::Receiver<PushEvent>,
    controller: ReconciliationController<GalleryImage>,
    uploader: Arc<UploadCoordinator>,
    reloads: mpsc::Receiver<ReloadRequest>,
}

impl GalleryView {
    pub async fn mount(session: &BackendSession) -> ClientResult<Self> {
        let settings = session.settings();
        let spec = ChannelSpec::new(&settings.gallery_channel).row_inserts(GalleryImage::COLLECTION);
        let Subscription { channel, events } = session.realtime().subscribe(spec).await?;

        let mut controller = ReconciliationController::new(
            session.rows(),
            FeedConfig {
                order: FeedOrder::NewestFirst,
                page_size: settings.gallery_page_size,
            },
        );
        controller.start();

        let (reload_tx, reloads) = mpsc::channel(RELOAD_QUEUE_CAPACITY);
        let uploader = Arc::new(UploadCoordinator::new(
            session.objects(),
            session.rows(),
            settings.image_bucket.clone(),
            reload_tx,
        ));
        info!(topic = channel.topic(), "gallery mounted");

        Ok(Self {
            channel,
            events,
            controller,
            uploader,
            reloads,
        })
    }

    pub fn images(&self) -> impl Iterator<Item = &GalleryImage> {
        self.controller.store().iter()
    }

    pub fn phase(&self) -> LoadPhase {
        self.controller.phase()
    }

    pub fn is_loading(&self) -> bool {
        self.controller.phase() == LoadPhase::LoadingInitial
    }

    pub fn is_loading_more(&self) -> bool {
        self.controller.phase() == LoadPhase::LoadingMore
    }

    pub fn has_more(&self) -> bool {
        self.controller.has_more()
    }

    pub fn search(&self) -> Option<&str> {
        self.controller.search()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.controller.last_error()
    }

    pub fn near_bottom(&mut self) -> bool {
        self.controller.load_more()
    }

    pub fn set_search(&mut self, term: &str) -> bool {
        self.controller.set_search(term)
    }

    pub fn retry(&mut self) -> bool {
        self.controller.start()
    }

    pub fn uploader(&self) -> Arc<UploadCoordinator> {
        Arc::clone(&self.uploader)
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
            Some(ReloadRequest) = self.reloads.recv() => {
                debug!("reloading gallery after upload");
                self.controller.reload();
                true
            }
        }
    }

    pub fn handle_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::RowInserted { collection, record } => {
                self.controller.handle_row_inserted(&collection, record)
            }
            other => debug!(?other, "gallery ignores push event"),
        }
    }

    pub async fn unmount(mut self) {
        self.controller.shutdown();
        if let Err(error) = self.channel.unsubscribe().await {
            warn!(topic = self.channel.topic(), %error, "unsubscribe failed");
        }
        info!("gallery unmounted");
    }
}

#[cfg(test)]
#[path = "tests/gallery_tests.rs"]
mod tests;
