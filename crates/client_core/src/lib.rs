//! View core for the chat room, image gallery and metrics dashboard clients.
//!
//! Each view keeps a local list of backend rows in sync with pages it loads
//! and rows pushed to it over the realtime socket. The backend is reached only
//! through the traits in [`backend`].

pub mod backend;
pub mod chat;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod gallery;
pub mod metrics;
pub mod presence;
pub mod realtime;
pub mod reconcile;
pub mod rest;
pub mod session;
pub mod store;
pub mod upload;

pub use backend::{
    ChannelSpec, Filter, ObjectStore, Realtime, RealtimeChannel, RowQuery, RowStore, Subscription,
};
pub use chat::ChatView;
pub use config::{load_settings, Settings};
pub use dashboard::Dashboard;
pub use error::{ClientError, ClientResult};
pub use gallery::GalleryView;
pub use metrics::{HttpMetricsSource, MetricsSource};
pub use presence::PresenceTracker;
pub use reconcile::{LoadPhase, ReconciliationController};
pub use session::BackendSession;
pub use store::{Entity, EntityListStore};
pub use upload::{SelectedFile, UploadCoordinator, UploadStatus};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
