use std::sync::Arc;

use tracing::info;

use crate::{
    backend::{ObjectStore, Realtime, RowStore},
    config::Settings,
    error::ClientResult,
    realtime::RealtimeClient,
    rest::RestBackend,
};

pub struct BackendSession {
    settings: Settings,
    rows: Arc<dyn RowStore>,
    objects: Arc<dyn ObjectStore>,
    realtime: Arc<dyn Realtime>,
    socket: Option<Arc<RealtimeClient>>,
}

impl BackendSession {
    pub fn new(
        settings: Settings,
        rows: Arc<dyn RowStore>,
        objects: Arc<dyn ObjectStore>,
        realtime: Arc<dyn Realtime>,
    ) -> Self {
        Self {
            settings,
            rows,
            objects,
            realtime,
            socket: None,
        }
    }

    pub async fn connect(settings: Settings) -> ClientResult<Self> {
        settings.validate()?;
        let rest = Arc::new(RestBackend::new(&settings.backend_url, &settings.api_key)?);
        let endpoint = settings.realtime_endpoint()?;
        let socket = Arc::new(RealtimeClient::connect(&endpoint, &settings.api_key).await?);
        info!(backend = %settings.backend_url, realtime = %endpoint, "backend session connected");

        Ok(Self {
            settings,
            rows: rest.clone(),
            objects: rest,
            realtime: socket.clone(),
            socket: Some(socket),
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn rows(&self) -> Arc<dyn RowStore> {
        Arc::clone(&self.rows)
    }

    pub fn objects(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.objects)
    }

    pub fn realtime(&self) -> Arc<dyn Realtime> {
        Arc::clone(&self.realtime)
    }

    pub async fn shutdown(self) {
        if let Some(socket) = self.socket {
            socket.close().await;
        }
        info!("backend session closed");
    }
}
