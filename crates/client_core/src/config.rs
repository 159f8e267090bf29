use std::{fs, io, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

use crate::error::{ClientError, ClientResult};

pub const DEFAULT_CONFIG_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub backend_url: String,
    pub api_key: String,
    pub realtime_url: Option<String>,
    pub metrics_url: String,
    pub metrics_poll_ms: u64,
    pub gallery_page_size: usize,
    pub chat_history_limit: usize,
    pub typing_idle_ms: u64,
    pub image_bucket: String,
    pub chat_channel: String,
    pub gallery_channel: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:54321".into(),
            api_key: String::new(),
            realtime_url: None,
            metrics_url: "http://127.0.0.1:8000/metrics".into(),
            metrics_poll_ms: 5_000,
            gallery_page_size: 8,
            chat_history_limit: 50,
            typing_idle_ms: 2_000,
            image_bucket: "images".into(),
            chat_channel: "room1".into(),
            gallery_channel: "gallery".into(),
        }
    }
}

impl Settings {
    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_poll_ms)
    }

    pub fn realtime_endpoint(&self) -> ClientResult<String> {
        match &self.realtime_url {
            Some(url) => Ok(url.clone()),
            None => derive_realtime_url(&self.backend_url),
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.gallery_page_size == 0 || self.chat_history_limit == 0 {
            return Err(ClientError::Config("page sizes must be positive".into()));
        }
        if self.metrics_poll_ms == 0 {
            return Err(ClientError::Config("metrics poll interval must be positive".into()));
        }
        if self.image_bucket.trim().is_empty() {
            return Err(ClientError::Config("image bucket is required".into()));
        }
        derive_realtime_url(&self.backend_url).map(|_| ())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileSettings {
    backend_url: Option<String>,
    api_key: Option<String>,
    realtime_url: Option<String>,
    metrics_url: Option<String>,
    metrics_poll_ms: Option<u64>,
    gallery_page_size: Option<usize>,
    chat_history_limit: Option<usize>,
    typing_idle_ms: Option<u64>,
    image_bucket: Option<String>,
    chat_channel: Option<String>,
    gallery_channel: Option<String>,
}

/// Defaults, then the config file, then environment overrides.
///
/// A missing `client.toml` is fine; an explicitly named file must exist.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    let (path, required) = match path {
        Some(path) => (path, true),
        None => (Path::new(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(path) {
        Ok(raw) => apply_file(&mut settings, &raw)
            .with_context(|| format!("invalid config file '{}'", path.display()))?,
        Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read config file '{}'", path.display()))
        }
    }

    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

pub fn apply_file(settings: &mut Settings, raw: &str) -> anyhow::Result<()> {
    let file: FileSettings = toml::from_str(raw)?;

    if let Some(v) = file.backend_url {
        settings.backend_url = v;
    }
    if let Some(v) = file.api_key {
        settings.api_key = v;
    }
    if let Some(v) = file.realtime_url {
        settings.realtime_url = Some(v);
    }
    if let Some(v) = file.metrics_url {
        settings.metrics_url = v;
    }
    if let Some(v) = file.metrics_poll_ms {
        settings.metrics_poll_ms = v;
    }
    if let Some(v) = file.gallery_page_size {
        settings.gallery_page_size = v;
    }
    if let Some(v) = file.chat_history_limit {
        settings.chat_history_limit = v;
    }
    if let Some(v) = file.typing_idle_ms {
        settings.typing_idle_ms = v;
    }
    if let Some(v) = file.image_bucket {
        settings.image_bucket = v;
    }
    if let Some(v) = file.chat_channel {
        settings.chat_channel = v;
    }
    if let Some(v) = file.gallery_channel {
        settings.gallery_channel = v;
    }
    Ok(())
}

pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("BACKEND_URL") {
        settings.backend_url = v;
    }
    if let Some(v) = lookup("APP__BACKEND_URL") {
        settings.backend_url = v;
    }

    if let Some(v) = lookup("BACKEND_API_KEY") {
        settings.api_key = v;
    }
    if let Some(v) = lookup("APP__API_KEY") {
        settings.api_key = v;
    }

    if let Some(v) = lookup("REALTIME_URL") {
        settings.realtime_url = Some(v);
    }
    if let Some(v) = lookup("APP__REALTIME_URL") {
        settings.realtime_url = Some(v);
    }

    if let Some(v) = lookup("METRICS_URL") {
        settings.metrics_url = v;
    }
    if let Some(v) = lookup("APP__METRICS_URL") {
        settings.metrics_url = v;
    }

    if let Some(v) = lookup("APP__METRICS_POLL_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.metrics_poll_ms = parsed;
        }
    }
    if let Some(v) = lookup("APP__GALLERY_PAGE_SIZE") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.gallery_page_size = parsed;
        }
    }
    if let Some(v) = lookup("APP__CHAT_HISTORY_LIMIT") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.chat_history_limit = parsed;
        }
    }
    if let Some(v) = lookup("APP__TYPING_IDLE_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.typing_idle_ms = parsed;
        }
    }

    if let Some(v) = lookup("APP__IMAGE_BUCKET") {
        settings.image_bucket = v;
    }
}

pub fn derive_realtime_url(backend_url: &str) -> ClientResult<String> {
    let backend_url = backend_url.trim().trim_end_matches('/');
    let ws_url = if backend_url.starts_with("https://") {
        backend_url.replacen("https://", "wss://", 1)
    } else if backend_url.starts_with("http://") {
        backend_url.replacen("http://", "ws://", 1)
    } else {
        return Err(ClientError::Config(
            "backend_url must start with http:// or https://".into(),
        ));
    };
    Ok(format!("{ws_url}/realtime/v1/websocket"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
