use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, MutexGuard,
};

use shared::protocol::{GalleryImage, NewGalleryImage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    backend::{ObjectStore, RowStore},
    error::{ClientError, ClientResult},
    store::Entity,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    Idle,
    Pending,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct UploadForm {
    file: Option<SelectedFile>,
    title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub public_url: String,
}

/// Runs upload → public URL → metadata insert as one action. At most one runs
/// at a time; a stored object whose row insert fails is left behind.
pub struct UploadCoordinator {
    objects: Arc<dyn ObjectStore>,
    rows: Arc<dyn RowStore>,
    bucket: String,
    reload: mpsc::Sender<ReloadRequest>,
    in_flight: AtomicBool,
    form: Mutex<UploadForm>,
    status: Mutex<UploadStatus>,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl UploadCoordinator {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        rows: Arc<dyn RowStore>,
        bucket: impl Into<String>,
        reload: mpsc::Sender<ReloadRequest>,
    ) -> Self {
        Self {
            objects,
            rows,
            bucket: bucket.into(),
            reload,
            in_flight: AtomicBool::new(false),
            form: Mutex::new(UploadForm::default()),
            status: Mutex::new(UploadStatus::Idle),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn status(&self) -> UploadStatus {
        lock(&self.status).clone()
    }

    pub fn select_file(&self, file: SelectedFile) -> ClientResult<()> {
        if self.is_pending() {
            return Err(ClientError::UploadInFlight);
        }
        lock(&self.form).file = Some(file);
        Ok(())
    }

    pub fn set_title(&self, title: &str) -> ClientResult<()> {
        if self.is_pending() {
            return Err(ClientError::UploadInFlight);
        }
        lock(&self.form).title = title.to_string();
        Ok(())
    }

    pub fn selected_file(&self) -> Option<SelectedFile> {
        lock(&self.form).file.clone()
    }

    pub fn title(&self) -> String {
        lock(&self.form).title.clone()
    }

    pub fn can_submit(&self) -> bool {
        let form = lock(&self.form);
        form.file.is_some() && !form.title.trim().is_empty() && !self.is_pending()
    }

    pub async fn submit(&self) -> ClientResult<UploadReceipt> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(bucket = %self.bucket, "upload rejected while another is pending");
            return Err(ClientError::UploadInFlight);
        }
        let _guard = InFlight(&self.in_flight);

        let (file, title) = {
            let form = lock(&self.form);
            let Some(file) = form.file.clone() else {
                return Err(ClientError::InvalidUpload("no file selected".into()));
            };
            let title = form.title.trim().to_string();
            if title.is_empty() {
                return Err(ClientError::InvalidUpload("title is required".into()));
            }
            (file, title)
        };

        *lock(&self.status) = UploadStatus::Pending;
        match self.run(file, title).await {
            Ok(receipt) => {
                *lock(&self.form) = UploadForm::default();
                *lock(&self.status) = UploadStatus::Idle;
                if self.reload.send(ReloadRequest).await.is_err() {
                    debug!("gallery gone before reload request");
                }
                info!(key = %receipt.key, url = %receipt.public_url, "image uploaded");
                Ok(receipt)
            }
            Err(error) => {
                warn!(bucket = %self.bucket, %error, "image upload failed");
                *lock(&self.status) = UploadStatus::Failed(error.to_string());
                Err(error)
            }
        }
    }

    async fn run(&self, file: SelectedFile, title: String) -> ClientResult<UploadReceipt> {
        let key = object_key(&file.file_name);
        self.objects
            .upload(&self.bucket, &key, file.bytes, file.content_type.as_deref())
            .await?;
        let public_url = self.objects.public_url(&self.bucket, &key)?;

        let record = serde_json::to_value(NewGalleryImage {
            image_url: public_url.clone(),
            title,
            user_id: None,
        })
        .map_err(|err| ClientError::insert(GalleryImage::COLLECTION, err))?;
        self.rows.insert(GalleryImage::COLLECTION, record).await?;

        Ok(UploadReceipt { key, public_url })
    }
}

pub fn object_key(file_name: &str) -> String {
    let cleaned: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    let stem = if cleaned.is_empty() { "upload" } else { cleaned };
    format!("{}-{stem}", Uuid::new_v4().simple())
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;
