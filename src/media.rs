use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::platform::{InboundMessage, MediaRef};

const IMAGE_EXTENSIONS: &[&str] = &[".png", ".jpg", ".jpeg", ".gif"];

/// Downloads an attachment to a local path
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, media: &MediaRef, dest: &Path) -> Result<()>;
}

/// Exclusively owned reference to a downloaded attachment.
///
/// The file is deleted by [`MediaHandle::release`]. A handle dropped without
/// being released (e.g. while unwinding) deletes the file synchronously.
#[derive(Debug)]
pub struct MediaHandle {
    path: PathBuf,
    extension: String,
    released: bool,
}

impl MediaHandle {
    pub fn new(path: PathBuf, extension: impl Into<String>) -> Self {
        Self {
            path,
            extension: extension.into(),
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string()
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Images go out inline with the text; anything else is sent separately.
    pub fn is_image(&self) -> bool {
        let ext = self.extension.to_lowercase();
        IMAGE_EXTENSIONS.contains(&ext.as_str())
    }

    /// Delete the backing file. Consumes the handle so it runs at most once.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                debug!("Deleted temporary media file: {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to delete media file: {}", self.path.display())
            }),
        }
    }
}

impl Drop for MediaHandle {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Fetches attachments of inbound messages into a transient directory
pub struct MediaAcquirer {
    directory: PathBuf,
    fetcher: Arc<dyn MediaFetcher>,
}

impl MediaAcquirer {
    pub fn new(directory: PathBuf, fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self { directory, fetcher }
    }

    /// Best effort: a failed download is logged and yields `None`.
    pub async fn acquire(&self, inbound: &InboundMessage) -> Option<MediaHandle> {
        let media = inbound.media.as_ref()?;

        let path = self
            .directory
            .join(format!("{}{}", Uuid::new_v4(), media.extension));
        // Created before the fetch so a partial download is removed on failure
        let handle = MediaHandle::new(path, media.extension.clone());

        info!("Media detected, downloading {}", media.file_id);
        match self.fetcher.fetch(media, handle.path()).await {
            Ok(()) => {
                info!("Media downloaded: {}", handle.path().display());
                Some(handle)
            }
            Err(e) => {
                warn!(
                    "Failed to download media for message {}: {:#}",
                    inbound.message_id, e
                );
                None
            }
        }
    }
}
