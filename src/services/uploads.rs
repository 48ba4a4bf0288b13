//! Storage for inspection photos uploaded ahead of proposal generation.

use std::path::PathBuf;

use image::ImageFormat;
use thiserror::Error;
use uuid::Uuid;

/// Public URL prefix under which stored photos are served.
pub const PUBLIC_PREFIX: &str = "/storage/inspections";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("The image field is required.")]
    Empty,

    #[error("The image may not be greater than {limit_kb} kilobytes.")]
    TooLarge { limit_kb: usize },

    #[error("The image must be a file of type: jpeg, png, jpg, gif, webp.")]
    UnsupportedType,

    #[error("failed to store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub path: PathBuf,
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_bytes: usize,
}

fn extension(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Jpeg => Some("jpg"),
        ImageFormat::Png => Some("png"),
        ImageFormat::Gif => Some("gif"),
        ImageFormat::WebP => Some("webp"),
        _ => None,
    }
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>, max_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Store an uploaded photo under a random name. The type is taken from
    /// the file content, not from what the client claims.
    pub async fn store(&self, bytes: &[u8]) -> Result<StoredImage, UploadError> {
        if bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        if bytes.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                limit_kb: self.max_bytes / 1024,
            });
        }
        let ext = image::guess_format(bytes)
            .ok()
            .and_then(extension)
            .ok_or(UploadError::UnsupportedType)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| UploadError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let filename = format!("{}.{}", Uuid::new_v4(), ext);
        let path = self.dir.join(&filename);
        tokio::fs::write(&path, bytes).await.map_err(|source| UploadError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(path = %path.display(), size = bytes.len(), "Inspection image stored");
        Ok(StoredImage {
            path,
            url: format!("{}/{}", PUBLIC_PREFIX, filename),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::write_png;

    #[tokio::test]
    async fn test_png_is_stored_under_public_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("src.png");
        write_png(&source, 3, 3, [1, 1, 1]);
        let bytes = std::fs::read(&source).unwrap();

        let store = UploadStore::new(dir.path().join("inspections"), 1024 * 1024);
        let stored = store.store(&bytes).await.unwrap();

        assert!(stored.url.starts_with("/storage/inspections/"));
        assert!(stored.url.ends_with(".png"));
        assert_eq!(std::fs::read(&stored.path).unwrap(), bytes);
    }

    #[tokio::test]
    async fn test_rejects_non_images_and_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path(), 16);

        assert!(matches!(store.store(b"").await, Err(UploadError::Empty)));
        assert!(matches!(store.store(b"plain text").await, Err(UploadError::UnsupportedType)));
        assert!(matches!(
            store.store(&[0u8; 17]).await,
            Err(UploadError::TooLarge { limit_kb: 0 })
        ));
    }
}
