//! Local file storage for uploads
//!
//! Blobs are written under a root directory at their logical path
//! (`baths/{uid}/{ts}-{name}`, `avatars/{uid}/{name}`) and served back by
//! the API under a public URL prefix.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::error::UploadError;
use super::BlobStorage;

pub struct LocalBlobStorage {
    /// Root directory for all uploads (e.g. "./data/media")
    root_path: PathBuf,
    /// Public URL prefix (e.g. "http://localhost:8080/media")
    url_prefix: String,
    max_bytes: usize,
}

impl LocalBlobStorage {
    pub fn new(
        root: impl Into<PathBuf>,
        url_prefix: String,
        max_bytes: usize,
    ) -> Result<Self, UploadError> {
        let root_path = root.into();
        std::fs::create_dir_all(&root_path)?;
        Ok(Self {
            root_path,
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
            max_bytes,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root_path
    }

    /// Map a logical path to a file below the root, refusing escapes
    fn resolve(&self, path: &str) -> Result<PathBuf, UploadError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && !path.contains('\\')
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(UploadError::InvalidPath(path.to_string()));
        }
        Ok(self.root_path.join(relative))
    }
}

/// A file received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            data,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// File name reduced to safe characters
    pub fn safe_filename(&self) -> String {
        sanitize_filename(&self.filename)
    }
}

/// Reduce a client-supplied file name to `[A-Za-z0-9._-]`
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn upload(
        &self,
        path: &str,
        data: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<String, UploadError> {
        if data.is_empty() {
            return Err(UploadError::Empty);
        }
        if data.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: data.len(),
                max: self.max_bytes,
            });
        }

        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&target, &data).await?;

        tracing::debug!(
            path,
            bytes = data.len(),
            content_type = content_type.unwrap_or("application/octet-stream"),
            "Blob stored"
        );
        Ok(format!("{}/{}", self.url_prefix, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_returns_url() {
        let dir = tempdir().unwrap();
        let blobs =
            LocalBlobStorage::new(dir.path(), "http://localhost:8080/media/".into(), 1024).unwrap();

        let url = blobs
            .upload("avatars/u1/me.png", vec![1, 2, 3], Some("image/png"))
            .await
            .unwrap();

        assert_eq!(url, "http://localhost:8080/media/avatars/u1/me.png");
        let stored = std::fs::read(dir.path().join("avatars/u1/me.png")).unwrap();
        assert_eq!(stored, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_upload_rejects_bad_input() {
        let dir = tempdir().unwrap();
        let blobs = LocalBlobStorage::new(dir.path(), "/media".into(), 4).unwrap();

        assert!(matches!(
            blobs.upload("../escape.png", vec![1], None).await,
            Err(UploadError::InvalidPath(_))
        ));
        assert!(matches!(
            blobs.upload("/etc/passwd", vec![1], None).await,
            Err(UploadError::InvalidPath(_))
        ));
        assert!(matches!(
            blobs.upload("a.png", vec![], None).await,
            Err(UploadError::Empty)
        ));
        assert!(matches!(
            blobs.upload("a.png", vec![0; 5], None).await,
            Err(UploadError::TooLarge { size: 5, max: 4 })
        ));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("bad bilde.jpg"), "bad_bilde.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename("C:\\fotos\\hav.png"), "hav.png");
    }
}
