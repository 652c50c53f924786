use crate::error::{NeighborError, Result};
use crate::open_docs::OpenDocuments;
use crate::uri::file_uri_to_path;
use async_trait::async_trait;
use std::sync::Arc;

/// Reads document text for a URI.
#[async_trait]
pub trait FileReader: Send + Sync {
    async fn read_file_string(&self, uri: &str) -> Result<String>;
}

/// [`FileReader`] over the local filesystem for `file://` URIs.
#[derive(Debug, Clone)]
pub struct FsFileReader {
    max_bytes: u64,
}

impl FsFileReader {
    pub const DEFAULT_MAX_BYTES: u64 = 1024 * 1024;

    pub fn new() -> Self {
        Self::with_max_bytes(Self::DEFAULT_MAX_BYTES)
    }

    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

impl Default for FsFileReader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FileReader for FsFileReader {
    async fn read_file_string(&self, uri: &str) -> Result<String> {
        let path = file_uri_to_path(uri)?;
        let meta = tokio::fs::metadata(&path).await?;
        if meta.len() > self.max_bytes {
            return Err(NeighborError::FileTooLarge {
                uri: uri.to_string(),
                size: meta.len(),
                limit: self.max_bytes,
            });
        }
        let bytes = tokio::fs::read(&path).await?;
        String::from_utf8(bytes)
            .map_err(|_| NeighborError::Other(format!("{uri}: content is not valid UTF-8")))
    }
}

/// Prefers the text of an open editor buffer over the file on disk.
pub struct OverlayFileReader {
    documents: Arc<dyn OpenDocuments>,
    fallback: Arc<dyn FileReader>,
}

impl OverlayFileReader {
    pub fn new(documents: Arc<dyn OpenDocuments>, fallback: Arc<dyn FileReader>) -> Self {
        Self {
            documents,
            fallback,
        }
    }
}

#[async_trait]
impl FileReader for OverlayFileReader {
    async fn read_file_string(&self, uri: &str) -> Result<String> {
        let buffered = self
            .documents
            .open_documents()
            .into_iter()
            .find(|doc| doc.uri == uri);
        match buffered {
            Some(doc) => Ok(doc.content.to_string()),
            None => self.fallback.read_file_string(uri).await,
        }
    }
}
