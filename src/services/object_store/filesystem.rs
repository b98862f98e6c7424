//! Object store backed by a local directory.
//!
//! Objects live at `root/{key}` and are written with the same temp-file and
//! rename discipline as the local cache. There is no way to mint a signed
//! link for a file on disk, so `presign_get` only works when a public base URL
//! (for example a static file server in front of `root`) is configured.

use super::{
    ByteStream, GetOutput, ObjectStore, ObjectStoreError, ObjectStoreResult, PutOutput,
    join_url, limit_stream,
};
use crate::services::local_cache::{CacheError, write_atomically};
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
    time::Duration,
};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::debug;

const MAX_OBJECT_KEY_LEN: usize = 1024;

pub struct FileSystemStore {
    root: PathBuf,
    public_base_url: Option<String>,
    max_bytes: u64,
}

impl FileSystemStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: Option<String>, max_bytes: u64) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.filter(|url| !url.trim().is_empty()),
            max_bytes,
        }
    }

    /// Reject keys that could escape `root`.
    fn ensure_key_safe(key: &str) -> ObjectStoreResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(ObjectStoreError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(ObjectStoreError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(ObjectStoreError::InvalidKey);
        }
        if !Path::new(key)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(ObjectStoreError::InvalidKey);
        }
        Ok(())
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    fn public_url(&self, key: &str) -> String {
        self.public_base_url
            .as_deref()
            .map(|base| join_url(base, key))
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStore for FileSystemStore {
    async fn put(
        &self,
        key: &str,
        body: ByteStream<'_>,
        _content_type: &str,
    ) -> ObjectStoreResult<PutOutput> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(key);
        debug!("storing object at {}", path.display());

        let size = write_atomically(&path, limit_stream(body, self.max_bytes))
            .await
            .map_err(|err| match err {
                CacheError::Io(io) => ObjectStoreError::from(io),
                other => ObjectStoreError::Backend(other.to_string()),
            })?;

        Ok(PutOutput {
            url: self.public_url(key),
            key: key.to_string(),
            size,
        })
    }

    async fn get(&self, key: &str) -> ObjectStoreResult<GetOutput> {
        Self::ensure_key_safe(key)?;
        let path = self.object_path(key);
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ObjectStoreError::NotFound(key.to_string())
            } else {
                ObjectStoreError::from(err)
            }
        })?;
        let length = file.metadata().await?.len();

        Ok(GetOutput {
            body: ReaderStream::new(file).boxed(),
            content_type: mime_guess::from_path(key).first().map(|m| m.to_string()),
            length: Some(length),
        })
    }

    async fn presign_get(&self, key: &str, _ttl: Duration) -> ObjectStoreResult<String> {
        Self::ensure_key_safe(key)?;
        match self.public_base_url.as_deref() {
            Some(base) => Ok(join_url(base, key)),
            None => Err(ObjectStoreError::PresignUnsupported),
        }
    }

    fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}
