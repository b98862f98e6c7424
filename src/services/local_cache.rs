//! src/services/local_cache.rs
//!
//! LocalCache: a process-local, content-addressed read-through cache for
//! original photos and generated thumbnails. The cache is a plain value over a
//! root directory; it keeps no in-memory index and needs no locking. Entries
//! are sharded beneath
//!
//! - `root/photos/{shard}/{basename}` for originals
//! - `root/thumbs/{spec}/{shard}/{basename}` for thumbnails
//!
//! where `shard` is the first byte of MD5(object_key) in hex.

use crate::models::size_spec::ThumbnailWidth;
use crate::services::object_store::ByteStream;
use bytes::Bytes;
use futures::{StreamExt, pin_mut};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

const ORIGINALS_DIR: &str = "photos";
const THUMBNAILS_DIR: &str = "thumbs";
const READY_MARKER: &[u8] = b"ready";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache path `{0}` has no parent directory")]
    NoParent(PathBuf),
    #[error("cached entry is {size} bytes, above the {max_bytes} byte limit")]
    TooLarge { size: u64, max_bytes: u64 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type CacheResult<T> = Result<T, CacheError>;

#[derive(Clone, Debug)]
pub struct LocalCache {
    /// Directory holding both cache trees.
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the cached original for `object_key`.
    pub fn original_path(&self, object_key: &str) -> PathBuf {
        let (shard, file_name) = entry_name(object_key);
        let mut path = self.root.join(ORIGINALS_DIR);
        path.push(shard);
        path.push(file_name);
        path
    }

    /// Path of the cached thumbnail for `object_key` at `width`.
    pub fn thumbnail_path(&self, object_key: &str, width: ThumbnailWidth) -> PathBuf {
        let (shard, file_name) = entry_name(object_key);
        let mut path = self.root.join(THUMBNAILS_DIR);
        path.push(width.to_string());
        path.push(shard);
        path.push(file_name);
        path
    }

    /// True if a regular file is present at `path`.
    pub async fn exists(&self, path: &Path) -> bool {
        matches!(fs::metadata(path).await, Ok(meta) if meta.is_file())
    }

    /// Atomically write `data` to `path`.
    pub async fn save(&self, path: &Path, data: &[u8]) -> CacheResult<()> {
        let chunk = Bytes::copy_from_slice(data);
        let stream = futures::stream::once(async move { Ok::<_, io::Error>(chunk) }).boxed();
        self.save_stream(path, stream).await.map(|_| ())
    }

    /// Atomically write a streamed body to `path`, returning the byte count.
    ///
    /// Readers never observe a partial file: the body lands in a uniquely
    /// named sibling first and is renamed into place once complete.
    pub async fn save_stream(&self, path: &Path, stream: ByteStream<'_>) -> CacheResult<u64> {
        let written = write_atomically(path, stream).await?;
        debug!("cached {} bytes at {}", written, path.display());
        Ok(written)
    }

    /// Open a cached entry for streaming, returning the handle and its length.
    pub async fn open(&self, path: &Path) -> CacheResult<(File, u64)> {
        let file = File::open(path).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(CacheError::Io(io::Error::new(
                ErrorKind::InvalidInput,
                "cache entry is not a regular file",
            )));
        }
        Ok((file, meta.len()))
    }

    /// Read a cached entry into memory, refusing entries above `max_bytes`.
    pub async fn read(&self, path: &Path, max_bytes: u64) -> CacheResult<Bytes> {
        let (file, size) = self.open(path).await?;
        if size > max_bytes {
            return Err(CacheError::TooLarge { size, max_bytes });
        }
        let mut buf = Vec::with_capacity(size as usize);
        file.take(max_bytes + 1).read_to_end(&mut buf).await?;
        if buf.len() as u64 > max_bytes {
            return Err(CacheError::TooLarge {
                size: buf.len() as u64,
                max_bytes,
            });
        }
        Ok(Bytes::from(buf))
    }

    /// Push a marker through the same write and read paths real entries use,
    /// then remove it.
    pub async fn check_writable(&self) -> CacheResult<()> {
        let path = self.root.join(format!(".ready-{}", Uuid::new_v4()));
        self.save(&path, READY_MARKER).await?;
        let read = self.read(&path, READY_MARKER.len() as u64).await;
        let removed = fs::remove_file(&path).await;
        if read? != READY_MARKER {
            return Err(CacheError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "readiness marker came back altered",
            )));
        }
        removed?;
        Ok(())
    }
}

/// Shard directory and file name for a cache entry.
///
/// The file name is the object key's basename, or the full digest when the key
/// has none.
fn entry_name(object_key: &str) -> (String, String) {
    let digest = format!("{:x}", md5::compute(object_key.as_bytes()));
    let file_name = Path::new(object_key)
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| digest.clone());
    (digest[..2].to_string(), file_name)
}

/// Stream `stream` into a temporary sibling of `path`, fsync it, then rename it
/// into place. The temporary file is removed on every error path.
pub(crate) async fn write_atomically(path: &Path, stream: ByteStream<'_>) -> CacheResult<u64> {
    let parent = path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| CacheError::NoParent(path.to_path_buf()))?;
    fs::create_dir_all(&parent).await?;
    let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
    let mut file = File::create(&tmp_path).await?;

    let mut written: u64 = 0;
    pin_mut!(stream);
    while let Some(chunk_res) = stream.next().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(CacheError::Io(err));
            }
        };
        written += chunk.len() as u64;
        if let Err(err) = file.write_all(&chunk).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(CacheError::Io(err));
        }
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(CacheError::Io(err));
    }
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(CacheError::Io(err));
    }
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(CacheError::Io(err));
    }

    Ok(written)
}
