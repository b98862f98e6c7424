//! Durable object storage for photo payloads.
//!
//! The pipeline only talks to the [`ObjectStore`] trait. `s3` is the
//! production backend; `filesystem` keeps objects on local disk for
//! development and single-node deployments.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream::BoxStream};
use std::{io, time::Duration};
use thiserror::Error;

#[cfg(test)]
pub mod fake;
pub mod filesystem;
pub mod s3;

/// A fallible stream of body chunks.
pub type ByteStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Marker error carried inside an `io::Error` when a stream passes its ceiling.
#[derive(Debug, Error)]
#[error("stream exceeded {0} bytes")]
pub struct SizeLimitExceeded(pub u64);

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("object exceeds the {max_bytes} byte limit")]
    TooLarge { max_bytes: u64 },
    #[error("invalid object key")]
    InvalidKey,
    #[error("direct links are not supported by this store")]
    PresignUnsupported,
    #[error("object store request failed: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for ObjectStoreError {
    fn from(err: io::Error) -> Self {
        match err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<SizeLimitExceeded>())
        {
            Some(limit) => Self::TooLarge { max_bytes: limit.0 },
            None => Self::Io(err),
        }
    }
}

pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Result of a successful `put`.
#[derive(Debug, Clone)]
pub struct PutOutput {
    /// Durable public address, empty when the store cannot provide one.
    pub url: String,
    pub key: String,
    /// Bytes actually stored.
    pub size: u64,
}

/// An object body ready to be consumed.
pub struct GetOutput {
    pub body: ByteStream<'static>,
    pub content_type: Option<String>,
    pub length: Option<u64>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Store `body` under `key`. Bodies above [`ObjectStore::max_bytes`] fail
    /// part-way with [`ObjectStoreError::TooLarge`].
    async fn put(
        &self,
        key: &str,
        body: ByteStream<'_>,
        content_type: &str,
    ) -> ObjectStoreResult<PutOutput>;

    async fn get(&self, key: &str) -> ObjectStoreResult<GetOutput>;

    /// A time-limited URL granting direct read access to `key`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> ObjectStoreResult<String>;

    /// Largest object this store accepts.
    fn max_bytes(&self) -> u64;
}

/// Wrap `body` so it yields an error as soon as more than `max_bytes` pass.
pub fn limit_stream(body: ByteStream<'_>, max_bytes: u64) -> ByteStream<'_> {
    let mut seen: u64 = 0;
    body.map(move |chunk| {
        let chunk = chunk?;
        seen += chunk.len() as u64;
        if seen > max_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                SizeLimitExceeded(max_bytes),
            ));
        }
        Ok(chunk)
    })
    .boxed()
}

/// Buffer a whole body in memory, failing once it passes `max_bytes`.
pub async fn collect_limited(body: ByteStream<'_>, max_bytes: u64) -> ObjectStoreResult<Bytes> {
    let mut limited = limit_stream(body, max_bytes);
    let mut buf = BytesMut::new();
    while let Some(chunk) = limited.next().await {
        buf.extend_from_slice(&chunk?);
    }
    Ok(buf.freeze())
}

/// Join a base URL and an object key with exactly one slash.
pub fn join_url(base: &str, key: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), key.trim_start_matches('/'))
}
