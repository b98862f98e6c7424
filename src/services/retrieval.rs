//! Photo retrieval through the cache tiers.
//!
//! Originals are tried in order: local cache, object store (written back into
//! the cache), object store streamed without caching, presigned redirect, and
//! finally the row's public URL. Thumbnails are tried as: cached thumbnail,
//! then a source from the local cache or the object store which is transcoded
//! and written back, then a presigned redirect to the full-size original.
//! Each tier short-circuits on success; 503 is returned only when every tier
//! has failed.

use crate::models::{photo::PhotoLocation, size_spec::ThumbnailWidth};
use crate::services::{
    object_store::{ByteStream, ObjectStoreResult, collect_limited},
    photo_repository::RepositoryError,
    photo_service::PhotoService,
    transcoder::{MAX_DECODE_BYTES, Transcoded, transcode_blocking},
};
use bytes::Bytes;
use futures::StreamExt;
use std::{fmt, io};
use thiserror::Error;
use tokio::{
    fs::File,
    time::{Instant, timeout_at},
};
use tracing::{debug, warn};
use uuid::Uuid;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDirective {
    /// Served from (or persisted into) the cache; safe to keep forever.
    Immutable,
    /// Degraded response; clients may only hold it briefly.
    Private,
}

impl CacheDirective {
    pub fn header_value(self) -> &'static str {
        match self {
            Self::Immutable => "public, max-age=31536000, immutable",
            Self::Private => "private, max-age=60",
        }
    }
}

/// How a retrieval is answered.
pub enum Delivery {
    File {
        file: File,
        length: u64,
        content_type: String,
        cache: CacheDirective,
    },
    Bytes {
        data: Bytes,
        content_type: String,
        cache: CacheDirective,
    },
    Stream {
        body: ByteStream<'static>,
        length: Option<u64>,
        content_type: String,
        cache: CacheDirective,
    },
    Redirect {
        location: String,
        cache: CacheDirective,
    },
}

impl Delivery {
    pub fn cache_directive(&self) -> CacheDirective {
        match self {
            Self::File { cache, .. }
            | Self::Bytes { cache, .. }
            | Self::Stream { cache, .. }
            | Self::Redirect { cache, .. } => *cache,
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File {
                length,
                content_type,
                cache,
                ..
            } => f
                .debug_struct("File")
                .field("length", length)
                .field("content_type", content_type)
                .field("cache", cache)
                .finish(),
            Self::Bytes {
                data,
                content_type,
                cache,
            } => f
                .debug_struct("Bytes")
                .field("len", &data.len())
                .field("content_type", content_type)
                .field("cache", cache)
                .finish(),
            Self::Stream {
                length,
                content_type,
                cache,
                ..
            } => f
                .debug_struct("Stream")
                .field("length", length)
                .field("content_type", content_type)
                .field("cache", cache)
                .finish(),
            Self::Redirect { location, cache } => f
                .debug_struct("Redirect")
                .field("location", location)
                .field("cache", cache)
                .finish(),
        }
    }
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("photo not found")]
    NotFound,
    #[error("photo source unavailable")]
    Unavailable,
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl PhotoService {
    /// Serve photo `id` as the original (`width == None`) or as a thumbnail.
    #[tracing::instrument(skip(self))]
    pub async fn retrieve(
        &self,
        id: &str,
        width: Option<ThumbnailWidth>,
    ) -> Result<Delivery, RetrievalError> {
        let location = self.locate(id).await?;
        match width {
            None => self.serve_original(&location).await,
            Some(width) => self.serve_thumbnail(&location, width).await,
        }
    }

    async fn locate(&self, id: &str) -> Result<PhotoLocation, RetrievalError> {
        let id = Uuid::parse_str(id.trim()).map_err(|_| RetrievalError::NotFound)?;
        self.repo
            .lookup(id)
            .await?
            .ok_or(RetrievalError::NotFound)
    }

    async fn serve_original(&self, loc: &PhotoLocation) -> Result<Delivery, RetrievalError> {
        let key = loc.object_key.as_str();
        let path = self.cache.original_path(key);

        if self.cache.exists(&path).await {
            match self.cache.open(&path).await {
                Ok((file, length)) => {
                    debug!("original {} served from cache", key);
                    return Ok(Delivery::File {
                        file,
                        length,
                        content_type: content_type_or(&loc.content_type, None),
                        cache: CacheDirective::Immutable,
                    });
                }
                Err(err) => warn!("cached original {} unreadable: {}", key, err),
            }
        }

        let deadline = self.fetch_deadline();
        match timeout_at(deadline, self.store.get(key)).await {
            Ok(Ok(object)) => {
                let store_type = object.content_type.clone();
                let body = with_deadline(object.body, deadline);
                match timeout_at(deadline, self.cache.save_stream(&path, body)).await {
                    Ok(Ok(_)) => match self.cache.open(&path).await {
                        Ok((file, length)) => {
                            debug!("original {} fetched into cache", key);
                            return Ok(Delivery::File {
                                file,
                                length,
                                content_type: content_type_or(
                                    &loc.content_type,
                                    store_type.as_deref(),
                                ),
                                cache: CacheDirective::Immutable,
                            });
                        }
                        Err(err) => warn!("freshly cached original {} unreadable: {}", key, err),
                    },
                    Ok(Err(err)) => warn!("caching original {} failed: {}", key, err),
                    Err(_) => warn!("caching original {} timed out", key),
                }

                let deadline = self.fetch_deadline();
                match timeout_at(deadline, self.store.get(key)).await {
                    Ok(Ok(object)) => {
                        debug!("original {} streamed without caching", key);
                        return Ok(Delivery::Stream {
                            content_type: content_type_or(
                                &loc.content_type,
                                object.content_type.as_deref(),
                            ),
                            length: object.length,
                            body: with_deadline(object.body, deadline),
                            cache: CacheDirective::Private,
                        });
                    }
                    Ok(Err(err)) => warn!("re-fetching original {} failed: {}", key, err),
                    Err(_) => warn!("re-fetching original {} timed out", key),
                }
            }
            Ok(Err(err)) => warn!("fetching original {} failed: {}", key, err),
            Err(_) => warn!("fetching original {} timed out", key),
        }

        if let Some(location) = self.presign(key).await {
            return Ok(Delivery::Redirect {
                location,
                cache: CacheDirective::Private,
            });
        }
        if !loc.public_url.trim().is_empty() {
            debug!("original {} redirected to its public URL", key);
            return Ok(Delivery::Redirect {
                location: loc.public_url.clone(),
                cache: CacheDirective::Private,
            });
        }
        Err(RetrievalError::Unavailable)
    }

    async fn serve_thumbnail(
        &self,
        loc: &PhotoLocation,
        width: ThumbnailWidth,
    ) -> Result<Delivery, RetrievalError> {
        let key = loc.object_key.as_str();
        let thumb_path = self.cache.thumbnail_path(key, width);

        if self.cache.exists(&thumb_path).await {
            match self.cache.read(&thumb_path, MAX_DECODE_BYTES).await {
                Ok(data) => {
                    debug!("thumbnail {} {} served from cache", key, width);
                    let sniffed = infer::get(&data).map(|kind| kind.mime_type());
                    return Ok(Delivery::Bytes {
                        content_type: content_type_or(
                            sniffed.unwrap_or_default(),
                            Some(loc.content_type.as_str()),
                        ),
                        data,
                        cache: CacheDirective::Immutable,
                    });
                }
                Err(err) => warn!("cached thumbnail {} {} unreadable: {}", key, width, err),
            }
        }

        let Some(source) = self.load_source(key).await else {
            return self.redirect_to_original(key).await;
        };

        let (data, content_type) = match transcode_blocking(source.clone(), width).await {
            Ok(Transcoded::Unchanged) => {
                let sniffed = infer::get(&source).map(|kind| kind.mime_type());
                (source, content_type_or(&loc.content_type, sniffed))
            }
            Ok(Transcoded::Resized {
                data, content_type, ..
            }) => (data, content_type.to_string()),
            Err(err) => {
                warn!("transcoding {} to {} failed: {}", key, width, err);
                return self.redirect_to_original(key).await;
            }
        };

        let cache = match self.cache.save(&thumb_path, &data).await {
            Ok(()) => CacheDirective::Immutable,
            Err(err) => {
                warn!("caching thumbnail {} {} failed: {}", key, width, err);
                CacheDirective::Private
            }
        };
        Ok(Delivery::Bytes {
            data,
            content_type,
            cache,
        })
    }

    /// Source bytes for a thumbnail, bounded by the decode limit. `None` when
    /// neither the cache nor the store can provide them.
    async fn load_source(&self, key: &str) -> Option<Bytes> {
        let path = self.cache.original_path(key);
        if self.cache.exists(&path).await {
            match self.cache.read(&path, MAX_DECODE_BYTES).await {
                Ok(data) => return Some(data),
                Err(err) => warn!("cached original {} unusable as source: {}", key, err),
            }
        }

        let deadline = self.fetch_deadline();
        let fetched: ObjectStoreResult<Bytes> = match timeout_at(deadline, async {
            let object = self.store.get(key).await?;
            collect_limited(object.body, MAX_DECODE_BYTES).await
        })
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("fetching source {} timed out", key);
                return None;
            }
        };
        match fetched {
            Ok(data) => Some(data),
            Err(err) => {
                warn!("fetching source {} failed: {}", key, err);
                None
            }
        }
    }

    async fn redirect_to_original(&self, key: &str) -> Result<Delivery, RetrievalError> {
        match self.presign(key).await {
            Some(location) => Ok(Delivery::Redirect {
                location,
                cache: CacheDirective::Private,
            }),
            None => Err(RetrievalError::Unavailable),
        }
    }

    async fn presign(&self, key: &str) -> Option<String> {
        match timeout_at(
            self.fetch_deadline(),
            self.store.presign_get(key, self.settings.presign_ttl),
        )
        .await
        {
            Ok(Ok(url)) => {
                debug!("redirecting {} to a presigned URL", key);
                Some(url)
            }
            Ok(Err(err)) => {
                warn!("presigning {} failed: {}", key, err);
                None
            }
            Err(_) => {
                warn!("presigning {} timed out", key);
                None
            }
        }
    }

    fn fetch_deadline(&self) -> Instant {
        Instant::now() + self.settings.fetch_timeout
    }
}

/// End `body` with a `TimedOut` error once `deadline` passes.
fn with_deadline(body: ByteStream<'static>, deadline: Instant) -> ByteStream<'static> {
    futures::stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match timeout_at(deadline, body.next()).await {
            Ok(Some(item)) => Some((item, Some(body))),
            Ok(None) => None,
            Err(_) => Some((
                Err(io::Error::new(io::ErrorKind::TimedOut, "object read timed out")),
                None,
            )),
        }
    })
    .boxed()
}

fn content_type_or(primary: &str, fallback: Option<&str>) -> String {
    [Some(primary), fallback]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|ct| !ct.is_empty())
        .unwrap_or(FALLBACK_CONTENT_TYPE)
        .to_string()
}
