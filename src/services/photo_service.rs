//! src/services/photo_service.rs
//!
//! PhotoService ties the pipeline collaborators together: the metadata
//! repository, the object store and the local cache. It is cheap to clone and
//! is the axum router state. Upload and retrieval live in their own modules as
//! further `impl PhotoService` blocks.

use crate::services::{
    local_cache::LocalCache, object_store::ObjectStore, photo_repository::PhotoRepository,
};
use std::{sync::Arc, time::Duration};

pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(5 * 60);

/// Bounds applied to every object store call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhotoSettings {
    /// Budget for streaming an upload into the store.
    pub upload_timeout: Duration,
    /// Budget for a `get` including reading its body, and for `presign_get`.
    pub fetch_timeout: Duration,
    /// Lifetime of presigned redirect targets.
    pub presign_ttl: Duration,
}

impl Default for PhotoSettings {
    fn default() -> Self {
        Self {
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            presign_ttl: DEFAULT_PRESIGN_TTL,
        }
    }
}

#[derive(Clone)]
pub struct PhotoService {
    pub(crate) repo: Arc<dyn PhotoRepository>,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) cache: LocalCache,
    pub(crate) settings: PhotoSettings,
}

impl PhotoService {
    pub fn new(
        repo: Arc<dyn PhotoRepository>,
        store: Arc<dyn ObjectStore>,
        cache: LocalCache,
        settings: PhotoSettings,
    ) -> Self {
        Self {
            repo,
            store,
            cache,
            settings,
        }
    }

    pub fn repository(&self) -> &dyn PhotoRepository {
        self.repo.as_ref()
    }

    pub fn cache(&self) -> &LocalCache {
        &self.cache
    }

    pub fn settings(&self) -> PhotoSettings {
        self.settings
    }

    /// Largest upload accepted, as enforced by the object store.
    pub fn max_upload_bytes(&self) -> u64 {
        self.store.max_bytes()
    }
}
