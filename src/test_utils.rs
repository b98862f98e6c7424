use crate::services::{
    local_cache::LocalCache,
    object_store::fake::FakeObjectStore,
    photo_repository::SqlitePhotoRepository,
    photo_service::{PhotoService, PhotoSettings},
};
use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};
use sqlx::sqlite::SqlitePoolOptions;
use std::io::Cursor;
use std::sync::Arc;
use tempfile::TempDir;

/// A `PhotoService` over fakes, with handles to every collaborator.
pub struct Harness {
    pub service: PhotoService,
    pub store: FakeObjectStore,
    pub repo: SqlitePhotoRepository,
    pub cache_dir: TempDir,
}

/// Builds a service over an in-memory repository, a fake store accepting up to
/// `max_bytes` and a fresh cache directory.
pub async fn harness(max_bytes: u64) -> Harness {
    let repo = memory_repository().await;
    let store = FakeObjectStore::new(max_bytes);
    let cache_dir = tempfile::tempdir().unwrap();
    let service = PhotoService::new(
        Arc::new(repo.clone()),
        Arc::new(store.clone()),
        LocalCache::new(cache_dir.path()),
        PhotoSettings::default(),
    );
    Harness {
        service,
        store,
        repo,
        cache_dir,
    }
}

/// Creates a migrated repository over a private in-memory SQLite database.
///
/// The pool is capped at one connection because every `:memory:` connection
/// opens its own empty database.
pub async fn memory_repository() -> SqlitePhotoRepository {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let repo = SqlitePhotoRepository::new(Arc::new(pool));
    repo.migrate().await.unwrap();
    repo
}

fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    }))
}

fn encode(image: DynamicImage, format: ImageOutputFormat) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).unwrap();
    out.into_inner()
}

/// A `width` x `height` JPEG test image.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(gradient(width, height), ImageOutputFormat::Jpeg(90))
}

/// A `width` x `height` PNG test image.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode(gradient(width, height), ImageOutputFormat::Png)
}
