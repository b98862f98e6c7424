//! Photo upload: sniff, validate, stream into the object store, record metadata.
//!
//! The body is never buffered beyond the first few chunks needed for content
//! sniffing. The object store enforces the size ceiling while the stream is
//! flowing, so an oversized upload fails part-way instead of being truncated.
//! No metadata row is written unless the store accepted the whole object;
//! objects orphaned by a later metadata failure are left in place.

use crate::models::photo::NewPhoto;
use crate::services::{
    object_store::{ByteStream, ObjectStoreError},
    photo_repository::RepositoryError,
    photo_service::PhotoService,
};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use std::io;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Bytes inspected when sniffing the payload type.
pub const SNIFF_LEN: usize = 512;
const DEFAULT_EXTENSION: &str = ".bin";
const GENERIC_TYPES: [&str; 3] = [
    "application/octet-stream",
    "binary/octet-stream",
    "text/plain",
];

/// What the client told us about the payload.
#[derive(Debug, Clone, Default)]
pub struct UploadMeta {
    pub filename: String,
    /// The part's `Content-Type` header.
    pub declared_type: Option<String>,
    /// The part's own `Content-Length`, if it sent one. The request's length
    /// also counts boundaries and part headers, so it never stands in here.
    pub declared_size: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct UploadedPhoto {
    pub id: Uuid,
    pub path: String,
    pub content_type: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    InvalidRequest(String),
    #[error("missing multipart field `file`")]
    MissingFile,
    #[error("only image uploads are allowed (got `{0}`)")]
    UnsupportedType(String),
    #[error("file too large (limit {max_bytes} bytes)")]
    TooLarge { max_bytes: u64 },
    #[error("upload timed out")]
    Timeout,
    #[error("failed to store upload: {0}")]
    Store(ObjectStoreError),
    #[error("failed to record upload: {0}")]
    Repository(#[from] RepositoryError),
    #[error("failed to read upload body: {0}")]
    Read(io::Error),
}

impl From<ObjectStoreError> for UploadError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::TooLarge { max_bytes } => Self::TooLarge { max_bytes },
            other => Self::Store(other),
        }
    }
}

impl PhotoService {
    /// Accept one photo payload and return its public id.
    #[tracing::instrument(skip(self, meta, body), fields(filename = %meta.filename))]
    pub async fn upload(
        &self,
        meta: UploadMeta,
        body: ByteStream<'_>,
    ) -> Result<UploadedPhoto, UploadError> {
        let max_bytes = self.store.max_bytes();
        if meta.declared_size.is_some_and(|size| size > max_bytes) {
            return Err(UploadError::TooLarge { max_bytes });
        }

        let filename = sanitize_filename(&meta.filename);
        let id = Uuid::now_v7();
        let key = format!("photos/{}{}", id, object_extension(&filename));

        let transfer = async {
            let (sniffed, body) = read_prefix(body, SNIFF_LEN)
                .await
                .map_err(UploadError::Read)?;
            let content_type =
                resolve_content_type(&sniffed, meta.declared_type.as_deref(), &filename);
            if !content_type.to_ascii_lowercase().starts_with("image/") {
                return Err(UploadError::UnsupportedType(content_type));
            }
            let stored = self.store.put(&key, body, &content_type).await?;
            Ok::<_, UploadError>((content_type, stored))
        };
        let (content_type, stored) =
            match tokio::time::timeout(self.settings.upload_timeout, transfer).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("upload of {} timed out", key);
                    return Err(UploadError::Timeout);
                }
            };

        let size = meta.declared_size.unwrap_or(stored.size);
        let row = self
            .repo
            .insert(&NewPhoto {
                id,
                object_key: stored.key,
                original_filename: filename,
                content_type: content_type.clone(),
                size_bytes: i64::try_from(size).unwrap_or(i64::MAX),
                public_url: stored.url,
            })
            .await?;

        info!("stored photo {} as {}", row.id, row.object_key);
        Ok(UploadedPhoto {
            id: row.id,
            path: format!("/photos/{}", row.id),
            content_type,
            size,
        })
    }
}

/// Pull chunks until `len` bytes are available for sniffing, then hand back
/// the sniff window and a stream that replays everything that was read.
async fn read_prefix<'a>(
    mut body: ByteStream<'a>,
    len: usize,
) -> io::Result<(Vec<u8>, ByteStream<'a>)> {
    let mut sniffed = Vec::with_capacity(len);
    let mut consumed: Vec<Bytes> = Vec::new();
    while sniffed.len() < len {
        let Some(chunk) = body.next().await else {
            break;
        };
        let chunk = chunk?;
        let take = (len - sniffed.len()).min(chunk.len());
        sniffed.extend_from_slice(&chunk[..take]);
        consumed.push(chunk);
    }
    let replay = futures::stream::iter(consumed.into_iter().map(Ok::<_, io::Error>));
    Ok((sniffed, replay.chain(body).boxed()))
}

fn is_generic(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.is_empty() || GENERIC_TYPES.contains(&essence.as_str())
}

/// Magic bytes win; a generic or unknown sniff falls back to the declared
/// type, then to the filename extension.
pub fn resolve_content_type(prefix: &[u8], declared: Option<&str>, filename: &str) -> String {
    if let Some(kind) = infer::get(prefix) {
        if !is_generic(kind.mime_type()) {
            return kind.mime_type().to_string();
        }
    }
    if let Some(declared) = declared.map(str::trim).filter(|d| !d.is_empty()) {
        return declared.to_string();
    }
    match extension_of(filename).as_deref() {
        Some(".heic") | Some(".heif") => "image/heic".to_string(),
        Some(ext) => mime_guess::from_ext(&ext[1..])
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
        None => "application/octet-stream".to_string(),
    }
}

/// Trim whitespace and neutralize path separators and parent references.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = name
        .trim()
        .replace('\\', "-")
        .replace('/', "-")
        .replace("..", "-");
    if cleaned.is_empty() {
        format!("upload-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    } else {
        cleaned
    }
}

/// Lowercase `.ext` of `filename`, if it has a usable one.
fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || !ext.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

fn object_extension(filename: &str) -> String {
    extension_of(filename).unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::photo_repository::PhotoRepository;
    use crate::test_utils::{harness, jpeg_bytes, png_bytes};
    use std::time::Duration;

    fn body_of(data: Vec<u8>, chunk: usize) -> ByteStream<'static> {
        let chunks: Vec<io::Result<Bytes>> = data
            .chunks(chunk)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        futures::stream::iter(chunks).boxed()
    }

    fn meta(filename: &str) -> UploadMeta {
        UploadMeta {
            filename: filename.into(),
            ..UploadMeta::default()
        }
    }

    #[tokio::test]
    async fn stores_object_and_row() {
        let h = harness(1024 * 1024).await;
        let data = jpeg_bytes(40, 30);

        let uploaded = h
            .service
            .upload(meta("Beach Trip.JPG"), body_of(data.clone(), 100))
            .await
            .unwrap();

        assert_eq!(uploaded.content_type, "image/jpeg");
        assert_eq!(uploaded.size, data.len() as u64);
        assert_eq!(uploaded.path, format!("/photos/{}", uploaded.id));
        assert_eq!(uploaded.id.get_version_num(), 7);

        let location = h.repo.lookup(uploaded.id).await.unwrap().unwrap();
        assert_eq!(location.object_key, format!("photos/{}.jpg", uploaded.id));
        assert_eq!(h.store.object(&location.object_key).unwrap().as_ref(), &data[..]);
        assert_eq!(location.public_url, format!("https://cdn.test/{}", location.object_key));
    }

    #[tokio::test]
    async fn sniffed_type_beats_declared_type_and_extension() {
        let h = harness(1024 * 1024).await;
        let upload = UploadMeta {
            filename: "photo.jpg".into(),
            declared_type: Some("image/jpeg".into()),
            declared_size: None,
        };
        let uploaded = h
            .service
            .upload(upload, body_of(png_bytes(8, 8), 7))
            .await
            .unwrap();
        assert_eq!(uploaded.content_type, "image/png");
    }

    #[tokio::test]
    async fn rejects_non_images_without_touching_store_or_db() {
        let h = harness(1024 * 1024).await;
        let err = h
            .service
            .upload(meta("notes.txt"), body_of(b"just some text".to_vec(), 4))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedType(_)));
        assert_eq!(h.store.put_calls(), 0);
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn declared_oversize_is_rejected_up_front() {
        let h = harness(16).await;
        let upload = UploadMeta {
            filename: "a.png".into(),
            declared_type: None,
            declared_size: Some(17),
        };
        let err = h
            .service
            .upload(upload, body_of(png_bytes(2, 2), 64))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { max_bytes: 16 }));
        assert_eq!(h.store.put_calls(), 0);
    }

    #[tokio::test]
    async fn oversized_stream_fails_mid_transfer() {
        let data = png_bytes(64, 64);
        let h = harness(data.len() as u64 - 1).await;
        let err = h
            .service
            .upload(meta("a.png"), body_of(data, 64))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { .. }));
        assert_eq!(h.store.len(), 0);
    }

    #[tokio::test]
    async fn store_failure_leaves_no_row() {
        let h = harness(1024 * 1024).await;
        h.store.fake_fail_put(true);
        let err = h
            .service
            .upload(meta("a.png"), body_of(png_bytes(4, 4), 64))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Store(_)));
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM photos")
            .fetch_one(&*h.repo.db)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let mut h = harness(1024 * 1024).await;
        h.service.settings.upload_timeout = Duration::from_millis(50);
        h.store.fake_delay_put(Duration::from_secs(5));
        let err = h
            .service
            .upload(meta("a.png"), body_of(png_bytes(4, 4), 64))
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Timeout));
    }

    #[tokio::test]
    async fn generic_sniff_falls_back_to_declared_then_extension() {
        let text = b"plain text body";
        assert_eq!(
            resolve_content_type(text, Some("image/heic"), "x.bin"),
            "image/heic"
        );
        assert_eq!(resolve_content_type(text, None, "IMG_1.HEIC"), "image/heic");
        assert_eq!(resolve_content_type(text, None, "a.webp"), "image/webp");
        assert_eq!(
            resolve_content_type(text, None, "noext"),
            "application/octet-stream"
        );
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename("  a/b\\c.jpg "), "a-b-c.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "----etc-passwd");
        assert!(sanitize_filename("   ").starts_with("upload-"));
    }

    #[test]
    fn object_extensions_default_to_bin() {
        assert_eq!(object_extension("a.JPEG"), ".jpeg");
        assert_eq!(object_extension("archive.tar.GZ"), ".gz");
        assert_eq!(object_extension("noext"), ".bin");
        assert_eq!(object_extension("trailing."), ".bin");
        assert_eq!(object_extension("odd.j pg"), ".bin");
    }
}
