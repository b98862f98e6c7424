//! Represents an uploaded photo and the narrow views the pipeline reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A persisted photo row.
///
/// The row only describes the object; the bytes live in the object store under
/// `object_key`, which never changes once assigned.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Photo {
    /// Time-sortable public identifier (UUIDv7).
    pub id: Uuid,

    /// Address of the payload inside the object store namespace.
    pub object_key: String,

    /// Sanitized filename sent by the client. Advisory only.
    pub original_filename: String,

    /// Sniffed MIME type.
    pub content_type: String,

    /// Size declared by the client at upload time.
    pub size_bytes: i64,

    /// Durable address returned by the store or prefixed by the CDN base URL.
    /// Empty when neither is available.
    pub public_url: String,

    /// When the row was inserted.
    pub created_at: DateTime<Utc>,
}

/// Values needed to insert a new photo row.
#[derive(Clone, Debug)]
pub struct NewPhoto {
    pub id: Uuid,
    pub object_key: String,
    pub original_filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub public_url: String,
}

/// The part of a photo row that retrieval needs.
#[derive(Clone, FromRow, Debug, PartialEq, Eq)]
pub struct PhotoLocation {
    pub object_key: String,
    pub content_type: String,
    pub public_url: String,
}
