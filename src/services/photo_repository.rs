//! src/services/photo_repository.rs
//!
//! Metadata store for photos. The pipeline needs exactly two operations,
//! "insert a row" and "resolve an id to its object key", so the trait stays
//! that narrow. `SqlitePhotoRepository` is the sqlx-backed implementation.

use crate::models::photo::{NewPhoto, Photo, PhotoLocation};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Schema applied by `--migrate` and at startup.
pub const SCHEMA_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("photo `{0}` already exists")]
    Conflict(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait PhotoRepository: Send + Sync + 'static {
    async fn insert(&self, photo: &NewPhoto) -> RepositoryResult<Photo>;

    async fn lookup(&self, id: Uuid) -> RepositoryResult<Option<PhotoLocation>>;

    /// Cheap liveness check used by the readiness probe.
    async fn ping(&self) -> RepositoryResult<()>;
}

#[derive(Clone)]
pub struct SqlitePhotoRepository {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl SqlitePhotoRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> RepositoryResult<()> {
        let statements = SCHEMA_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PhotoRepository for SqlitePhotoRepository {
    async fn insert(&self, photo: &NewPhoto) -> RepositoryResult<Photo> {
        let inserted = sqlx::query_as::<_, Photo>(
            r#"
            INSERT INTO photos (
                id, object_key, original_filename, content_type, size_bytes,
                public_url, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id, object_key, original_filename, content_type, size_bytes,
                      public_url, created_at
            "#,
        )
        .bind(photo.id)
        .bind(&photo.object_key)
        .bind(&photo.original_filename)
        .bind(&photo.content_type)
        .bind(photo.size_bytes)
        .bind(&photo.public_url)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(RepositoryError::Conflict(photo.object_key.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn lookup(&self, id: Uuid) -> RepositoryResult<Option<PhotoLocation>> {
        let row = sqlx::query_as::<_, PhotoLocation>(
            "SELECT object_key, content_type, public_url FROM photos WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row)
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&*self.db).await?;
        Ok(())
    }
}
