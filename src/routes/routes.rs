//! Defines routes for the photo pipeline.
//!
//! ## Structure
//! - **Photo endpoints**
//!   - `POST /photos`: multipart upload (field `file`)
//!   - `GET  /photos/{id}`: original or preset thumbnail (`?thumbnail=`)
//!   - `GET  /photos/{id}/thumb/{spec}`: thumbnail at an explicit `w<width>`
//!
//! - **Probes**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        photo_handlers::{get_photo, get_photo_thumbnail, upload_photo},
    },
    services::photo_service::PhotoService,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Room for multipart boundaries and part headers on top of the payload.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build the router. Upload bodies may carry up to `max_upload_bytes` of
/// payload; the object store enforces the exact ceiling while streaming.
pub fn routes(max_upload_bytes: u64) -> Router<PhotoService> {
    let body_limit = usize::try_from(max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route(
            "/photos",
            post(upload_photo).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/photos/{id}", get(get_photo))
        .route("/photos/{id}/thumb/{spec}", get(get_photo_thumbnail))
}
