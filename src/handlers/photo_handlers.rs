//! HTTP handlers for photo upload and retrieval.
//! Upload bodies are streamed straight into the pipeline; retrieval results
//! are turned into file, buffered, streamed or redirect responses.

use crate::{
    errors::AppError,
    models::size_spec::{Preset, ThumbnailWidth},
    services::{
        photo_service::PhotoService,
        retrieval::Delivery,
        upload::{UploadError, UploadMeta},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use std::io;
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Multipart field carrying the payload.
const FILE_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub struct PhotoQuery {
    pub thumbnail: Option<String>,
}

/// Upload a photo via `POST /photos` (multipart field `file`).
#[tracing::instrument(skip_all)]
pub async fn upload_photo(
    State(service): State<PhotoService>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, AppError> {
    let is_multipart = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("multipart/"));
    if !is_multipart {
        return Err(UploadError::InvalidRequest(
            "content type must be multipart/form-data".into(),
        )
        .into());
    }
    let mut multipart =
        multipart.map_err(|rejection| AppError::new(rejection.status(), rejection.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::new(err.status(), err.body_text()))?
    {
        if field.name() != Some(FILE_FIELD) {
            debug!("skipping multipart field {:?}", field.name());
            continue;
        }

        let meta = UploadMeta {
            filename: field.file_name().unwrap_or_default().to_string(),
            declared_type: field.content_type().map(str::to_string),
            declared_size: content_length(field.headers()),
        };
        let body = field.map(|chunk| chunk.map_err(io::Error::other)).boxed();
        let uploaded = service.upload(meta, body).await?;
        return Ok((StatusCode::CREATED, Json(uploaded)));
    }

    Err(UploadError::MissingFile.into())
}

/// Serve a photo via `GET /photos/{id}?thumbnail=small|medium|large|original`.
#[tracing::instrument(skip(service))]
pub async fn get_photo(
    State(service): State<PhotoService>,
    Path(id): Path<String>,
    Query(query): Query<PhotoQuery>,
) -> Result<Response, AppError> {
    let preset = Preset::from_query(query.thumbnail.as_deref());
    let delivery = service.retrieve(&id, preset.width()).await?;
    delivery_response(delivery)
}

/// Serve a thumbnail via `GET /photos/{id}/thumb/{spec}` where `spec` is `w<width>`.
#[tracing::instrument(skip(service))]
pub async fn get_photo_thumbnail(
    State(service): State<PhotoService>,
    Path((id, spec)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let width: ThumbnailWidth = spec.parse()?;
    let delivery = service.retrieve(&id, Some(width)).await?;
    delivery_response(delivery)
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn content_type_value(content_type: &str) -> HeaderValue {
    HeaderValue::from_str(content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

fn delivery_response(delivery: Delivery) -> Result<Response, AppError> {
    let cache = delivery.cache_directive();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache.header_value()),
    );

    let response = match delivery {
        Delivery::File {
            file,
            length,
            content_type,
            ..
        } => {
            headers.insert(header::CONTENT_TYPE, content_type_value(&content_type));
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            (headers, Body::from_stream(ReaderStream::new(file))).into_response()
        }
        Delivery::Bytes {
            data,
            content_type,
            ..
        } => {
            headers.insert(header::CONTENT_TYPE, content_type_value(&content_type));
            (headers, Body::from(data)).into_response()
        }
        Delivery::Stream {
            body,
            length,
            content_type,
            ..
        } => {
            headers.insert(header::CONTENT_TYPE, content_type_value(&content_type));
            if let Some(length) = length {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
            }
            (headers, Body::from_stream(body)).into_response()
        }
        Delivery::Redirect { location, .. } => {
            let location = HeaderValue::from_str(&location)
                .map_err(|_| AppError::internal("invalid redirect location"))?;
            headers.insert(header::LOCATION, location);
            (StatusCode::FOUND, headers).into_response()
        }
    };
    Ok(response)
}
