//! Liveness and readiness endpoints.
//!
//! Readiness covers what every upload or retrieval depends on locally: the
//! metadata database and a writable cache directory. The object store is left
//! out; retrieval degrades around it.

use crate::services::photo_service::PhotoService;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

#[derive(Serialize)]
struct Readiness {
    status: &'static str,
    checks: BTreeMap<&'static str, Check>,
}

#[derive(Serialize)]
struct Check {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<E: std::fmt::Display> From<Result<(), E>> for Check {
    fn from(result: Result<(), E>) -> Self {
        Self {
            ok: result.is_ok(),
            error: result.err().map(|err| err.to_string()),
        }
    }
}

/// `GET /healthz`: 200 while the process is serving.
pub async fn healthz() -> impl IntoResponse {
    Json(Health { status: "ok" })
}

/// `GET /readyz`: 200 when the database answers and the cache accepts writes,
/// 503 otherwise.
pub async fn readyz(State(service): State<PhotoService>) -> impl IntoResponse {
    let checks = BTreeMap::from([
        ("sqlite", Check::from(service.repository().ping().await)),
        ("cache", Check::from(service.cache().check_writable().await)),
    ]);

    let ready = checks.values().all(|check| check.ok);
    if !ready {
        for (name, check) in &checks {
            if let Some(err) = &check.error {
                warn!("readiness check {} failed: {}", name, err);
            }
        }
    }
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(Readiness {
            status: if ready { "ok" } else { "unavailable" },
            checks,
        }),
    )
}
