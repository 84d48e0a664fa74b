//! Health & readiness handlers.
//!
//! - GET /health, /healthz -> simple liveness ("ok")
//! - GET /readyz           -> readiness: the object store answers and the
//!   configured bucket exists

use super::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;

/// `GET /healthz`
///
/// Liveness probe. Always returns 200 OK and never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Asks the store whether the bucket exists. HTTP 200 when it does, HTTP 503
/// when the store is unreachable or the bucket is missing.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let store_check = match state.files.ready().await {
        Ok(true) => CheckStatus {
            ok: true,
            error: None,
        },
        Ok(false) => CheckStatus {
            ok: false,
            error: Some(format!("bucket `{}` does not exist", state.files.bucket())),
        },
        Err(err) => CheckStatus {
            ok: false,
            error: Some(if state.expose_internal_errors {
                err.to_string()
            } else {
                "object store unreachable".to_string()
            }),
        },
    };

    let overall_ok = store_check.ok;
    let mut checks = HashMap::new();
    checks.insert("object_store", store_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
