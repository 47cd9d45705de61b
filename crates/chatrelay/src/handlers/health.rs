//! Liveness and readiness probes.

use axum::Json;
use axum::http::StatusCode;
use serde::Serialize;

/// Process is up.
pub async fn livez() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[derive(Serialize)]
pub struct Readiness {
    status: &'static str,
    version: &'static str,
}

/// Ready to relay. All state is in memory, so readiness follows liveness.
pub async fn readyz() -> (StatusCode, Json<Readiness>) {
    (
        StatusCode::OK,
        Json(Readiness {
            status: "ready",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}
