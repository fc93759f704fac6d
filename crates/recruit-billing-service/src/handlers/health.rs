//! Health check handler.
//!
//! Reports whether the store answers and which payment provider captures
//! recharges. An unreachable store turns the response into a 503 so load
//! balancers stop routing metering traffic here.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` or `degraded`.
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
    /// `reachable` or `unreachable`.
    pub store: &'static str,
    /// `stripe` or `unconfigured`.
    pub payments: &'static str,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let store_ok = match state.store.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "Store health check failed");
            false
        }
    };

    let code = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(HealthResponse {
            status: if store_ok { "ok" } else { "degraded" },
            service: "recruit-billing",
            version: env!("CARGO_PKG_VERSION"),
            store: if store_ok { "reachable" } else { "unreachable" },
            payments: if state.has_stripe() {
                "stripe"
            } else {
                "unconfigured"
            },
        }),
    )
}
