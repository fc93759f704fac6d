//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, patch, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, invoices, ledger, usage, wallets, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for usage endpoints.
/// Metering is called from every feature that costs money.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Wallets (service key; status and credit need the admin key)
/// - `POST /v1/wallets` - Onboard a tenant
/// - `GET /v1/wallets/:tenant_id` - Billing status
/// - `PATCH /v1/wallets/:tenant_id/settings` - Auto-recharge, cap, customer
/// - `POST /v1/wallets/:tenant_id/status` - Status transition (admin)
/// - `POST /v1/wallets/:tenant_id/credit` - Manual credit (admin)
///
/// ## Usage (service key, rate-limited)
/// - `POST /v1/usage` - Record a usage event
/// - `POST /v1/usage/batch` - Record several usage events
/// - `GET /v1/usage/jobs/:tenant_id/:job_ref` - Per-job aggregates
/// - `POST /v1/usage/reconcile` - Move draft usage to a saved job
///
/// ## Ledger and invoices (service key; settle needs the admin key)
/// - `GET /v1/ledger/:tenant_id` - Ledger entries, newest first
/// - `GET /v1/ledger/:tenant_id/audit` - Replay and chain check
/// - `POST /v1/invoices` - Generate a usage statement
/// - `GET /v1/invoices/:tenant_id` - List invoices
/// - `GET /v1/invoices/:tenant_id/:invoice_id` - Get an invoice
/// - `POST /v1/invoices/:tenant_id/:invoice_id/settle` - Settle a statement (admin)
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/stripe` - Stripe webhooks
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let usage_routes = Router::new()
        .route("/", post(usage::record_usage))
        .route("/batch", post(usage::record_usage_batch))
        .route("/jobs/:tenant_id/:job_ref", get(usage::get_job_usage))
        .route("/reconcile", post(usage::reconcile_draft))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Wallets
        .route("/wallets", post(wallets::create_wallet))
        .route("/wallets/:tenant_id", get(wallets::get_billing_status))
        .route(
            "/wallets/:tenant_id/settings",
            patch(wallets::update_settings),
        )
        .route(
            "/wallets/:tenant_id/status",
            post(wallets::transition_status),
        )
        .route("/wallets/:tenant_id/credit", post(wallets::credit_wallet))
        // Ledger
        .route("/ledger/:tenant_id", get(ledger::list_ledger))
        .route("/ledger/:tenant_id/audit", get(ledger::audit_ledger))
        // Invoices
        .route("/invoices", post(invoices::generate_invoice))
        .route("/invoices/:tenant_id", get(invoices::list_invoices))
        .route(
            "/invoices/:tenant_id/:invoice_id",
            get(invoices::get_invoice),
        )
        .route(
            "/invoices/:tenant_id/:invoice_id/settle",
            post(invoices::settle_invoice),
        )
        // Usage routes (with their own concurrency limit)
        .nest("/usage", usage_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by Stripe)
        .route("/webhooks/stripe", post(webhooks::stripe_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
