//! Usage metering handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use recruit_billing_core::{DraftRef, JobId, JobRef, JobUsage, TenantId};

use super::{parse_id, parse_tenant};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::metering::{UsageReceipt, UsageRequest};
use crate::state::AppState;

/// Maximum number of events accepted in one batch.
const MAX_BATCH_EVENTS: usize = 100;

/// Record a single usage event.
pub async fn record_usage(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<UsageRequest>,
) -> Result<Json<UsageReceipt>, ApiError> {
    tracing::debug!(
        service = %auth.service_name,
        tenant_id = %body.tenant_id,
        usage_type = %body.usage_type,
        quantity = body.quantity,
        "Processing usage event"
    );

    let receipt = state.engine.recorder.record(body).await?;
    Ok(Json(receipt))
}

/// Batch usage request.
#[derive(Debug, Deserialize)]
pub struct BatchUsageRequest {
    /// Events to record, in order.
    pub events: Vec<UsageRequest>,
}

/// Error detail for one failed batch item.
#[derive(Debug, Serialize)]
pub struct BatchItemError {
    /// Machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured context, when the error carries any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Outcome of one batch item.
#[derive(Debug, Serialize)]
pub struct BatchItemResult {
    /// Position in the request.
    pub index: usize,
    /// Whether the event was recorded.
    pub success: bool,
    /// Receipt for recorded events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<UsageReceipt>,
    /// Error for rejected events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BatchItemError>,
}

/// Batch usage response.
#[derive(Debug, Serialize)]
pub struct BatchUsageResponse {
    /// Number of events recorded.
    pub processed: usize,
    /// Number of events rejected.
    pub failed: usize,
    /// Per-event results.
    pub results: Vec<BatchItemResult>,
}

/// Record several usage events; each succeeds or fails independently.
pub async fn record_usage_batch(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<BatchUsageRequest>,
) -> Result<Json<BatchUsageResponse>, ApiError> {
    if body.events.len() > MAX_BATCH_EVENTS {
        return Err(ApiError::BadRequest(format!(
            "Batch exceeds {MAX_BATCH_EVENTS} events"
        )));
    }

    tracing::debug!(
        service = %auth.service_name,
        count = body.events.len(),
        "Processing usage batch"
    );

    let outcomes = state.engine.recorder.record_batch(body.events).await;

    let mut processed = 0;
    let mut failed = 0;
    let results = outcomes
        .into_iter()
        .enumerate()
        .map(|(index, outcome)| match outcome {
            Ok(receipt) => {
                processed += 1;
                BatchItemResult {
                    index,
                    success: true,
                    receipt: Some(receipt),
                    error: None,
                }
            }
            Err(e) => {
                failed += 1;
                let err = ApiError::from(e);
                BatchItemResult {
                    index,
                    success: false,
                    receipt: None,
                    error: Some(BatchItemError {
                        code: err.code().to_string(),
                        message: err.public_message(),
                        details: err.details(),
                    }),
                }
            }
        })
        .collect();

    Ok(Json(BatchUsageResponse {
        processed,
        failed,
        results,
    }))
}

/// Usage aggregated for one job or draft.
#[derive(Debug, Serialize)]
pub struct JobUsageResponse {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The job or draft.
    pub job_ref: JobRef,
    /// Aggregates by usage type.
    pub usage: Vec<JobUsage>,
    /// Sum of `cost_cents` across all types.
    pub total_cost_cents: i64,
}

/// Read per-job usage aggregates.
pub async fn get_job_usage(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path((tenant_id, job_ref)): Path<(String, String)>,
) -> Result<Json<JobUsageResponse>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let job_ref: JobRef = parse_id(&job_ref, "job reference")?;

    let usage = state.store.job_usage(tenant_id, job_ref).await?;
    let total_cost_cents = usage.iter().map(|u| u.cost_cents).sum();

    Ok(Json(JobUsageResponse {
        tenant_id,
        job_ref,
        usage,
        total_cost_cents,
    }))
}

/// Draft reconciliation request.
#[derive(Debug, Deserialize)]
pub struct ReconcileRequest {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Draft the usage was recorded against.
    pub draft_ref: DraftRef,
    /// The saved job.
    pub job_id: JobId,
}

/// Draft reconciliation response.
#[derive(Debug, Serialize)]
pub struct ReconcileResponse {
    /// Number of usage events re-pointed.
    pub moved_events: u64,
}

/// Move a draft's usage to its saved job.
pub async fn reconcile_draft(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<ReconcileRequest>,
) -> Result<Json<ReconcileResponse>, ApiError> {
    tracing::debug!(
        service = %auth.service_name,
        tenant_id = %body.tenant_id,
        draft = %body.draft_ref,
        job_id = %body.job_id,
        "Reconciling draft usage"
    );

    let moved_events = state
        .engine
        .recorder
        .reconcile_draft(body.tenant_id, body.draft_ref, body.job_id)
        .await?;

    Ok(Json(ReconcileResponse { moved_events }))
}
