//! Stripe webhook handler.
//!
//! Payment failures move a wallet from active to past due; a restored
//! payment method moves it back. Both events carry the tenant in
//! `metadata.tenant_id`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use recruit_billing_core::{BillingError, BillingStatus, TenantId};

use crate::error::ApiError;
use crate::state::AppState;
use crate::stripe::WebhookEvent;

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
}

/// Handle Stripe webhooks.
pub async fn stripe_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let stripe = state.stripe.as_ref().ok_or_else(|| {
        tracing::warn!("Stripe webhook received but Stripe is not configured");
        ApiError::BadRequest("Stripe webhooks are not configured".into())
    })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing Stripe signature".into()))?;

    stripe
        .verify_webhook_signature(&body, signature)
        .map_err(|e| {
            tracing::warn!(error = %e, "Invalid Stripe webhook signature");
            ApiError::BadRequest("Invalid webhook signature".into())
        })?;

    let event: WebhookEvent =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %event.event_type,
        event_id = %event.id,
        "Received Stripe webhook"
    );

    let target = match event.event_type.as_str() {
        "payment_intent.payment_failed" => BillingStatus::PastDue,
        "setup_intent.succeeded" => BillingStatus::Active,
        _ => {
            tracing::debug!(event_type = %event.event_type, "Unhandled Stripe event");
            return Ok(Json(WebhookResponse { received: true }));
        }
    };

    let Some(tenant_id) = event.tenant_metadata() else {
        tracing::debug!(event_id = %event.id, "Stripe event without tenant metadata");
        return Ok(Json(WebhookResponse { received: true }));
    };
    let tenant_id: TenantId = tenant_id.parse().map_err(|_| {
        ApiError::BadRequest(format!("Invalid tenant_id in metadata: {tenant_id}"))
    })?;

    apply_transition(&state, &event, tenant_id, target).await?;

    Ok(Json(WebhookResponse { received: true }))
}

/// Apply a webhook-driven transition.
///
/// Transitions the state machine rejects are acknowledged and skipped, so
/// Stripe does not retry them; storage failures are returned so it does.
async fn apply_transition(
    state: &AppState,
    event: &WebhookEvent,
    tenant_id: TenantId,
    to: BillingStatus,
) -> Result<(), ApiError> {
    match state.engine.wallets.transition(tenant_id, to).await {
        Ok(wallet) => {
            tracing::info!(
                tenant_id = %tenant_id,
                event_id = %event.id,
                status = %wallet.billing_status,
                "Billing status updated from Stripe event"
            );
            Ok(())
        }
        Err(
            e @ (BillingError::InvalidStatusTransition { .. }
            | BillingError::BillingNotInitialized { .. }
            | BillingError::Conflict(_)),
        ) => {
            tracing::warn!(
                tenant_id = %tenant_id,
                event_id = %event.id,
                error = %e,
                "Ignoring Stripe event"
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
