//! Ledger read handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Serialize;

use recruit_billing_core::ledger::audit;
use recruit_billing_core::{LedgerAudit, LedgerEntry};

use super::{parse_tenant, Pagination};
use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Ledger page response.
#[derive(Debug, Serialize)]
pub struct LedgerResponse {
    /// Entries, newest first.
    pub entries: Vec<LedgerEntry>,
    /// Limit that was applied.
    pub limit: usize,
    /// Offset that was applied.
    pub offset: usize,
}

/// List ledger entries for a tenant, newest first.
pub async fn list_ledger(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(tenant_id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<LedgerResponse>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let limit = page.limit();

    let entries = state
        .store
        .list_ledger(tenant_id, limit, page.offset)
        .await?;

    Ok(Json(LedgerResponse {
        entries,
        limit,
        offset: page.offset,
    }))
}

/// Audit response.
#[derive(Debug, Serialize)]
pub struct AuditResponse {
    /// Whether replay and the balance chain agree with the wallet.
    pub consistent: bool,
    /// Audit detail.
    #[serde(flatten)]
    pub audit: LedgerAudit,
}

/// Replay a tenant's ledger and check it against the wallet balance.
pub async fn audit_ledger(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(tenant_id): Path<String>,
) -> Result<Json<AuditResponse>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;

    let wallet = state
        .store
        .get_wallet(tenant_id)
        .await?
        .ok_or_else(|| ApiError::BillingNotInitialized(tenant_id.to_string()))?;
    let history = state.store.ledger_history(tenant_id).await?;

    let audit = audit(&history, wallet.balance_cents);
    if !audit.is_consistent() {
        tracing::error!(
            tenant_id = %tenant_id,
            replayed = audit.replayed_balance_cents,
            wallet = audit.wallet_balance_cents,
            chain_breaks = audit.chain_breaks.len(),
            "Ledger audit found inconsistencies"
        );
    }

    Ok(Json(AuditResponse {
        consistent: audit.is_consistent(),
        audit,
    }))
}
