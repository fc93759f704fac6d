//! Wallet onboarding, status and administration handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use recruit_billing_core::money::format_cents;
use recruit_billing_core::{BillingStatus, LedgerEntry, TenantId, WalletAccount, WalletSettings};

use super::parse_tenant;
use crate::auth::{AdminAuth, ServiceAuth};
use crate::error::ApiError;
use crate::metering::{BillingStatusView, ManualCredit, NewWallet};
use crate::state::AppState;

/// Wallet response.
#[derive(Debug, Serialize)]
pub struct WalletResponse {
    /// The wallet.
    #[serde(flatten)]
    pub wallet: WalletAccount,
    /// Balance formatted as dollars.
    pub balance_formatted: String,
}

impl From<WalletAccount> for WalletResponse {
    fn from(wallet: WalletAccount) -> Self {
        Self {
            balance_formatted: format_cents(wallet.balance_cents),
            wallet,
        }
    }
}

/// Create wallet request.
#[derive(Debug, Deserialize)]
pub struct CreateWalletRequest {
    /// Tenant to onboard.
    pub tenant_id: TenantId,
    /// Optional initial settings.
    #[serde(flatten)]
    pub wallet: NewWallet,
}

/// Onboard a tenant with a trial wallet.
pub async fn create_wallet(
    State(state): State<Arc<AppState>>,
    auth: ServiceAuth,
    Json(body): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Json<WalletResponse>), ApiError> {
    tracing::debug!(
        service = %auth.service_name,
        tenant_id = %body.tenant_id,
        "Creating wallet"
    );

    let wallet = state
        .engine
        .wallets
        .create(body.tenant_id, body.wallet)
        .await?;

    Ok((StatusCode::CREATED, Json(wallet.into())))
}

/// Read the billing status of a tenant.
pub async fn get_billing_status(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(tenant_id): Path<String>,
) -> Result<Json<BillingStatusView>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let view = state.engine.status.status(tenant_id).await?;
    Ok(Json(view))
}

/// Update auto-recharge, spend cap or payment customer.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(tenant_id): Path<String>,
    Json(body): Json<WalletSettings>,
) -> Result<Json<WalletResponse>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let wallet = state
        .engine
        .wallets
        .update_settings(tenant_id, &body)
        .await?;
    Ok(Json(wallet.into()))
}

/// Status transition request.
#[derive(Debug, Deserialize)]
pub struct TransitionRequest {
    /// Target status.
    pub status: BillingStatus,
}

/// Move a wallet to another billing status (admin only).
pub async fn transition_status(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(tenant_id): Path<String>,
    Json(body): Json<TransitionRequest>,
) -> Result<Json<WalletResponse>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;

    tracing::info!(
        admin_id = %auth.admin_id,
        tenant_id = %tenant_id,
        to = %body.status,
        "Admin status change requested"
    );

    let wallet = state
        .engine
        .wallets
        .transition(tenant_id, body.status)
        .await?;
    Ok(Json(wallet.into()))
}

/// Manual credit response.
#[derive(Debug, Serialize)]
pub struct CreditResponse {
    /// The ledger entry written.
    pub entry: LedgerEntry,
    /// New balance formatted as dollars.
    pub balance_formatted: String,
}

/// Credit a wallet outside of any payment flow (admin only).
pub async fn credit_wallet(
    State(state): State<Arc<AppState>>,
    auth: AdminAuth,
    Path(tenant_id): Path<String>,
    Json(body): Json<ManualCredit>,
) -> Result<Json<CreditResponse>, ApiError> {
    let tenant_id = parse_tenant(&tenant_id)?;
    let entry = state
        .engine
        .wallets
        .credit(tenant_id, body, &auth.admin_id)
        .await?;

    Ok(Json(CreditResponse {
        balance_formatted: format_cents(entry.balance_after_cents),
        entry,
    }))
}
