//! Billing status read model.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use recruit_billing_core::{
    BillingError, BillingStatus, Result, TenantId, TrialPhase, WalletAccount,
};
use recruit_billing_store::Store;

use super::SpendCapEnforcer;

/// What dashboards show about a tenant's billing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingStatusView {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Current wallet balance in cents.
    pub wallet_balance_cents: i64,
    /// Current billing status.
    pub billing_status: BillingStatus,
    /// Usage cost since the start of the current month.
    pub current_month_spent_cents: i64,
    /// Usage cost since the wallet was created.
    pub total_spent_cents: i64,
    /// Whether auto-recharge is on.
    pub auto_recharge_enabled: bool,
    /// Monthly cap, if any.
    pub monthly_spend_cap_cents: Option<i64>,
    /// Trial progress.
    pub trial: TrialPhase,
    /// Whether to prompt the tenant to recharge.
    pub needs_recharge_prompt: bool,
    /// Start of the month used for `current_month_spent_cents`.
    pub month_start: DateTime<Utc>,
}

/// Computes [`BillingStatusView`]s from live usage history.
#[derive(Clone)]
pub struct BillingStatusQuery {
    store: Arc<dyn Store>,
    spend_cap: SpendCapEnforcer,
}

impl BillingStatusQuery {
    /// Create a query over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, spend_cap: SpendCapEnforcer) -> Self {
        Self { store, spend_cap }
    }

    /// Read a tenant's billing status. Spend figures are recomputed on
    /// every call.
    ///
    /// # Errors
    ///
    /// Returns `BillingNotInitialized` if the tenant has no wallet.
    pub async fn status(&self, tenant_id: TenantId) -> Result<BillingStatusView> {
        let wallet = self
            .store
            .get_wallet(tenant_id)
            .await?
            .ok_or_else(|| BillingError::BillingNotInitialized {
                tenant_id: tenant_id.to_string(),
            })?;

        let month = self.spend_cap.current_month(Utc::now());
        let current_month_spent_cents = self
            .store
            .sum_usage_cost(tenant_id, Some(month.start))
            .await?;
        let total_spent_cents = self.store.sum_usage_cost(tenant_id, None).await?;

        Ok(view(&wallet, current_month_spent_cents, total_spent_cents, month.start))
    }
}

fn view(
    wallet: &WalletAccount,
    current_month_spent_cents: i64,
    total_spent_cents: i64,
    month_start: DateTime<Utc>,
) -> BillingStatusView {
    BillingStatusView {
        tenant_id: wallet.tenant_id,
        wallet_balance_cents: wallet.balance_cents,
        billing_status: wallet.billing_status,
        current_month_spent_cents,
        total_spent_cents,
        auto_recharge_enabled: wallet.auto_recharge_enabled,
        monthly_spend_cap_cents: wallet.monthly_spend_cap_cents,
        trial: TrialPhase::of(wallet),
        needs_recharge_prompt: wallet.needs_recharge_prompt(),
        month_start,
    }
}
