//! Monthly spend caps.
//!
//! Month-to-date spend is never cached: it is summed from the tenant's usage
//! events inside the current calendar month of the billing timezone every
//! time it is needed.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use recruit_billing_core::{month_window, BillingError, Result, TenantId, TimePeriod, WalletAccount};
use recruit_billing_store::Store;

/// Checks priced usage against the wallet's monthly cap.
#[derive(Clone)]
pub struct SpendCapEnforcer {
    store: Arc<dyn Store>,
    offset: FixedOffset,
}

impl SpendCapEnforcer {
    /// Create an enforcer whose month boundaries fall at midnight in `offset`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, offset: FixedOffset) -> Self {
        Self { store, offset }
    }

    /// The calendar month containing `now`.
    #[must_use]
    pub fn current_month(&self, now: DateTime<Utc>) -> TimePeriod {
        month_window(now, self.offset)
    }

    /// Sum of usage costs since the start of the current month.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sum cannot be read.
    pub async fn current_month_spent(&self, tenant_id: TenantId) -> Result<i64> {
        let month = self.current_month(Utc::now());
        Ok(self
            .store
            .sum_usage_cost(tenant_id, Some(month.start))
            .await?)
    }

    /// Whether `cost` fits under the wallet's cap. A missing cap never rejects.
    ///
    /// # Errors
    ///
    /// Returns a storage error if month-to-date spend cannot be read.
    pub async fn allows(&self, wallet: &WalletAccount, cost_cents: i64) -> Result<bool> {
        match self.check(wallet, cost_cents).await {
            Ok(()) => Ok(true),
            Err(BillingError::MonthlySpendCapExceeded { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Reject `cost` if it would take month-to-date spend past the cap.
    ///
    /// Reaching the cap exactly is allowed.
    ///
    /// # Errors
    ///
    /// Returns `MonthlySpendCapExceeded` when rejected, or a storage error.
    pub async fn check(&self, wallet: &WalletAccount, cost_cents: i64) -> Result<()> {
        let Some(cap) = wallet.monthly_spend_cap_cents else {
            return Ok(());
        };

        let spent = self.current_month_spent(wallet.tenant_id).await?;
        tracing::debug!(
            tenant_id = %wallet.tenant_id,
            cap_cents = cap,
            spent_cents = spent,
            cost_cents,
            "Checking monthly spend cap"
        );

        if spent.saturating_add(cost_cents) > cap {
            tracing::warn!(
                tenant_id = %wallet.tenant_id,
                cap_cents = cap,
                spent_cents = spent,
                cost_cents,
                "Monthly spend cap exceeded"
            );
            return Err(BillingError::MonthlySpendCapExceeded {
                cap,
                spent,
                cost: cost_cents,
            });
        }

        Ok(())
    }
}
