//! Wallet onboarding, settings, status transitions and manual credits.
//!
//! Every status change goes through [`WalletManager::transition`], which
//! validates it against the [`BillingStatus`] state machine and applies it
//! as a conditional update on the status that was read.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use recruit_billing_core::{
    BillingError, BillingStatus, EntryType, LedgerEntry, LedgerReference, Result, TenantId,
    WalletAccount, WalletSettings,
};
use recruit_billing_store::{CreditCommit, Store};

/// Onboarding request for a tenant wallet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewWallet {
    /// Auto-recharge flag; the deployment default when absent.
    #[serde(default)]
    pub auto_recharge_enabled: Option<bool>,

    /// Initial monthly cap.
    #[serde(default)]
    pub monthly_spend_cap_cents: Option<i64>,

    /// Payment-provider customer for automatic captures.
    #[serde(default)]
    pub payment_customer_id: Option<String>,
}

/// A manual credit requested by an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualCredit {
    /// Positive amount in cents.
    pub amount_cents: i64,

    /// Shown in the ledger.
    pub reason: String,

    /// External reference (support ticket, contract id).
    #[serde(default)]
    pub reference: Option<String>,
}

/// Owns the lifecycle of tenant wallets.
#[derive(Clone)]
pub struct WalletManager {
    store: Arc<dyn Store>,
    auto_recharge_default: bool,
}

impl WalletManager {
    /// Create a manager.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, auto_recharge_default: bool) -> Self {
        Self {
            store,
            auto_recharge_default,
        }
    }

    /// Create a trial wallet with zero balance.
    ///
    /// # Errors
    ///
    /// Returns `WalletAlreadyExists` if the tenant was already onboarded and
    /// `InvalidAmount` for a negative cap.
    pub async fn create(&self, tenant_id: TenantId, request: NewWallet) -> Result<WalletAccount> {
        let mut wallet = WalletAccount::new(
            tenant_id,
            request
                .auto_recharge_enabled
                .unwrap_or(self.auto_recharge_default),
        );
        wallet.apply_settings(&WalletSettings {
            auto_recharge_enabled: None,
            monthly_spend_cap_cents: request.monthly_spend_cap_cents.map(Some),
            payment_customer_id: request.payment_customer_id,
        })?;

        self.store.create_wallet(&wallet).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            auto_recharge = wallet.auto_recharge_enabled,
            "Wallet created"
        );
        Ok(wallet)
    }

    /// Apply tenant-controlled settings.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` for a negative cap and `BillingNotInitialized`
    /// if the tenant has no wallet.
    pub async fn update_settings(
        &self,
        tenant_id: TenantId,
        settings: &WalletSettings,
    ) -> Result<WalletAccount> {
        settings.validate()?;
        let wallet = self.store.update_settings(tenant_id, settings).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            auto_recharge = wallet.auto_recharge_enabled,
            monthly_spend_cap_cents = ?wallet.monthly_spend_cap_cents,
            "Wallet settings updated"
        );
        Ok(wallet)
    }

    /// Move a wallet to `to`.
    ///
    /// # Errors
    ///
    /// - `InvalidStatusTransition` if the state machine forbids the move
    /// - `Conflict` if the status changed between read and update
    /// - `BillingNotInitialized` if the tenant has no wallet
    pub async fn transition(&self, tenant_id: TenantId, to: BillingStatus) -> Result<WalletAccount> {
        let wallet = self
            .store
            .get_wallet(tenant_id)
            .await?
            .ok_or_else(|| BillingError::BillingNotInitialized {
                tenant_id: tenant_id.to_string(),
            })?;

        let from = wallet.billing_status;
        from.transition_to(to)?;

        let wallet = self.store.transition_status(tenant_id, from, to).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            from = %from,
            to = %to,
            "Billing status changed"
        );
        Ok(wallet)
    }

    /// Credit a wallet outside of any payment flow.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` unless the amount is positive and
    /// `BillingNotInitialized` if the tenant has no wallet.
    pub async fn credit(
        &self,
        tenant_id: TenantId,
        credit: ManualCredit,
        admin_id: &str,
    ) -> Result<LedgerEntry> {
        if credit.amount_cents <= 0 {
            return Err(BillingError::InvalidAmount(format!(
                "credit must be positive: {}",
                credit.amount_cents
            )));
        }

        let entry = self
            .store
            .commit_credit(CreditCommit {
                tenant_id,
                amount_cents: credit.amount_cents,
                entry_type: EntryType::ManualCredit,
                description: credit.reason,
                reference: credit.reference.map(LedgerReference::External),
            })
            .await?;

        tracing::info!(
            tenant_id = %tenant_id,
            admin_id = %admin_id,
            amount_cents = credit.amount_cents,
            balance_after = entry.balance_after_cents,
            "Manual credit applied"
        );
        Ok(entry)
    }
}
