//! The metering entry point.
//!
//! [`UsageRecorder::record`] turns "a billable thing just happened" into
//! either a fully committed usage event (wallet debited, ledger entry
//! appended, per-job aggregate updated) or an error with nothing written.
//!
//! Steps, in order:
//!
//! 1. Status gate: suspended wallets meter nothing, past-due wallets meter
//!    only trial-free usage.
//! 2. Trial evaluation and pricing.
//! 3. Spend cap check for priced usage, before any debit.
//! 4. One atomic store commit. If it reports insufficient funds and the
//!    wallet has auto-recharge on, one recharge and one retried commit.
//!    A recharge that cannot cover the cost is never captured.
//!
//! A trial-state conflict (another request claimed the trial job or used the
//! free interview first) re-runs the whole evaluation once.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use recruit_billing_core::{
    validate_quantity, BillingError, DraftRef, EntryType, InvoiceId, JobId, JobRef,
    LedgerEntryId, PricingTable, Result, TenantId, TrialDecision, TrialGate, UsageEvent,
    UsageEventId, UsageType, WalletAccount,
};
use recruit_billing_store::{CommittedUsage, Store, StoreError, UsageCommit};

use super::{AutoRecharger, SpendCapEnforcer};

/// A metering request from feature code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRequest {
    /// Tenant to meter.
    pub tenant_id: TenantId,

    /// Job or draft the usage belongs to.
    #[serde(default)]
    pub job_ref: Option<JobRef>,

    /// What was used.
    pub usage_type: UsageType,

    /// Parses, questions, or minutes.
    pub quantity: f64,

    /// Optional idempotency key, unique per tenant.
    #[serde(default)]
    pub event_key: Option<String>,

    /// Free-form context stored with the event.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// What a successful metering call did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReceipt {
    /// The stored event.
    pub event_id: UsageEventId,

    /// The ledger entry written for it.
    pub ledger_entry_id: LedgerEntryId,

    /// Amount charged in cents.
    pub cost_cents: i64,

    /// Ledger entry type.
    pub entry_type: EntryType,

    /// Trial evaluation that priced the request.
    pub trial: TrialDecision,

    /// Wallet balance after the commit.
    pub balance_cents: i64,

    /// Recharge invoice paid to cover this request, if one was needed.
    pub recharge_invoice_id: Option<InvoiceId>,
}

/// Records metered usage against tenant wallets.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn Store>,
    pricing: PricingTable,
    spend_cap: SpendCapEnforcer,
    recharger: AutoRecharger,
}

impl UsageRecorder {
    /// Create a recorder.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        pricing: PricingTable,
        spend_cap: SpendCapEnforcer,
        recharger: AutoRecharger,
    ) -> Self {
        Self {
            store,
            pricing,
            spend_cap,
            recharger,
        }
    }

    /// Meter one usage event.
    ///
    /// # Errors
    ///
    /// - `InvalidQuantity` for non-positive or non-finite quantities, or a
    ///   cost that does not fit in cents
    /// - `BillingNotInitialized` if the tenant has no wallet
    /// - `AccountBlocked` if the billing status forbids this usage
    /// - `MonthlySpendCapExceeded` if the cap rejects the cost
    /// - `InsufficientFunds` if the balance is short and auto-recharge is off
    /// - `AutoRechargeFailed` if the one recharge did not cover the cost
    /// - `DuplicateEvent` if the event key was already recorded
    /// - `Conflict` if the trial state kept moving under the request
    pub async fn record(&self, request: UsageRequest) -> Result<UsageReceipt> {
        validate_quantity(request.quantity)?;

        let mut recharged = None;
        match self.attempt(&request, &mut recharged).await {
            Err(BillingError::Conflict(reason)) => {
                tracing::debug!(
                    tenant_id = %request.tenant_id,
                    reason = %reason,
                    "Trial state moved, re-evaluating usage"
                );
                self.attempt(&request, &mut recharged).await
            }
            result => result,
        }
    }

    /// Meter several events in order; each succeeds or fails on its own.
    pub async fn record_batch(&self, requests: Vec<UsageRequest>) -> Vec<Result<UsageReceipt>> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(self.record(request).await);
        }
        results
    }

    /// Re-point a draft's usage at the saved job.
    ///
    /// Returns the number of usage events moved.
    ///
    /// # Errors
    ///
    /// Returns `BillingNotInitialized` if the tenant has no wallet.
    pub async fn reconcile_draft(
        &self,
        tenant_id: TenantId,
        draft: DraftRef,
        job_id: JobId,
    ) -> Result<u64> {
        let moved = self.store.reconcile_draft(tenant_id, draft, job_id).await?;
        tracing::info!(
            tenant_id = %tenant_id,
            draft = %draft,
            job_id = %job_id,
            events = moved,
            "Draft usage reconciled"
        );
        Ok(moved)
    }

    async fn attempt(
        &self,
        request: &UsageRequest,
        recharged: &mut Option<InvoiceId>,
    ) -> Result<UsageReceipt> {
        let wallet = self
            .store
            .get_wallet(request.tenant_id)
            .await?
            .ok_or_else(|| BillingError::BillingNotInitialized {
                tenant_id: request.tenant_id.to_string(),
            })?;

        if !wallet.billing_status.allows_metering() {
            return Err(blocked(&wallet));
        }

        let decision = TrialGate::evaluate(&wallet, request.job_ref, request.usage_type);
        let priced_cents = self.pricing.cost_cents(request.usage_type, request.quantity)?;
        let cost_cents = if decision.is_free_usage {
            0
        } else {
            priced_cents
        };

        tracing::debug!(
            tenant_id = %request.tenant_id,
            usage_type = %request.usage_type,
            quantity = request.quantity,
            free = decision.is_free_usage,
            reason = ?decision.reason,
            cost_cents,
            "Evaluated usage"
        );

        if !decision.is_free_usage {
            if !wallet.billing_status.allows_priced_usage() {
                return Err(blocked(&wallet));
            }
            self.spend_cap.check(&wallet, cost_cents).await?;
        }

        let commit = UsageCommit {
            event: UsageEvent {
                id: UsageEventId::generate(),
                event_key: request.event_key.clone(),
                tenant_id: request.tenant_id,
                job_ref: request.job_ref,
                usage_type: request.usage_type,
                quantity: request.quantity,
                unit_price_cents: self.pricing.unit_price(request.usage_type),
                cost_cents,
                trial_free: decision.is_free_usage,
                metadata: request.metadata.clone(),
                created_at: Utc::now(),
            },
            trial_mutation: decision.mutation,
        };

        let committed = match self.store.commit_usage(commit.clone()).await {
            Err(StoreError::InsufficientFunds { balance, required })
                if wallet.auto_recharge_enabled && recharged.is_none() =>
            {
                let recharge_cents = self.pricing.standard_recharge_amount();
                if balance.saturating_add(recharge_cents) < required {
                    tracing::warn!(
                        tenant_id = %request.tenant_id,
                        balance_cents = balance,
                        required_cents = required,
                        recharge_cents,
                        "Auto-recharge cannot cover cost, not capturing"
                    );
                    return Err(BillingError::AutoRechargeFailed {
                        reason: format!(
                            "recharge of {recharge_cents} cannot cover {required} with balance {balance}"
                        ),
                    });
                }
                tracing::info!(
                    tenant_id = %request.tenant_id,
                    balance_cents = balance,
                    required_cents = required,
                    "Insufficient funds, attempting auto-recharge"
                );
                let invoice = self.recharger.recharge(request.tenant_id).await?;
                *recharged = Some(invoice.id);
                self.retry_after_recharge(commit).await?
            }
            Err(StoreError::InsufficientFunds { balance, required }) if recharged.is_some() => {
                return Err(still_short(balance, required));
            }
            other => other.map_err(|e| commit_failed(request, e))?,
        };

        Ok(receipt(committed, decision, *recharged))
    }

    async fn retry_after_recharge(&self, commit: UsageCommit) -> Result<CommittedUsage> {
        let tenant_id = commit.event.tenant_id;
        match self.store.commit_usage(commit).await {
            Ok(committed) => Ok(committed),
            Err(StoreError::InsufficientFunds { balance, required }) => {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    balance_cents = balance,
                    required_cents = required,
                    "Debit still failing after auto-recharge"
                );
                Err(still_short(balance, required))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn blocked(wallet: &WalletAccount) -> BillingError {
    tracing::warn!(
        tenant_id = %wallet.tenant_id,
        status = %wallet.billing_status,
        "Usage rejected by billing status"
    );
    BillingError::AccountBlocked {
        status: wallet.billing_status,
    }
}

fn still_short(balance: i64, required: i64) -> BillingError {
    BillingError::AutoRechargeFailed {
        reason: format!("balance {balance} still below {required} after recharge"),
    }
}

fn commit_failed(request: &UsageRequest, err: StoreError) -> BillingError {
    match &err {
        StoreError::Database(_) | StoreError::Serialization(_) => tracing::error!(
            tenant_id = %request.tenant_id,
            usage_type = %request.usage_type,
            error = %err,
            "Usage commit failed in storage"
        ),
        _ => tracing::debug!(
            tenant_id = %request.tenant_id,
            error = %err,
            "Usage commit rejected"
        ),
    }
    err.into()
}

fn receipt(
    committed: CommittedUsage,
    trial: TrialDecision,
    recharge_invoice_id: Option<InvoiceId>,
) -> UsageReceipt {
    tracing::info!(
        tenant_id = %committed.event.tenant_id,
        event_id = %committed.event.id,
        usage_type = %committed.event.usage_type,
        cost_cents = committed.event.cost_cents,
        balance_after = committed.balance.after_cents,
        "Usage recorded"
    );

    UsageReceipt {
        event_id: committed.event.id,
        ledger_entry_id: committed.ledger_entry.id,
        cost_cents: committed.event.cost_cents,
        entry_type: committed.ledger_entry.entry_type,
        trial,
        balance_cents: committed.balance.after_cents,
        recharge_invoice_id,
    }
}
