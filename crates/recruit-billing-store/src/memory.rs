//! In-memory storage backend.
//!
//! Used for development (no `DATABASE_URL`) and tests. Every operation takes
//! the single state mutex for its whole duration, so each compound operation
//! is one atomic step. Wallet changes are staged on a copy and written back
//! only after every check has passed.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use recruit_billing_core::{
    BalanceChange, BillingStatus, DraftRef, EntryType, Invoice, InvoiceId, InvoiceKind,
    InvoiceStatus, JobId, JobRef, JobUsage, LedgerEntry, LedgerReference, TenantId, TimePeriod,
    UsageEvent, UsageType, WalletAccount, WalletSettings,
};

use crate::{CommittedUsage, CreditCommit, Result, Store, StoreError, UsageCommit};

type JobUsageKey = (TenantId, JobRef, UsageType);

#[derive(Debug, Default)]
struct State {
    wallets: HashMap<TenantId, WalletAccount>,
    usage_events: Vec<UsageEvent>,
    event_keys: HashSet<(TenantId, String)>,
    ledger: Vec<LedgerEntry>,
    job_usage: HashMap<JobUsageKey, JobUsage>,
    invoices: Vec<Invoice>,
}

impl State {
    fn wallet(&self, tenant_id: TenantId) -> Result<&WalletAccount> {
        self.wallets
            .get(&tenant_id)
            .ok_or_else(|| StoreError::wallet_not_found(tenant_id))
    }

    fn invoice_mut(&mut self, tenant_id: TenantId, invoice_id: InvoiceId) -> Result<&mut Invoice> {
        self.invoices
            .iter_mut()
            .find(|i| i.id == invoice_id && i.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::invoice_not_found(invoice_id))
    }

    fn credit(&mut self, credit: CreditCommit) -> Result<LedgerEntry> {
        let mut wallet = self.wallet(credit.tenant_id)?.clone();
        let change = BalanceChange {
            before_cents: wallet.balance_cents,
            after_cents: wallet.balance_cents + credit.amount_cents,
        };
        wallet.balance_cents = change.after_cents;
        wallet.updated_at = Utc::now();

        let entry = LedgerEntry::for_credit(
            credit.tenant_id,
            credit.entry_type,
            change,
            credit.description,
            credit.reference,
        );
        self.wallets.insert(credit.tenant_id, wallet);
        self.ledger.push(entry.clone());
        Ok(entry)
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn health_check(&self) -> Result<()> {
        drop(self.state.lock().await);
        Ok(())
    }

    async fn create_wallet(&self, wallet: &WalletAccount) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.wallets.contains_key(&wallet.tenant_id) {
            return Err(StoreError::AlreadyExists {
                entity: "wallet",
                id: wallet.tenant_id.to_string(),
            });
        }
        state.wallets.insert(wallet.tenant_id, wallet.clone());
        Ok(())
    }

    async fn get_wallet(&self, tenant_id: TenantId) -> Result<Option<WalletAccount>> {
        Ok(self.state.lock().await.wallets.get(&tenant_id).cloned())
    }

    async fn update_settings(
        &self,
        tenant_id: TenantId,
        settings: &WalletSettings,
    ) -> Result<WalletAccount> {
        let mut state = self.state.lock().await;
        let mut wallet = state.wallet(tenant_id)?.clone();
        wallet
            .apply_settings(settings)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        state.wallets.insert(tenant_id, wallet.clone());
        Ok(wallet)
    }

    async fn transition_status(
        &self,
        tenant_id: TenantId,
        from: BillingStatus,
        to: BillingStatus,
    ) -> Result<WalletAccount> {
        let mut state = self.state.lock().await;
        let mut wallet = state.wallet(tenant_id)?.clone();
        if wallet.billing_status != from {
            return Err(StoreError::Conflict(format!(
                "wallet {tenant_id} is {}, expected {from}",
                wallet.billing_status
            )));
        }
        wallet.billing_status = to;
        wallet.updated_at = Utc::now();
        state.wallets.insert(tenant_id, wallet.clone());
        Ok(wallet)
    }

    async fn commit_usage(&self, commit: UsageCommit) -> Result<CommittedUsage> {
        let UsageCommit {
            event,
            trial_mutation,
        } = commit;
        let tenant_id = event.tenant_id;

        let mut state = self.state.lock().await;
        let mut wallet = state.wallet(tenant_id)?.clone();

        if let Some(key) = &event.event_key {
            if state.event_keys.contains(&(tenant_id, key.clone())) {
                return Err(StoreError::DuplicateEvent {
                    event_key: key.clone(),
                });
            }
        }

        wallet
            .apply_trial_mutation(trial_mutation)
            .map_err(|e| StoreError::Conflict(e.to_string()))?;

        let balance = if event.cost_cents > 0 {
            if wallet.balance_cents < event.cost_cents {
                return Err(StoreError::InsufficientFunds {
                    balance: wallet.balance_cents,
                    required: event.cost_cents,
                });
            }
            let change = BalanceChange {
                before_cents: wallet.balance_cents,
                after_cents: wallet.balance_cents - event.cost_cents,
            };
            wallet.balance_cents = change.after_cents;
            change
        } else {
            BalanceChange::unchanged(wallet.balance_cents)
        };
        wallet.updated_at = Utc::now();

        let ledger_entry = LedgerEntry::for_usage(&event, balance);

        state.wallets.insert(tenant_id, wallet);
        if let Some(key) = &event.event_key {
            state.event_keys.insert((tenant_id, key.clone()));
        }
        if let Some(job_ref) = event.job_ref {
            state
                .job_usage
                .entry((tenant_id, job_ref, event.usage_type))
                .and_modify(|usage| usage.add_event(&event))
                .or_insert_with(|| JobUsage::from_event(job_ref, &event));
        }
        state.usage_events.push(event.clone());
        state.ledger.push(ledger_entry.clone());

        debug!(tenant_id = %tenant_id, event_id = %event.id, "usage committed");

        Ok(CommittedUsage {
            event,
            ledger_entry,
            balance,
        })
    }

    async fn commit_credit(&self, credit: CreditCommit) -> Result<LedgerEntry> {
        self.state.lock().await.credit(credit)
    }

    async fn settle_recharge(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment_reference: Option<String>,
    ) -> Result<(Invoice, LedgerEntry)> {
        let mut state = self.state.lock().await;
        state.wallet(tenant_id)?;

        let mut invoice = state.invoice_mut(tenant_id, invoice_id)?.clone();
        if invoice.kind != InvoiceKind::Recharge {
            return Err(StoreError::Conflict(format!(
                "invoice {invoice_id} is not a recharge"
            )));
        }
        invoice.mark_paid(payment_reference)?;

        let entry = state.credit(CreditCommit {
            tenant_id,
            amount_cents: invoice.total_cents,
            entry_type: EntryType::AutoRecharge,
            description: format!("Auto-recharge, invoice {}", invoice.invoice_number),
            reference: Some(LedgerReference::Invoice(invoice.id)),
        })?;
        *state.invoice_mut(tenant_id, invoice_id)? = invoice.clone();
        Ok((invoice, entry))
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        let mut state = self.state.lock().await;
        state.wallet(invoice.tenant_id)?;
        if let Some(existing) = state
            .invoices
            .iter()
            .find(|i| i.id == invoice.id || i.invoice_number == invoice.invoice_number)
        {
            return Err(StoreError::AlreadyExists {
                entity: "invoice",
                id: if existing.id == invoice.id {
                    invoice.id.to_string()
                } else {
                    invoice.invoice_number.clone()
                },
            });
        }
        state.invoices.push(invoice.clone());
        Ok(())
    }

    async fn get_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .find(|i| i.id == invoice_id && i.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_invoices(
        &self,
        tenant_id: TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Invoice>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .rev()
            .filter(|i| i.tenant_id == tenant_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn last_invoice(
        &self,
        tenant_id: TenantId,
        kind: InvoiceKind,
    ) -> Result<Option<Invoice>> {
        let state = self.state.lock().await;
        Ok(state
            .invoices
            .iter()
            .rev()
            .find(|i| i.tenant_id == tenant_id && i.kind == kind)
            .cloned())
    }

    async fn fail_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        reason: &str,
    ) -> Result<Invoice> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(tenant_id, invoice_id)?;
        invoice.mark_failed(reason)?;
        Ok(invoice.clone())
    }

    async fn mark_invoice_paid(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment_reference: Option<String>,
    ) -> Result<Invoice> {
        let mut state = self.state.lock().await;
        let invoice = state.invoice_mut(tenant_id, invoice_id)?;
        if invoice.status != InvoiceStatus::Pending {
            return Err(StoreError::Conflict(format!(
                "invoice {invoice_id} is {}",
                invoice.status
            )));
        }
        invoice.mark_paid(payment_reference)?;
        Ok(invoice.clone())
    }

    async fn sum_usage_cost(
        &self,
        tenant_id: TenantId,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .usage_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .filter(|e| since.map_or(true, |since| e.created_at >= since))
            .map(|e| e.cost_cents)
            .sum())
    }

    async fn list_usage_events(
        &self,
        tenant_id: TenantId,
        period: TimePeriod,
    ) -> Result<Vec<UsageEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .usage_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && period.contains(e.created_at))
            .cloned()
            .collect())
    }

    async fn job_usage(&self, tenant_id: TenantId, job_ref: JobRef) -> Result<Vec<JobUsage>> {
        let state = self.state.lock().await;
        Ok(UsageType::ALL
            .iter()
            .filter_map(|usage_type| {
                state
                    .job_usage
                    .get(&(tenant_id, job_ref, *usage_type))
                    .cloned()
            })
            .collect())
    }

    async fn reconcile_draft(
        &self,
        tenant_id: TenantId,
        draft: DraftRef,
        job_id: JobId,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.wallet(tenant_id)?;

        let from = JobRef::Draft(draft);
        let to = JobRef::Job(job_id);

        let mut moved = 0;
        for event in state
            .usage_events
            .iter_mut()
            .filter(|e| e.tenant_id == tenant_id && e.job_ref == Some(from))
        {
            event.job_ref = Some(to);
            moved += 1;
        }

        for usage_type in UsageType::ALL {
            if let Some(mut draft_usage) = state.job_usage.remove(&(tenant_id, from, usage_type)) {
                draft_usage.job_ref = to;
                state
                    .job_usage
                    .entry((tenant_id, to, usage_type))
                    .and_modify(|usage| usage.merge(&draft_usage))
                    .or_insert(draft_usage);
            }
        }

        Ok(moved)
    }

    async fn list_ledger(
        &self,
        tenant_id: TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .rev()
            .filter(|e| e.tenant_id == tenant_id)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ledger_history(&self, tenant_id: TenantId) -> Result<Vec<LedgerEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .ledger
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}
