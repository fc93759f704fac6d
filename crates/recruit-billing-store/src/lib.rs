//! Storage layer for recruit-billing.
//!
//! This crate provides persistence for wallets, usage events, the ledger
//! journal, per-job usage aggregates, and invoices.
//!
//! # Atomicity
//!
//! Balance-affecting writes are exposed only as compound operations
//! ([`Store::commit_usage`], [`Store::commit_credit`],
//! [`Store::settle_recharge`]). Each one is a single storage transaction
//! that changes the balance, appends exactly one ledger entry taking its
//! before/after snapshot from that change, and updates any dependent rows.
//! There is no way to write a balance without journaling it.
//!
//! Debits are conditional ("subtract iff balance >= amount"); the failed
//! condition is reported as [`StoreError::InsufficientFunds`], not detected
//! by an earlier read.
//!
//! # Backends
//!
//! - [`MemoryStore`]: every compound operation runs under one async mutex.
//! - [`PgStore`]: PostgreSQL via `sqlx`, one transaction per compound
//!   operation, wallet row locked by the first conditional update.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recruit_billing_core::{
    BalanceChange, BillingStatus, DraftRef, EntryType, Invoice, InvoiceId, InvoiceKind, JobId,
    JobRef, JobUsage, LedgerEntry, LedgerReference, TenantId, TimePeriod, TrialMutation,
    UsageEvent, WalletAccount, WalletSettings,
};

/// A usage event ready to be committed.
#[derive(Debug, Clone)]
pub struct UsageCommit {
    /// The event, with cost already decided.
    pub event: UsageEvent,

    /// Trial-state change decided by the trial gate.
    pub trial_mutation: TrialMutation,
}

/// Result of a committed usage event.
#[derive(Debug, Clone)]
pub struct CommittedUsage {
    /// The stored event.
    pub event: UsageEvent,

    /// The journal entry written for it.
    pub ledger_entry: LedgerEntry,

    /// Balance snapshot from the debit (unchanged for zero-cost events).
    pub balance: BalanceChange,
}

/// A credit ready to be committed.
#[derive(Debug, Clone)]
pub struct CreditCommit {
    /// Tenant to credit.
    pub tenant_id: TenantId,

    /// Positive amount in cents.
    pub amount_cents: i64,

    /// Ledger entry type (manual credit, recharge).
    pub entry_type: EntryType,

    /// Ledger description.
    pub description: String,

    /// Originating reference.
    pub reference: Option<LedgerReference>,
}

/// The storage trait defining all database operations.
///
/// This trait abstracts the storage layer, allowing for different
/// implementations (PostgreSQL, in-memory for development and testing).
#[async_trait]
pub trait Store: Send + Sync {
    /// Check that the backend answers.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be reached.
    async fn health_check(&self) -> Result<()>;

    // =========================================================================
    // Wallet Operations
    // =========================================================================

    /// Insert a new wallet.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::AlreadyExists` if the tenant already has one.
    async fn create_wallet(&self, wallet: &WalletAccount) -> Result<()>;

    /// Get a wallet by tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_wallet(&self, tenant_id: TenantId) -> Result<Option<WalletAccount>>;

    /// Apply tenant-controlled settings.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the wallet doesn't exist.
    async fn update_settings(
        &self,
        tenant_id: TenantId,
        settings: &WalletSettings,
    ) -> Result<WalletAccount>;

    /// Move the wallet from `from` to `to`, only if it is currently in `from`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the status changed concurrently and
    /// `StoreError::NotFound` if the wallet doesn't exist.
    async fn transition_status(
        &self,
        tenant_id: TenantId,
        from: BillingStatus,
        to: BillingStatus,
    ) -> Result<WalletAccount>;

    // =========================================================================
    // Compound Operations
    // =========================================================================

    /// Record a usage event atomically.
    ///
    /// In one transaction: reject a repeated `event_key`, apply the trial
    /// mutation conditionally, debit the cost conditionally (or snapshot the
    /// balance for zero-cost events), store the event, append its ledger
    /// entry and upsert the per-job aggregate. Nothing is written on error.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the wallet doesn't exist
    /// - `StoreError::DuplicateEvent` if the event key was already used
    /// - `StoreError::Conflict` if the trial state moved since evaluation
    /// - `StoreError::InsufficientFunds` if the balance cannot cover the cost
    async fn commit_usage(&self, commit: UsageCommit) -> Result<CommittedUsage>;

    /// Credit a wallet and journal the credit atomically.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the wallet doesn't exist.
    async fn commit_credit(&self, credit: CreditCommit) -> Result<LedgerEntry>;

    /// Mark a pending recharge invoice paid and credit its total, atomically.
    ///
    /// # Errors
    ///
    /// - `StoreError::NotFound` if the invoice or wallet doesn't exist
    /// - `StoreError::Conflict` if the invoice is not pending
    async fn settle_recharge(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment_reference: Option<String>,
    ) -> Result<(Invoice, LedgerEntry)>;

    // =========================================================================
    // Invoice Operations
    // =========================================================================

    /// Insert a new invoice.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the wallet doesn't exist.
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()>;

    /// Get an invoice.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn get_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>>;

    /// List invoices for a tenant, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_invoices(
        &self,
        tenant_id: TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Invoice>>;

    /// The most recent invoice of a kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn last_invoice(&self, tenant_id: TenantId, kind: InvoiceKind)
        -> Result<Option<Invoice>>;

    /// Transition a pending invoice to failed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the invoice is not pending.
    async fn fail_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        reason: &str,
    ) -> Result<Invoice>;

    /// Transition a pending invoice to paid without touching the wallet.
    ///
    /// Used to settle usage statements, whose usage was already debited.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Conflict` if the invoice is not pending.
    async fn mark_invoice_paid(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment_reference: Option<String>,
    ) -> Result<Invoice>;

    // =========================================================================
    // Usage Reads
    // =========================================================================

    /// Sum of usage costs for a tenant, optionally since an instant.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn sum_usage_cost(
        &self,
        tenant_id: TenantId,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64>;

    /// Usage events for a tenant inside a period, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_usage_events(
        &self,
        tenant_id: TenantId,
        period: TimePeriod,
    ) -> Result<Vec<UsageEvent>>;

    /// Per-usage-type aggregates for a job or draft.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn job_usage(&self, tenant_id: TenantId, job_ref: JobRef) -> Result<Vec<JobUsage>>;

    /// Re-point every usage event and aggregate of a draft to a saved job.
    ///
    /// Returns the number of usage events moved. Ledger entries are
    /// append-only and keep the reference they were written with.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the wallet doesn't exist.
    async fn reconcile_draft(
        &self,
        tenant_id: TenantId,
        draft: DraftRef,
        job_id: JobId,
    ) -> Result<u64>;

    // =========================================================================
    // Ledger Reads
    // =========================================================================

    /// List ledger entries for a tenant, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_ledger(
        &self,
        tenant_id: TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>>;

    /// Every ledger entry for a tenant, in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn ledger_history(&self, tenant_id: TenantId) -> Result<Vec<LedgerEntry>>;
}
