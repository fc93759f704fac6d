//! PostgreSQL storage backend.
//!
//! Each compound operation runs in one transaction. The first statement of
//! every balance-affecting transaction is a conditional `UPDATE` (or a
//! `SELECT ... FOR UPDATE` for zero-cost events) on the wallet row, which
//! serializes concurrent writers for the same tenant and makes ledger `seq`
//! order match the balance timeline.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgConnection, Row};
use tracing::{debug, info};
use uuid::Uuid;

use recruit_billing_core::{
    BalanceChange, BillingStatus, DraftRef, EntryType, Invoice, InvoiceId, InvoiceKind, JobId,
    JobRef, JobUsage, LedgerEntry, LedgerReference, LineItem, TenantId, TimePeriod, TrialMutation,
    UsageEvent, WalletAccount, WalletSettings,
};

use crate::{CommittedUsage, CreditCommit, Result, Store, StoreError, UsageCommit};

macro_rules! wallet_query {
    ($head:literal, $tail:literal) => {
        concat!(
            $head,
            " tenant_id, balance_cents, billing_status, auto_recharge_enabled, \
             monthly_spend_cap_cents, trial_job_id, trial_interview_count, \
             payment_customer_id, created_at, updated_at ",
            $tail
        )
    };
}

macro_rules! invoice_query {
    ($head:literal, $tail:literal) => {
        concat!(
            $head,
            " id, invoice_number, tenant_id, kind, status, subtotal_cents, tax_rate, \
             tax_amount_cents, total_cents, line_items, period_start, period_end, \
             payment_reference, failure_reason, created_at, paid_at ",
            $tail
        )
    };
}

macro_rules! ledger_query {
    ($tail:literal) => {
        concat!(
            "SELECT id, tenant_id, job_ref, entry_type, description, quantity, \
             unit_price_cents, amount_cents, balance_before_cents, balance_after_cents, \
             reference_kind, reference_id, metadata, created_at FROM ledger_entries ",
            $tail
        )
    };
}

/// PostgreSQL-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to PostgreSQL.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the pool cannot be created.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!(max_connections, "connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        info!("database migrations applied");
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// =============================================================================
// Row mapping
// =============================================================================

fn parse<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e: T::Err| StoreError::Serialization(e.to_string()))
}

fn wallet_from_row(row: &PgRow) -> Result<WalletAccount> {
    let status: String = row.try_get("billing_status")?;
    let interviews: i32 = row.try_get("trial_interview_count")?;
    Ok(WalletAccount {
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        balance_cents: row.try_get("balance_cents")?,
        billing_status: parse(&status)?,
        auto_recharge_enabled: row.try_get("auto_recharge_enabled")?,
        monthly_spend_cap_cents: row.try_get("monthly_spend_cap_cents")?,
        trial_job_id: row
            .try_get::<Option<Uuid>, _>("trial_job_id")?
            .map(JobId::from_uuid),
        trial_interview_count: u32::try_from(interviews)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        payment_customer_id: row.try_get("payment_customer_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn job_ref_from(value: Option<String>) -> Result<Option<JobRef>> {
    value.as_deref().map(parse).transpose()
}

fn usage_event_from_row(row: &PgRow) -> Result<UsageEvent> {
    let id: String = row.try_get("id")?;
    let usage_type: String = row.try_get("usage_type")?;
    Ok(UsageEvent {
        id: parse(&id)?,
        event_key: row.try_get("event_key")?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        job_ref: job_ref_from(row.try_get("job_ref")?)?,
        usage_type: parse(&usage_type)?,
        quantity: row.try_get("quantity")?,
        unit_price_cents: row.try_get("unit_price_cents")?,
        cost_cents: row.try_get("cost_cents")?,
        trial_free: row.try_get("trial_free")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn ledger_entry_from_row(row: &PgRow) -> Result<LedgerEntry> {
    let id: String = row.try_get("id")?;
    let entry_type: String = row.try_get("entry_type")?;
    let reference_kind: Option<String> = row.try_get("reference_kind")?;
    let reference_id: Option<String> = row.try_get("reference_id")?;
    let reference = match (reference_kind, reference_id) {
        (Some(kind), Some(value)) => Some(LedgerReference::from_parts(&kind, &value)?),
        _ => None,
    };
    Ok(LedgerEntry {
        id: parse(&id)?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        job_ref: job_ref_from(row.try_get("job_ref")?)?,
        entry_type: parse(&entry_type)?,
        description: row.try_get("description")?,
        quantity: row.try_get("quantity")?,
        unit_price_cents: row.try_get("unit_price_cents")?,
        amount_cents: row.try_get("amount_cents")?,
        balance_before_cents: row.try_get("balance_before_cents")?,
        balance_after_cents: row.try_get("balance_after_cents")?,
        reference,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
    })
}

fn invoice_from_row(row: &PgRow) -> Result<Invoice> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let status: String = row.try_get("status")?;
    let Json(line_items): Json<Vec<LineItem>> = row.try_get("line_items")?;
    Ok(Invoice {
        id: parse(&id)?,
        invoice_number: row.try_get("invoice_number")?,
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id")?),
        kind: parse(&kind)?,
        status: parse(&status)?,
        subtotal_cents: row.try_get("subtotal_cents")?,
        tax_rate: row.try_get("tax_rate")?,
        tax_amount_cents: row.try_get("tax_amount_cents")?,
        total_cents: row.try_get("total_cents")?,
        line_items,
        time_period: TimePeriod {
            start: row.try_get("period_start")?,
            end: row.try_get("period_end")?,
        },
        payment_reference: row.try_get("payment_reference")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        paid_at: row.try_get("paid_at")?,
    })
}

fn job_usage_from_row(row: &PgRow) -> Result<JobUsage> {
    let job_ref: String = row.try_get("job_ref")?;
    let usage_type: String = row.try_get("usage_type")?;
    let event_count: i64 = row.try_get("event_count")?;
    Ok(JobUsage {
        job_ref: parse(&job_ref)?,
        usage_type: parse(&usage_type)?,
        event_count: u64::try_from(event_count)
            .map_err(|e| StoreError::Serialization(e.to_string()))?,
        quantity: row.try_get("quantity")?,
        cost_cents: row.try_get("cost_cents")?,
    })
}

fn page(limit: usize, offset: usize) -> (i64, i64) {
    (
        i64::try_from(limit).unwrap_or(i64::MAX),
        i64::try_from(offset).unwrap_or(i64::MAX),
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

// =============================================================================
// Statements shared by compound operations
// =============================================================================

async fn current_balance(conn: &mut PgConnection, tenant_id: TenantId) -> Result<Option<i64>> {
    Ok(
        sqlx::query_scalar("SELECT balance_cents FROM wallet_accounts WHERE tenant_id = $1")
            .bind(tenant_id.as_uuid())
            .fetch_optional(conn)
            .await?,
    )
}

async fn wallet_exists(conn: &mut PgConnection, tenant_id: TenantId) -> Result<bool> {
    Ok(current_balance(conn, tenant_id).await?.is_some())
}

async fn apply_trial_mutation(
    conn: &mut PgConnection,
    tenant_id: TenantId,
    mutation: TrialMutation,
) -> Result<()> {
    let result = match mutation {
        TrialMutation::None => return Ok(()),
        TrialMutation::ClaimJob {
            job_id,
            count_interview,
        } => {
            sqlx::query(
                "UPDATE wallet_accounts \
                 SET trial_job_id = $2, \
                     trial_interview_count = trial_interview_count + $3, \
                     updated_at = now() \
                 WHERE tenant_id = $1 AND billing_status = 'trial' AND trial_job_id IS NULL",
            )
            .bind(tenant_id.as_uuid())
            .bind(job_id.as_uuid())
            .bind(i32::from(count_interview))
            .execute(&mut *conn)
            .await?
        }
        TrialMutation::CountInterview { job_id, expected } => {
            let expected = i32::try_from(expected)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            sqlx::query(
                "UPDATE wallet_accounts \
                 SET trial_interview_count = trial_interview_count + 1, updated_at = now() \
                 WHERE tenant_id = $1 AND billing_status = 'trial' \
                   AND trial_job_id = $2 AND trial_interview_count = $3",
            )
            .bind(tenant_id.as_uuid())
            .bind(job_id.as_uuid())
            .bind(expected)
            .execute(&mut *conn)
            .await?
        }
    };

    if result.rows_affected() == 1 {
        return Ok(());
    }
    if wallet_exists(conn, tenant_id).await? {
        Err(StoreError::Conflict(format!(
            "trial state moved for tenant {tenant_id}"
        )))
    } else {
        Err(StoreError::wallet_not_found(tenant_id))
    }
}

async fn debit(conn: &mut PgConnection, tenant_id: TenantId, amount: i64) -> Result<BalanceChange> {
    let after: Option<i64> = sqlx::query_scalar(
        "UPDATE wallet_accounts \
         SET balance_cents = balance_cents - $2, updated_at = now() \
         WHERE tenant_id = $1 AND balance_cents >= $2 \
         RETURNING balance_cents",
    )
    .bind(tenant_id.as_uuid())
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;

    match after {
        Some(after) => Ok(BalanceChange {
            before_cents: after + amount,
            after_cents: after,
        }),
        None => match current_balance(conn, tenant_id).await? {
            Some(balance) => Err(StoreError::InsufficientFunds {
                balance,
                required: amount,
            }),
            None => Err(StoreError::wallet_not_found(tenant_id)),
        },
    }
}

async fn lock_balance(conn: &mut PgConnection, tenant_id: TenantId) -> Result<BalanceChange> {
    let balance: Option<i64> = sqlx::query_scalar(
        "SELECT balance_cents FROM wallet_accounts WHERE tenant_id = $1 FOR UPDATE",
    )
    .bind(tenant_id.as_uuid())
    .fetch_optional(conn)
    .await?;
    balance
        .map(BalanceChange::unchanged)
        .ok_or_else(|| StoreError::wallet_not_found(tenant_id))
}

async fn insert_ledger_entry(conn: &mut PgConnection, entry: &LedgerEntry) -> Result<()> {
    sqlx::query(
        "INSERT INTO ledger_entries (id, tenant_id, job_ref, entry_type, description, quantity, \
         unit_price_cents, amount_cents, balance_before_cents, balance_after_cents, \
         reference_kind, reference_id, metadata, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(entry.id.to_string())
    .bind(entry.tenant_id.as_uuid())
    .bind(entry.job_ref.map(|r| r.to_string()))
    .bind(entry.entry_type.as_str())
    .bind(&entry.description)
    .bind(entry.quantity)
    .bind(entry.unit_price_cents)
    .bind(entry.amount_cents)
    .bind(entry.balance_before_cents)
    .bind(entry.balance_after_cents)
    .bind(entry.reference.as_ref().map(LedgerReference::kind))
    .bind(entry.reference.as_ref().map(LedgerReference::value))
    .bind(&entry.metadata)
    .bind(entry.created_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn credit(conn: &mut PgConnection, credit: CreditCommit) -> Result<LedgerEntry> {
    let after: Option<i64> = sqlx::query_scalar(
        "UPDATE wallet_accounts \
         SET balance_cents = balance_cents + $2, updated_at = now() \
         WHERE tenant_id = $1 \
         RETURNING balance_cents",
    )
    .bind(credit.tenant_id.as_uuid())
    .bind(credit.amount_cents)
    .fetch_optional(&mut *conn)
    .await?;
    let after = after.ok_or_else(|| StoreError::wallet_not_found(credit.tenant_id))?;

    let entry = LedgerEntry::for_credit(
        credit.tenant_id,
        credit.entry_type,
        BalanceChange {
            before_cents: after - credit.amount_cents,
            after_cents: after,
        },
        credit.description,
        credit.reference,
    );
    insert_ledger_entry(conn, &entry).await?;
    Ok(entry)
}

/// Resolve a failed conditional invoice update into `NotFound` or `Conflict`.
async fn invoice_update_failed(
    conn: &mut PgConnection,
    tenant_id: TenantId,
    invoice_id: InvoiceId,
) -> StoreError {
    let status: std::result::Result<Option<String>, sqlx::Error> =
        sqlx::query_scalar("SELECT status FROM invoices WHERE id = $1 AND tenant_id = $2")
            .bind(invoice_id.to_string())
            .bind(tenant_id.as_uuid())
            .fetch_optional(conn)
            .await;
    match status {
        Ok(Some(status)) => {
            StoreError::Conflict(format!("invoice {invoice_id} cannot be updated from {status}"))
        }
        Ok(None) => StoreError::invoice_not_found(invoice_id),
        Err(e) => e.into(),
    }
}

#[async_trait]
impl Store for PgStore {
    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_wallet(&self, wallet: &WalletAccount) -> Result<()> {
        let interviews = i32::try_from(wallet.trial_interview_count)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let result = sqlx::query(wallet_query!(
            "INSERT INTO wallet_accounts (",
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(wallet.tenant_id.as_uuid())
        .bind(wallet.balance_cents)
        .bind(wallet.billing_status.as_str())
        .bind(wallet.auto_recharge_enabled)
        .bind(wallet.monthly_spend_cap_cents)
        .bind(wallet.trial_job_id.map(|j| *j.as_uuid()))
        .bind(interviews)
        .bind(&wallet.payment_customer_id)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists {
                entity: "wallet",
                id: wallet.tenant_id.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_wallet(&self, tenant_id: TenantId) -> Result<Option<WalletAccount>> {
        sqlx::query(wallet_query!(
            "SELECT",
            "FROM wallet_accounts WHERE tenant_id = $1"
        ))
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(wallet_from_row)
        .transpose()
    }

    async fn update_settings(
        &self,
        tenant_id: TenantId,
        settings: &WalletSettings,
    ) -> Result<WalletAccount> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(wallet_query!(
            "SELECT",
            "FROM wallet_accounts WHERE tenant_id = $1 FOR UPDATE"
        ))
        .bind(tenant_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::wallet_not_found(tenant_id))?;

        let mut wallet = wallet_from_row(&row)?;
        wallet
            .apply_settings(settings)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            "UPDATE wallet_accounts \
             SET auto_recharge_enabled = $2, monthly_spend_cap_cents = $3, \
                 payment_customer_id = $4, updated_at = $5 \
             WHERE tenant_id = $1",
        )
        .bind(tenant_id.as_uuid())
        .bind(wallet.auto_recharge_enabled)
        .bind(wallet.monthly_spend_cap_cents)
        .bind(&wallet.payment_customer_id)
        .bind(wallet.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(wallet)
    }

    async fn transition_status(
        &self,
        tenant_id: TenantId,
        from: BillingStatus,
        to: BillingStatus,
    ) -> Result<WalletAccount> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(wallet_query!(
            "UPDATE wallet_accounts SET billing_status = $3, updated_at = now() \
             WHERE tenant_id = $1 AND billing_status = $2 RETURNING",
            ""
        ))
        .bind(tenant_id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => wallet_from_row(&row),
            None if wallet_exists(&mut conn, tenant_id).await? => Err(StoreError::Conflict(
                format!("wallet {tenant_id} is no longer {from}"),
            )),
            None => Err(StoreError::wallet_not_found(tenant_id)),
        }
    }

    async fn commit_usage(&self, commit: UsageCommit) -> Result<CommittedUsage> {
        let UsageCommit {
            event,
            trial_mutation,
        } = commit;
        let tenant_id = event.tenant_id;

        let mut tx = self.pool.begin().await?;

        apply_trial_mutation(&mut tx, tenant_id, trial_mutation).await?;

        let balance = if event.cost_cents > 0 {
            debit(&mut tx, tenant_id, event.cost_cents).await?
        } else {
            lock_balance(&mut tx, tenant_id).await?
        };

        let inserted = sqlx::query(
            "INSERT INTO usage_events (id, event_key, tenant_id, job_ref, usage_type, quantity, \
             unit_price_cents, cost_cents, trial_free, metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(event.id.to_string())
        .bind(&event.event_key)
        .bind(tenant_id.as_uuid())
        .bind(event.job_ref.map(|r| r.to_string()))
        .bind(event.usage_type.as_str())
        .bind(event.quantity)
        .bind(event.unit_price_cents)
        .bind(event.cost_cents)
        .bind(event.trial_free)
        .bind(&event.metadata)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::DuplicateEvent {
                    event_key: event.event_key.clone().unwrap_or_default(),
                });
            }
            Err(e) => return Err(e.into()),
        }

        let ledger_entry = LedgerEntry::for_usage(&event, balance);
        insert_ledger_entry(&mut tx, &ledger_entry).await?;

        if let Some(job_ref) = event.job_ref {
            sqlx::query(
                "INSERT INTO job_usage (tenant_id, job_ref, usage_type, event_count, quantity, cost_cents) \
                 VALUES ($1, $2, $3, 1, $4, $5) \
                 ON CONFLICT (tenant_id, job_ref, usage_type) DO UPDATE SET \
                     event_count = job_usage.event_count + 1, \
                     quantity = job_usage.quantity + EXCLUDED.quantity, \
                     cost_cents = job_usage.cost_cents + EXCLUDED.cost_cents",
            )
            .bind(tenant_id.as_uuid())
            .bind(job_ref.to_string())
            .bind(event.usage_type.as_str())
            .bind(event.quantity)
            .bind(event.cost_cents)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(tenant_id = %tenant_id, event_id = %event.id, "usage committed");

        Ok(CommittedUsage {
            event,
            ledger_entry,
            balance,
        })
    }

    async fn commit_credit(&self, commit: CreditCommit) -> Result<LedgerEntry> {
        let mut tx = self.pool.begin().await?;
        let entry = credit(&mut tx, commit).await?;
        tx.commit().await?;
        Ok(entry)
    }

    async fn settle_recharge(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment_reference: Option<String>,
    ) -> Result<(Invoice, LedgerEntry)> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(invoice_query!(
            "UPDATE invoices SET status = 'paid', payment_reference = $3, paid_at = now() \
             WHERE id = $1 AND tenant_id = $2 AND status = 'pending' AND kind = 'recharge' \
             RETURNING",
            ""
        ))
        .bind(invoice_id.to_string())
        .bind(tenant_id.as_uuid())
        .bind(&payment_reference)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(invoice_update_failed(&mut tx, tenant_id, invoice_id).await);
        };
        let invoice = invoice_from_row(&row)?;

        let entry = credit(
            &mut tx,
            CreditCommit {
                tenant_id,
                amount_cents: invoice.total_cents,
                entry_type: EntryType::AutoRecharge,
                description: format!("Auto-recharge, invoice {}", invoice.invoice_number),
                reference: Some(LedgerReference::Invoice(invoice.id)),
            },
        )
        .await?;

        tx.commit().await?;
        Ok((invoice, entry))
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        let result = sqlx::query(invoice_query!(
            "INSERT INTO invoices (",
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(invoice.id.to_string())
        .bind(&invoice.invoice_number)
        .bind(invoice.tenant_id.as_uuid())
        .bind(invoice.kind.as_str())
        .bind(invoice.status.as_str())
        .bind(invoice.subtotal_cents)
        .bind(invoice.tax_rate)
        .bind(invoice.tax_amount_cents)
        .bind(invoice.total_cents)
        .bind(Json(&invoice.line_items))
        .bind(invoice.time_period.start)
        .bind(invoice.time_period.end)
        .bind(&invoice.payment_reference)
        .bind(&invoice.failure_reason)
        .bind(invoice.created_at)
        .bind(invoice.paid_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_foreign_key_violation(&e) => {
                Err(StoreError::wallet_not_found(invoice.tenant_id))
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyExists {
                entity: "invoice",
                id: invoice.invoice_number.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
    ) -> Result<Option<Invoice>> {
        sqlx::query(invoice_query!(
            "SELECT",
            "FROM invoices WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(invoice_id.to_string())
        .bind(tenant_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(invoice_from_row)
        .transpose()
    }

    async fn list_invoices(
        &self,
        tenant_id: TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Invoice>> {
        let (limit, offset) = page(limit, offset);
        sqlx::query(invoice_query!(
            "SELECT",
            "FROM invoices WHERE tenant_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3"
        ))
        .bind(tenant_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(invoice_from_row)
        .collect()
    }

    async fn last_invoice(
        &self,
        tenant_id: TenantId,
        kind: InvoiceKind,
    ) -> Result<Option<Invoice>> {
        sqlx::query(invoice_query!(
            "SELECT",
            "FROM invoices WHERE tenant_id = $1 AND kind = $2 \
             ORDER BY created_at DESC, id DESC LIMIT 1"
        ))
        .bind(tenant_id.as_uuid())
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?
        .as_ref()
        .map(invoice_from_row)
        .transpose()
    }

    async fn fail_invoice(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        reason: &str,
    ) -> Result<Invoice> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(invoice_query!(
            "UPDATE invoices SET status = 'failed', failure_reason = $3 \
             WHERE id = $1 AND tenant_id = $2 AND status = 'pending' RETURNING",
            ""
        ))
        .bind(invoice_id.to_string())
        .bind(tenant_id.as_uuid())
        .bind(reason)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => invoice_from_row(&row),
            None => Err(invoice_update_failed(&mut conn, tenant_id, invoice_id).await),
        }
    }

    async fn mark_invoice_paid(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment_reference: Option<String>,
    ) -> Result<Invoice> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(invoice_query!(
            "UPDATE invoices SET status = 'paid', payment_reference = $3, paid_at = now() \
             WHERE id = $1 AND tenant_id = $2 AND status = 'pending' RETURNING",
            ""
        ))
        .bind(invoice_id.to_string())
        .bind(tenant_id.as_uuid())
        .bind(&payment_reference)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => invoice_from_row(&row),
            None => Err(invoice_update_failed(&mut conn, tenant_id, invoice_id).await),
        }
    }

    async fn sum_usage_cost(
        &self,
        tenant_id: TenantId,
        since: Option<DateTime<Utc>>,
    ) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COALESCE(SUM(cost_cents), 0)::BIGINT FROM usage_events \
             WHERE tenant_id = $1 AND ($2::TIMESTAMPTZ IS NULL OR created_at >= $2)",
        )
        .bind(tenant_id.as_uuid())
        .bind(since)
        .fetch_one(&self.pool)
        .await?)
    }

    async fn list_usage_events(
        &self,
        tenant_id: TenantId,
        period: TimePeriod,
    ) -> Result<Vec<UsageEvent>> {
        sqlx::query(
            "SELECT id, event_key, tenant_id, job_ref, usage_type, quantity, unit_price_cents, \
             cost_cents, trial_free, metadata, created_at FROM usage_events \
             WHERE tenant_id = $1 AND created_at >= $2 AND created_at < $3 \
             ORDER BY created_at, id",
        )
        .bind(tenant_id.as_uuid())
        .bind(period.start)
        .bind(period.end)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(usage_event_from_row)
        .collect()
    }

    async fn job_usage(&self, tenant_id: TenantId, job_ref: JobRef) -> Result<Vec<JobUsage>> {
        sqlx::query(
            "SELECT job_ref, usage_type, event_count, quantity, cost_cents FROM job_usage \
             WHERE tenant_id = $1 AND job_ref = $2 ORDER BY usage_type",
        )
        .bind(tenant_id.as_uuid())
        .bind(job_ref.to_string())
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(job_usage_from_row)
        .collect()
    }

    async fn reconcile_draft(
        &self,
        tenant_id: TenantId,
        draft: DraftRef,
        job_id: JobId,
    ) -> Result<u64> {
        let from = JobRef::Draft(draft).to_string();
        let to = JobRef::Job(job_id).to_string();

        let mut tx = self.pool.begin().await?;
        lock_balance(&mut tx, tenant_id).await?;

        let moved = sqlx::query(
            "UPDATE usage_events SET job_ref = $3 WHERE tenant_id = $1 AND job_ref = $2",
        )
        .bind(tenant_id.as_uuid())
        .bind(&from)
        .bind(&to)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "INSERT INTO job_usage (tenant_id, job_ref, usage_type, event_count, quantity, cost_cents) \
             SELECT tenant_id, $3, usage_type, event_count, quantity, cost_cents FROM job_usage \
             WHERE tenant_id = $1 AND job_ref = $2 \
             ON CONFLICT (tenant_id, job_ref, usage_type) DO UPDATE SET \
                 event_count = job_usage.event_count + EXCLUDED.event_count, \
                 quantity = job_usage.quantity + EXCLUDED.quantity, \
                 cost_cents = job_usage.cost_cents + EXCLUDED.cost_cents",
        )
        .bind(tenant_id.as_uuid())
        .bind(&from)
        .bind(&to)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM job_usage WHERE tenant_id = $1 AND job_ref = $2")
            .bind(tenant_id.as_uuid())
            .bind(&from)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(moved)
    }

    async fn list_ledger(
        &self,
        tenant_id: TenantId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerEntry>> {
        let (limit, offset) = page(limit, offset);
        sqlx::query(ledger_query!(
            "WHERE tenant_id = $1 ORDER BY seq DESC LIMIT $2 OFFSET $3"
        ))
        .bind(tenant_id.as_uuid())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(ledger_entry_from_row)
        .collect()
    }

    async fn ledger_history(&self, tenant_id: TenantId) -> Result<Vec<LedgerEntry>> {
        sqlx::query(ledger_query!("WHERE tenant_id = $1 ORDER BY seq"))
            .bind(tenant_id.as_uuid())
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(ledger_entry_from_row)
            .collect()
    }
}
