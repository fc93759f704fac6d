//! Usage statements.
//!
//! A statement summarizes usage that was already debited from the wallet.
//! Generating or settling one never touches the balance.

use std::sync::Arc;

use chrono::Utc;

use recruit_billing_core::invoice::usage_line_items;
use recruit_billing_core::{
    BillingError, Invoice, InvoiceId, InvoiceKind, Result, TenantId, TimePeriod,
};
use recruit_billing_store::Store;

/// Builds usage-statement invoices from recorded usage.
#[derive(Clone)]
pub struct InvoiceGenerator {
    store: Arc<dyn Store>,
    tax_rate: f64,
}

impl InvoiceGenerator {
    /// Create a generator applying `tax_rate` to every statement.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, tax_rate: f64) -> Self {
        Self { store, tax_rate }
    }

    /// Create a pending statement for `period`.
    ///
    /// Without a period the statement runs from the end of the previous
    /// statement (or wallet creation) until now.
    ///
    /// # Errors
    ///
    /// Returns `BillingNotInitialized` if the tenant has no wallet.
    pub async fn generate(
        &self,
        tenant_id: TenantId,
        period: Option<TimePeriod>,
    ) -> Result<Invoice> {
        let wallet = self
            .store
            .get_wallet(tenant_id)
            .await?
            .ok_or_else(|| BillingError::BillingNotInitialized {
                tenant_id: tenant_id.to_string(),
            })?;

        let period = match period {
            Some(period) => period,
            None => {
                let start = self
                    .store
                    .last_invoice(tenant_id, InvoiceKind::UsageStatement)
                    .await?
                    .map_or(wallet.created_at, |last| last.time_period.end);
                TimePeriod::new(start, Utc::now().max(start))?
            }
        };

        let events = self.store.list_usage_events(tenant_id, period).await?;
        let invoice = Invoice::usage_statement(
            tenant_id,
            period,
            usage_line_items(&events),
            self.tax_rate,
        );
        self.store.insert_invoice(&invoice).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            events = events.len(),
            total_cents = invoice.total_cents,
            "Usage statement generated"
        );
        Ok(invoice)
    }

    /// Record external payment of a pending statement.
    ///
    /// # Errors
    ///
    /// - `InvoiceNotFound` if there is no such invoice for the tenant
    /// - `Conflict` for recharge invoices, which settle through capture
    /// - `Conflict` if the statement is not pending
    pub async fn settle_statement(
        &self,
        tenant_id: TenantId,
        invoice_id: InvoiceId,
        payment_reference: Option<String>,
    ) -> Result<Invoice> {
        let invoice = self
            .store
            .get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| BillingError::InvoiceNotFound {
                invoice_id: invoice_id.to_string(),
            })?;

        if invoice.kind != InvoiceKind::UsageStatement {
            return Err(BillingError::Conflict(format!(
                "invoice {invoice_id} is a {} invoice and settles through payment capture",
                invoice.kind.as_str()
            )));
        }

        let paid = self
            .store
            .mark_invoice_paid(tenant_id, invoice_id, payment_reference)
            .await?;
        tracing::info!(
            tenant_id = %tenant_id,
            invoice_id = %invoice_id,
            total_cents = paid.total_cents,
            "Usage statement settled"
        );
        Ok(paid)
    }
}
