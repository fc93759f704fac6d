//! Automatic wallet top-ups.

use std::sync::Arc;
use std::time::Duration;

use recruit_billing_core::{BillingError, Invoice, Result, TenantId};
use recruit_billing_store::Store;

use crate::payment::{CaptureRequest, PaymentProvider};

/// Creates a recharge invoice, captures it, and credits the wallet on success.
#[derive(Clone)]
pub struct AutoRecharger {
    store: Arc<dyn Store>,
    payments: Arc<dyn PaymentProvider>,
    amount_cents: i64,
    capture_timeout: Duration,
}

impl AutoRecharger {
    /// Create a recharger for the standard recharge amount.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        payments: Arc<dyn PaymentProvider>,
        amount_cents: i64,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            store,
            payments,
            amount_cents,
            capture_timeout,
        }
    }

    /// Top up the tenant's wallet by the standard recharge amount.
    ///
    /// The wallet is credited only after the capture succeeds within the
    /// timeout. A timeout counts as a failed capture.
    ///
    /// # Errors
    ///
    /// - `AutoRechargeFailed` if the capture fails or times out; the invoice
    ///   is left `failed`
    /// - `BillingNotInitialized` if the tenant has no wallet
    /// - a storage error if the captured amount could not be credited
    pub async fn recharge(&self, tenant_id: TenantId) -> Result<Invoice> {
        let wallet = self
            .store
            .get_wallet(tenant_id)
            .await?
            .ok_or_else(|| BillingError::BillingNotInitialized {
                tenant_id: tenant_id.to_string(),
            })?;

        let invoice = Invoice::recharge(tenant_id, self.amount_cents);
        self.store.insert_invoice(&invoice).await?;

        let request = CaptureRequest {
            tenant_id,
            invoice_id: invoice.id,
            amount_cents: invoice.total_cents,
            customer_id: wallet.payment_customer_id,
        };

        let capture = tokio::time::timeout(self.capture_timeout, self.payments.capture(&request));
        let reason = match capture.await {
            Ok(Ok(receipt)) => return self.settle(&invoice, receipt.reference).await,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "payment capture timed out after {}s",
                self.capture_timeout.as_secs_f64()
            ),
        };

        tracing::warn!(
            tenant_id = %tenant_id,
            invoice_id = %invoice.id,
            amount_cents = invoice.total_cents,
            reason = %reason,
            "Auto-recharge capture failed"
        );

        if let Err(e) = self.store.fail_invoice(tenant_id, invoice.id, &reason).await {
            tracing::error!(
                tenant_id = %tenant_id,
                invoice_id = %invoice.id,
                error = %e,
                "Failed to mark recharge invoice failed"
            );
        }

        Err(BillingError::AutoRechargeFailed { reason })
    }

    async fn settle(&self, invoice: &Invoice, reference: String) -> Result<Invoice> {
        match self
            .store
            .settle_recharge(invoice.tenant_id, invoice.id, Some(reference.clone()))
            .await
        {
            Ok((paid, entry)) => {
                tracing::info!(
                    tenant_id = %invoice.tenant_id,
                    invoice_id = %paid.id,
                    amount_cents = paid.total_cents,
                    balance_after = entry.balance_after_cents,
                    payment_reference = %reference,
                    "Wallet auto-recharged"
                );
                Ok(paid)
            }
            Err(e) => {
                tracing::error!(
                    tenant_id = %invoice.tenant_id,
                    invoice_id = %invoice.id,
                    payment_reference = %reference,
                    error = %e,
                    "Payment captured but wallet credit failed"
                );
                Err(e.into())
            }
        }
    }
}
