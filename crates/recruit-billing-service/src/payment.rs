//! Payment capture seam.
//!
//! The metering engine only needs one thing from a payment provider: charge
//! a tenant's saved payment method for a fixed amount, right now, and say
//! whether it worked. Retries and backoff are the provider's business.

use async_trait::async_trait;

use recruit_billing_core::{InvoiceId, TenantId};

/// A request to capture funds for a recharge invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Tenant being charged.
    pub tenant_id: TenantId,

    /// Invoice the capture pays; also used as the idempotency key.
    pub invoice_id: InvoiceId,

    /// Amount in cents.
    pub amount_cents: i64,

    /// Provider-side customer holding the payment method.
    pub customer_id: Option<String>,
}

/// A successful capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureReceipt {
    /// Provider reference for the payment (e.g. a `PaymentIntent` id).
    pub reference: String,
}

/// Why a capture did not succeed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PaymentError {
    /// The provider declined the charge.
    #[error("payment declined: {0}")]
    Declined(String),

    /// The tenant has no payment method on file.
    #[error("no payment method on file for tenant {0}")]
    NoPaymentMethod(TenantId),

    /// The provider could not be reached or answered unexpectedly.
    #[error("payment provider unavailable: {0}")]
    Unavailable(String),

    /// No provider is configured for this deployment.
    #[error("payment provider not configured")]
    NotConfigured,
}

/// External payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Capture `amount_cents` from the tenant's saved payment method.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError` if the funds were not captured.
    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureReceipt, PaymentError>;
}

/// Provider used when no credentials are configured; every capture fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredProvider;

#[async_trait]
impl PaymentProvider for UnconfiguredProvider {
    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureReceipt, PaymentError> {
        tracing::warn!(
            tenant_id = %request.tenant_id,
            invoice_id = %request.invoice_id,
            "Payment capture requested but no provider is configured"
        );
        Err(PaymentError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_provider_never_captures() {
        let request = CaptureRequest {
            tenant_id: TenantId::generate(),
            invoice_id: InvoiceId::generate(),
            amount_cents: 10_000,
            customer_id: Some("cus_123".into()),
        };
        assert!(matches!(
            UnconfiguredProvider.capture(&request).await,
            Err(PaymentError::NotConfigured)
        ));
    }
}
