//! Error types for recruit-billing.

use crate::ids::IdError;
use crate::{BillingStatus, InvoiceStatus};

/// Result type for recruit-billing operations.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors that can occur in recruit-billing operations.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// The wallet cannot cover the debit and no top-up was attempted.
    #[error("insufficient funds: balance={balance}, required={required}")]
    InsufficientFunds {
        /// Current balance in cents.
        balance: i64,
        /// Required amount in cents.
        required: i64,
    },

    /// The debit would push month-to-date spend over the tenant's cap.
    #[error("monthly spend cap exceeded: cap={cap}, spent={spent}, cost={cost}")]
    MonthlySpendCapExceeded {
        /// Configured cap in cents.
        cap: i64,
        /// Month-to-date spend in cents.
        spent: i64,
        /// Cost of the rejected request in cents.
        cost: i64,
    },

    /// Auto-recharge ran but the wallet still cannot cover the debit.
    #[error("auto-recharge failed: {reason}")]
    AutoRechargeFailed {
        /// Why the recharge did not cover the debit.
        reason: String,
    },

    /// No wallet has been provisioned for the tenant.
    #[error("billing not initialized for tenant {tenant_id}")]
    BillingNotInitialized {
        /// The tenant without a wallet.
        tenant_id: String,
    },

    /// The wallet's billing status does not permit this operation.
    #[error("account blocked: billing status is {status}")]
    AccountBlocked {
        /// Current status.
        status: BillingStatus,
    },

    /// A usage event with this idempotency key was already recorded.
    #[error("duplicate event: {event_key}")]
    DuplicateEvent {
        /// The repeated key.
        event_key: String,
    },

    /// Quantity is not a positive finite number.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(f64),

    /// Invalid amount.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Billing status transition not permitted.
    #[error("invalid status transition from {from} to {to}")]
    InvalidStatusTransition {
        /// The current status.
        from: BillingStatus,
        /// The requested status.
        to: BillingStatus,
    },

    /// Invoice status transition not permitted.
    #[error("invalid invoice transition from {from} to {to}")]
    InvalidInvoiceTransition {
        /// The current status.
        from: InvoiceStatus,
        /// The requested status.
        to: InvoiceStatus,
    },

    /// Invoice not found.
    #[error("invoice not found: {invoice_id}")]
    InvoiceNotFound {
        /// The invoice ID that was not found.
        invoice_id: String,
    },

    /// A wallet already exists for the tenant.
    #[error("wallet already exists: {tenant_id}")]
    WalletAlreadyExists {
        /// The tenant that already has a wallet.
        tenant_id: String,
    },

    /// A concurrent change won; the caller may re-read and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// External service error (payment provider).
    #[error("external service error: {service} - {message}")]
    ExternalService {
        /// The service that failed.
        service: String,
        /// Error message.
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BillingError {
    /// Whether this error is a billing decision about the request (as opposed
    /// to an infrastructure failure).
    ///
    /// Callers use this to tell "the tenant may not be charged for this" from
    /// "billing is broken right now".
    #[must_use]
    pub const fn is_billing_rejection(&self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds { .. }
                | Self::MonthlySpendCapExceeded { .. }
                | Self::AutoRechargeFailed { .. }
                | Self::AccountBlocked { .. }
                | Self::BillingNotInitialized { .. }
        )
    }
}
