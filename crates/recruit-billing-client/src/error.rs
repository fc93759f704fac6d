//! Client error types.

use recruit_billing_core::BillingStatus;

/// Errors that can occur when using the recruit-billing client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response without a more specific mapping.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The wallet cannot cover the cost and auto-recharge is off.
    #[error("insufficient funds: balance={balance}, required={required}")]
    InsufficientFunds {
        /// Current balance in cents.
        balance: i64,
        /// Required amount in cents.
        required: i64,
    },

    /// The request would exceed the tenant's monthly spend cap.
    #[error("monthly spend cap exceeded: cap={cap}, spent={spent}, cost={cost}")]
    MonthlySpendCapExceeded {
        /// Configured cap in cents.
        cap: i64,
        /// Month-to-date spend in cents.
        spent: i64,
        /// Requested cost in cents.
        cost: i64,
    },

    /// The automatic top-up failed or did not cover the cost.
    #[error("auto-recharge failed: {message}")]
    AutoRechargeFailed {
        /// Server message.
        message: String,
    },

    /// Billing status forbids the usage.
    #[error("account blocked: {status}")]
    AccountBlocked {
        /// The blocking status.
        status: BillingStatus,
    },

    /// The tenant has no wallet.
    #[error("billing not initialized: {message}")]
    BillingNotInitialized {
        /// Server message.
        message: String,
    },

    /// Event key already recorded.
    #[error("duplicate event: {message}")]
    DuplicateEvent {
        /// Server message.
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    /// Whether billing declined the usage, as opposed to a transport or
    /// server failure.
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
