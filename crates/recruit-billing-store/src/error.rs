//! Error types for recruit-billing storage.

use recruit_billing_core::BillingError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization/deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record not found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of record.
        entity: &'static str,
        /// Key that was looked up.
        id: String,
    },

    /// Record already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists {
        /// Kind of record.
        entity: &'static str,
        /// Key that collided.
        id: String,
    },

    /// The conditional debit found too little balance.
    #[error("insufficient funds: balance={balance}, required={required}")]
    InsufficientFunds {
        /// Current balance in cents.
        balance: i64,
        /// Required amount in cents.
        required: i64,
    },

    /// Duplicate event (idempotency check failed).
    #[error("duplicate event: {event_key}")]
    DuplicateEvent {
        /// The repeated key.
        event_key: String,
    },

    /// A conditional update found the row in an unexpected state.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl StoreError {
    pub(crate) fn wallet_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "wallet",
            id: id.to_string(),
        }
    }

    pub(crate) fn invoice_not_found(id: impl ToString) -> Self {
        Self::NotFound {
            entity: "invoice",
            id: id.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<BillingError> for StoreError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidInvoiceTransition { .. }
            | BillingError::InvalidStatusTransition { .. } => Self::Conflict(err.to_string()),
            other => Self::Serialization(other.to_string()),
        }
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound {
                entity: "wallet",
                id,
            } => Self::BillingNotInitialized { tenant_id: id },
            StoreError::NotFound {
                entity: "invoice",
                id,
            } => Self::InvoiceNotFound { invoice_id: id },
            StoreError::AlreadyExists {
                entity: "wallet",
                id,
            } => Self::WalletAlreadyExists { tenant_id: id },
            StoreError::InsufficientFunds { balance, required } => {
                Self::InsufficientFunds { balance, required }
            }
            StoreError::DuplicateEvent { event_key } => Self::DuplicateEvent { event_key },
            StoreError::Conflict(message) => Self::Conflict(message),
            StoreError::Serialization(message) => Self::Serialization(message),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_wallet_means_billing_not_initialized() {
        let err: BillingError = StoreError::wallet_not_found("t-1").into();
        assert!(matches!(
            err,
            BillingError::BillingNotInitialized { tenant_id } if tenant_id == "t-1"
        ));
    }

    #[test]
    fn insufficient_funds_keeps_amounts() {
        let err: BillingError = StoreError::InsufficientFunds {
            balance: 400,
            required: 600,
        }
        .into();
        assert!(matches!(
            err,
            BillingError::InsufficientFunds {
                balance: 400,
                required: 600
            }
        ));
    }

    #[test]
    fn database_errors_become_storage_errors() {
        let err: BillingError = StoreError::Database("connection reset".into()).into();
        assert!(matches!(err, BillingError::Storage(_)));
    }
}
