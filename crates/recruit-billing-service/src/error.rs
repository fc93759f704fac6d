//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use recruit_billing_core::{BillingError, BillingStatus};
use recruit_billing_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - resource already exists or invalid state transition.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The wallet cannot cover the cost.
    #[error("insufficient funds: balance={balance}, required={required}")]
    InsufficientFunds {
        /// Current balance.
        balance: i64,
        /// Required amount.
        required: i64,
    },

    /// Month-to-date spend plus the cost exceeds the cap.
    #[error("monthly spend cap exceeded: cap={cap}, spent={spent}, cost={cost}")]
    MonthlySpendCapExceeded {
        /// Configured cap.
        cap: i64,
        /// Month-to-date spend.
        spent: i64,
        /// Requested cost.
        cost: i64,
    },

    /// The one permitted top-up did not cover the cost.
    #[error("auto-recharge failed: {0}")]
    AutoRechargeFailed(String),

    /// Billing status forbids metering.
    #[error("account blocked: billing status is {0}")]
    AccountBlocked(BillingStatus),

    /// No wallet exists for the tenant.
    #[error("billing not initialized for tenant {0}")]
    BillingNotInitialized(String),

    /// Duplicate event (idempotency).
    #[error("duplicate event: {0}")]
    DuplicateEvent(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ApiError {
    /// Machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Conflict(_) => "conflict",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::MonthlySpendCapExceeded { .. } => "monthly_spend_cap_exceeded",
            Self::AutoRechargeFailed(_) => "auto_recharge_failed",
            Self::AccountBlocked(_) => "account_blocked",
            Self::BillingNotInitialized(_) => "billing_not_initialized",
            Self::DuplicateEvent(_) => "duplicate_event",
            Self::Internal(_) => "internal_error",
            Self::ExternalService(_) => "external_service_error",
        }
    }

    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) | Self::BillingNotInitialized(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) | Self::DuplicateEvent(_) => StatusCode::CONFLICT,
            Self::InsufficientFunds { .. }
            | Self::MonthlySpendCapExceeded { .. }
            | Self::AutoRechargeFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::AccountBlocked(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ExternalService(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Structured context for client-side handling.
    #[must_use]
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::InsufficientFunds { balance, required } => Some(serde_json::json!({
                "balance_cents": balance,
                "required_cents": required
            })),
            Self::MonthlySpendCapExceeded { cap, spent, cost } => Some(serde_json::json!({
                "cap_cents": cap,
                "spent_cents": spent,
                "cost_cents": cost
            })),
            Self::AccountBlocked(status) => Some(serde_json::json!({ "billing_status": status })),
            _ => None,
        }
    }

    /// Message safe to return to callers. Internal errors are logged and redacted.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                "An internal error occurred".to_string()
            }
            Self::DuplicateEvent(key) => format!("Event {key} already recorded"),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.public_message(),
                details: self.details(),
            },
        };

        (self.status(), Json(body)).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InsufficientFunds { balance, required } => {
                Self::InsufficientFunds { balance, required }
            }
            BillingError::MonthlySpendCapExceeded { cap, spent, cost } => {
                Self::MonthlySpendCapExceeded { cap, spent, cost }
            }
            BillingError::AutoRechargeFailed { reason } => Self::AutoRechargeFailed(reason),
            BillingError::AccountBlocked { status } => Self::AccountBlocked(status),
            BillingError::BillingNotInitialized { tenant_id } => {
                Self::BillingNotInitialized(tenant_id)
            }
            BillingError::DuplicateEvent { event_key } => Self::DuplicateEvent(event_key),
            BillingError::InvoiceNotFound { invoice_id } => {
                Self::NotFound(format!("invoice not found: {invoice_id}"))
            }
            err @ (BillingError::InvalidQuantity(_)
            | BillingError::InvalidAmount(_)
            | BillingError::InvalidId(_)) => Self::BadRequest(err.to_string()),
            err @ (BillingError::InvalidStatusTransition { .. }
            | BillingError::InvalidInvoiceTransition { .. }
            | BillingError::WalletAlreadyExists { .. }
            | BillingError::Conflict(_)) => Self::Conflict(err.to_string()),
            BillingError::ExternalService { service, message } => {
                Self::ExternalService(format!("{service}: {message}"))
            }
            err @ (BillingError::Storage(_)
            | BillingError::Serialization(_)
            | BillingError::Configuration(_)) => Self::Internal(err.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        BillingError::from(err).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn billing_rejections_map_to_payment_required() {
        let err: ApiError = BillingError::MonthlySpendCapExceeded {
            cap: 500,
            spent: 480,
            cost: 50,
        }
        .into();
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.code(), "monthly_spend_cap_exceeded");

        let err: ApiError = BillingError::AutoRechargeFailed {
            reason: "declined".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn blocked_and_uninitialized_accounts() {
        let err: ApiError = BillingError::AccountBlocked {
            status: BillingStatus::PastDue,
        }
        .into();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "account_blocked");

        let err: ApiError = StoreError::NotFound {
            entity: "wallet",
            id: "t-1".into(),
        }
        .into();
        assert_eq!(err.code(), "billing_not_initialized");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn storage_failures_are_internal() {
        let err: ApiError = StoreError::Database("connection reset".into()).into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn invalid_input_is_a_bad_request() {
        let err: ApiError = BillingError::InvalidQuantity(-1.0).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
