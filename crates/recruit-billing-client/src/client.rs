//! Recruit-Billing HTTP client implementation.

use reqwest::{Client, RequestBuilder};
use std::time::Duration;

use recruit_billing_core::{DraftRef, JobId, JobRef, TenantId};

use crate::error::ClientError;
use crate::types::{
    ApiErrorBody, ApiErrorResponse, BatchUsageRequest, BatchUsageResponse,
    BillingStatusResponse, JobUsageResponse, ReconcileRequest, ReconcileResponse, RecordUsage,
    UsageReceipt,
};

/// Recruit-Billing API client.
///
/// Records usage and reads billing status with a service API key.
#[derive(Debug, Clone)]
pub struct RecruitBillingClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl RecruitBillingClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the billing service (e.g., `"http://recruit-billing:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    /// Record one usage event.
    ///
    /// # Errors
    ///
    /// Returns a typed billing rejection (`InsufficientFunds`,
    /// `MonthlySpendCapExceeded`, ...) or a transport/API error.
    pub async fn record_usage(&self, usage: RecordUsage) -> Result<UsageReceipt, ClientError> {
        tracing::debug!(
            tenant_id = %usage.tenant_id,
            usage_type = %usage.usage_type,
            quantity = usage.quantity,
            "Recording usage"
        );

        let request = self.post("/v1/usage").json(&usage);
        self.send(request).await
    }

    /// Record several usage events; each succeeds or fails independently.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch as a whole is rejected.
    pub async fn record_usage_batch(
        &self,
        events: Vec<RecordUsage>,
    ) -> Result<BatchUsageResponse, ClientError> {
        let request = self
            .post("/v1/usage/batch")
            .json(&BatchUsageRequest { events });
        self.send(request).await
    }

    /// Read a tenant's billing status.
    ///
    /// # Errors
    ///
    /// Returns `BillingNotInitialized` if the tenant has no wallet.
    pub async fn billing_status(
        &self,
        tenant_id: TenantId,
    ) -> Result<BillingStatusResponse, ClientError> {
        let request = self.get(&format!("/v1/wallets/{tenant_id}"));
        self.send(request).await
    }

    /// Read usage aggregates for a job or draft.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn job_usage(
        &self,
        tenant_id: TenantId,
        job_ref: JobRef,
    ) -> Result<JobUsageResponse, ClientError> {
        let request = self.get(&format!("/v1/usage/jobs/{tenant_id}/{job_ref}"));
        self.send(request).await
    }

    /// Move a draft's usage to its saved job. Returns the number of events moved.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn reconcile_draft(
        &self,
        tenant_id: TenantId,
        draft_ref: DraftRef,
        job_id: JobId,
    ) -> Result<u64, ClientError> {
        let request = self.post("/v1/usage/reconcile").json(&ReconcileRequest {
            tenant_id,
            draft_ref,
            job_id,
        });
        let response: ReconcileResponse = self.send(request).await?;
        Ok(response.moved_events)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.get(format!("{}{path}", self.base_url)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.authorized(self.client.post(format!("{}{path}", self.base_url)))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ClientError> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        match response.json::<ApiErrorResponse>().await {
            Ok(ApiErrorResponse { error }) => Err(map_api_error(error, status.as_u16())),
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Map an error body to a typed error by its code.
fn map_api_error(error: ApiErrorBody, status: u16) -> ClientError {
    let detail = |key: &str| {
        error
            .details
            .as_ref()
            .and_then(|d| d.get(key))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0)
    };

    match error.code.as_str() {
        "insufficient_funds" => ClientError::InsufficientFunds {
            balance: detail("balance_cents"),
            required: detail("required_cents"),
        },
        "monthly_spend_cap_exceeded" => ClientError::MonthlySpendCapExceeded {
            cap: detail("cap_cents"),
            spent: detail("spent_cents"),
            cost: detail("cost_cents"),
        },
        "auto_recharge_failed" => ClientError::AutoRechargeFailed {
            message: error.message,
        },
        "account_blocked" => match error
            .details
            .as_ref()
            .and_then(|d| d.get("billing_status"))
            .and_then(|s| serde_json::from_value(s.clone()).ok())
        {
            Some(status) => ClientError::AccountBlocked { status },
            None => ClientError::Api {
                code: error.code,
                message: error.message,
                status,
            },
        },
        "billing_not_initialized" => ClientError::BillingNotInitialized {
            message: error.message,
        },
        "duplicate_event" => ClientError::DuplicateEvent {
            message: error.message,
        },
        _ => ClientError::Api {
            code: error.code,
            message: error.message,
            status,
        },
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recruit_billing_core::BillingStatus;
    use serde_json::json;

    fn body(code: &str, details: serde_json::Value) -> ApiErrorBody {
        ApiErrorBody {
            code: code.to_string(),
            message: "rejected".to_string(),
            details: Some(details),
        }
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = RecruitBillingClient::new("http://localhost:8080/", "test-api-key").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn client_options() {
        let options = ClientOptions::with_service_name("cv-parser");
        let client =
            RecruitBillingClient::with_options("http://localhost:8080", "key", options).unwrap();
        assert_eq!(client.service_name, "cv-parser");
    }

    #[test]
    fn maps_spend_cap_details() {
        let err = map_api_error(
            body(
                "monthly_spend_cap_exceeded",
                json!({ "cap_cents": 500, "spent_cents": 480, "cost_cents": 50 }),
            ),
            402,
        );
        assert!(matches!(
            err,
            ClientError::MonthlySpendCapExceeded {
                cap: 500,
                spent: 480,
                cost: 50
            }
        ));
        assert!(err.is_billing_rejection());
    }

    #[test]
    fn maps_account_blocked_status() {
        let err = map_api_error(
            body("account_blocked", json!({ "billing_status": "suspended" })),
            403,
        );
        assert!(matches!(
            err,
            ClientError::AccountBlocked {
                status: BillingStatus::Suspended
            }
        ));
    }

    #[test]
    fn unknown_codes_stay_generic() {
        let err = map_api_error(body("conflict", json!({})), 409);
        assert!(matches!(err, ClientError::Api { status: 409, .. }));
        assert!(!err.is_billing_rejection());
    }
}
