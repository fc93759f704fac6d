//! Stripe API client implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::types::{Customer, PaymentIntent, StripeErrorResponse};
use crate::crypto::{constant_time_eq, hmac_sha256_hex};
use crate::payment::{CaptureReceipt, CaptureRequest, PaymentError, PaymentProvider};

/// Maximum age of a signed webhook, in seconds.
const WEBHOOK_TOLERANCE_SECONDS: i64 = 300;

/// Error type for Stripe operations.
#[derive(Debug, thiserror::Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Stripe API returned an error.
    #[error("Stripe API error: {error_type} - {message}")]
    Api {
        /// Error type.
        error_type: String,
        /// Error message.
        message: String,
        /// Error code.
        code: Option<String>,
    },

    /// Invalid webhook signature.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StripeError {
    fn is_card_error(&self) -> bool {
        matches!(self, Self::Api { error_type, .. } if error_type == "card_error")
    }
}

/// Stripe API client.
#[derive(Debug, Clone)]
pub struct StripeClient {
    client: Client,
    base_url: String,
    api_key: String,
    webhook_secret: Option<String>,
}

impl StripeClient {
    /// Stripe API base URL.
    const BASE_URL: &'static str = "https://api.stripe.com/v1";

    /// Create a new Stripe client.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Stripe secret API key (`sk_test_...` or `sk_live_...`)
    /// * `webhook_secret` - Optional webhook signing secret (`whsec_...`)
    ///
    /// # Errors
    ///
    /// Returns `StripeError::Http` if the HTTP client cannot be built.
    pub fn new(
        api_key: impl Into<String>,
        webhook_secret: Option<String>,
    ) -> Result<Self, StripeError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: Self::BASE_URL.to_string(),
            api_key: api_key.into(),
            webhook_secret,
        })
    }

    /// Point the client at another API root (a Stripe mock).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Get a customer by ID.
    ///
    /// # Errors
    ///
    /// Returns `StripeError` if the request fails.
    pub async fn get_customer(&self, customer_id: &str) -> Result<Option<Customer>, StripeError> {
        let response = self
            .client
            .get(format!("{}/customers/{}", self.base_url, customer_id))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        self.handle_response(response).await.map(Some)
    }

    /// Create and confirm an off-session `PaymentIntent`.
    ///
    /// The invoice id doubles as the idempotency key, so a retried request
    /// for the same invoice never charges twice.
    ///
    /// # Errors
    ///
    /// Returns `StripeError::Api` with type `card_error` when the charge is
    /// declined.
    pub async fn create_off_session_payment(
        &self,
        request: &CaptureRequest,
        customer_id: &str,
        payment_method: &str,
    ) -> Result<PaymentIntent, StripeError> {
        let params = [
            ("amount", request.amount_cents.to_string()),
            ("currency", "usd".to_string()),
            ("customer", customer_id.to_string()),
            ("payment_method", payment_method.to_string()),
            ("off_session", "true".to_string()),
            ("confirm", "true".to_string()),
            ("description", "Wallet auto-recharge".to_string()),
            ("metadata[tenant_id]", request.tenant_id.to_string()),
            ("metadata[invoice_id]", request.invoice_id.to_string()),
        ];

        tracing::debug!(
            tenant_id = %request.tenant_id,
            invoice_id = %request.invoice_id,
            amount_cents = request.amount_cents,
            "Creating Stripe off-session payment"
        );

        let response = self
            .client
            .post(format!("{}/payment_intents", self.base_url))
            .basic_auth(&self.api_key, Option::<&str>::None)
            .header("Idempotency-Key", format!("recharge-{}", request.invoice_id))
            .form(&params)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Verify a `Stripe-Signature` header against the raw payload.
    ///
    /// # Errors
    ///
    /// Returns `StripeError::InvalidSignature` if no `v1` signature matches
    /// or the timestamp is outside the tolerance window.
    pub fn verify_webhook_signature(
        &self,
        payload: &str,
        signature: &str,
    ) -> Result<(), StripeError> {
        self.verify_webhook_signature_at(payload, signature, chrono::Utc::now().timestamp())
    }

    /// Verify a signature as of `now` (Unix seconds).
    ///
    /// # Errors
    ///
    /// See [`Self::verify_webhook_signature`].
    pub fn verify_webhook_signature_at(
        &self,
        payload: &str,
        signature: &str,
        now: i64,
    ) -> Result<(), StripeError> {
        let secret = self
            .webhook_secret
            .as_ref()
            .ok_or_else(|| StripeError::Configuration("Webhook secret not configured".into()))?;

        // Format: t=timestamp,v1=signature,v1=signature2,...
        let mut timestamp: Option<&str> = None;
        let mut signatures: Vec<&str> = Vec::new();

        for part in signature.split(',') {
            match part.split_once('=') {
                Some(("t", ts)) => timestamp = Some(ts),
                Some(("v1", sig)) => signatures.push(sig),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(StripeError::InvalidSignature)?;
        let issued: i64 = timestamp
            .parse()
            .map_err(|_| StripeError::InvalidSignature)?;
        if (now - issued).abs() > WEBHOOK_TOLERANCE_SECONDS || signatures.is_empty() {
            return Err(StripeError::InvalidSignature);
        }

        let expected = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"))
            .ok_or(StripeError::InvalidSignature)?;

        if signatures.iter().any(|sig| constant_time_eq(&expected, sig)) {
            Ok(())
        } else {
            Err(StripeError::InvalidSignature)
        }
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        match response.json::<StripeErrorResponse>().await {
            Ok(StripeErrorResponse { error }) => {
                let message = match error.decline_code {
                    Some(decline) => format!("{} ({decline})", error.message),
                    None => error.message,
                };
                Err(StripeError::Api {
                    error_type: error.error_type,
                    message,
                    code: error.code,
                })
            }
            Err(_) => Err(StripeError::Api {
                error_type: "unknown".to_string(),
                message: format!("HTTP {status}"),
                code: None,
            }),
        }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureReceipt, PaymentError> {
        let unavailable = |e: StripeError| PaymentError::Unavailable(e.to_string());

        let customer_id = request
            .customer_id
            .as_deref()
            .ok_or(PaymentError::NoPaymentMethod(request.tenant_id))?;
        let customer = self
            .get_customer(customer_id)
            .await
            .map_err(unavailable)?
            .ok_or(PaymentError::NoPaymentMethod(request.tenant_id))?;
        let payment_method = customer
            .invoice_settings
            .default_payment_method
            .ok_or(PaymentError::NoPaymentMethod(request.tenant_id))?;

        let intent = match self
            .create_off_session_payment(request, customer_id, &payment_method)
            .await
        {
            Ok(intent) => intent,
            Err(e) if e.is_card_error() => return Err(PaymentError::Declined(e.to_string())),
            Err(e) => return Err(unavailable(e)),
        };

        if intent.is_succeeded() {
            Ok(CaptureReceipt { reference: intent.id })
        } else {
            Err(PaymentError::Declined(format!(
                "payment intent {} is {}",
                intent.id, intent.status
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const NOW: i64 = 1_700_000_000;

    fn client() -> StripeClient {
        StripeClient::new("sk_test_123", Some(SECRET.into())).unwrap()
    }

    fn sign(payload: &str, timestamp: i64) -> String {
        let sig = hmac_sha256_hex(SECRET, &format!("{timestamp}.{payload}")).unwrap();
        format!("t={timestamp},v1={sig}")
    }

    #[test]
    fn accepts_a_fresh_valid_signature() {
        let payload = r#"{"id":"evt_1"}"#;
        client()
            .verify_webhook_signature_at(payload, &sign(payload, NOW), NOW + 10)
            .unwrap();
    }

    #[test]
    fn rejects_tampered_payload() {
        let header = sign(r#"{"id":"evt_1"}"#, NOW);
        assert!(matches!(
            client().verify_webhook_signature_at(r#"{"id":"evt_2"}"#, &header, NOW),
            Err(StripeError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = "{}";
        let header = sign(payload, NOW - WEBHOOK_TOLERANCE_SECONDS - 1);
        assert!(client()
            .verify_webhook_signature_at(payload, &header, NOW)
            .is_err());
    }

    #[test]
    fn rejects_header_without_v1() {
        assert!(client()
            .verify_webhook_signature_at("{}", &format!("t={NOW}"), NOW)
            .is_err());
    }
}
