//! Service configuration.
//!
//! Everything is read once at startup. Pricing has no defaults: a process
//! that cannot build its [`PricingTable`] refuses to start.

use std::path::Path;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;

use recruit_billing_core::money::{self, MoneyError};
use recruit_billing_core::period::parse_utc_offset;
use recruit_billing_core::PricingTable;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("missing required configuration: {0}")]
    Missing(&'static str),

    /// A variable is set but cannot be used.
    #[error("invalid value for {var}: {message}")]
    Invalid {
        /// The offending variable.
        var: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    fn invalid(var: &'static str, message: impl ToString) -> Self {
        Self::Invalid {
            var,
            message: message.to_string(),
        }
    }
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL URL. `None` runs on the in-memory store.
    pub database_url: Option<String>,

    /// Connection pool size for PostgreSQL.
    pub database_max_connections: u32,

    /// Key expected in `x-api-key` from feature code.
    pub service_api_key: Option<String>,

    /// Key expected in `x-admin-key` for privileged calls.
    pub admin_api_key: Option<String>,

    /// Stripe secret API key.
    pub stripe_api_key: Option<String>,

    /// Stripe webhook signing secret.
    pub stripe_webhook_secret: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Unit prices and the standard recharge amount.
    pub pricing: PricingTable,

    /// Pass-through tax rate applied to usage statements.
    pub tax_rate: f64,

    /// Reference timezone for calendar-month spend windows.
    pub billing_utc_offset: FixedOffset,

    /// Upper bound on one payment capture.
    pub payment_capture_timeout: Duration,

    /// Auto-recharge flag given to newly created wallets.
    pub auto_recharge_default: bool,
}

/// Stripe secrets file structure.
#[derive(Debug, Deserialize)]
struct StripeSecrets {
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Configuration with the given pricing and defaults for everything else.
    #[must_use]
    pub fn with_pricing(pricing: PricingTable) -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            database_max_connections: 10,
            service_api_key: None,
            admin_api_key: None,
            stripe_api_key: None,
            stripe_webhook_secret: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            pricing,
            tax_rate: 0.0,
            billing_utc_offset: Utc.fix(),
            payment_capture_timeout: Duration::from_secs(15),
            auto_recharge_default: false,
        }
    }

    /// Load configuration from environment variables and secrets files.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if pricing is missing or any value is malformed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|var| std::env::var(var).ok())?;

        if config.stripe_api_key.is_none() {
            if let Some(secrets) = load_stripe_secrets() {
                config.stripe_api_key = Some(secrets.api_key);
                config.stripe_webhook_secret =
                    secrets.webhook_secret.or(config.stripe_webhook_secret);
            }
        }

        Ok(config)
    }

    /// Build configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if pricing is missing or any value is malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let price = |var: &'static str| -> Result<i64, ConfigError> {
            let raw = lookup(var).ok_or(ConfigError::Missing(var))?;
            money::parse_cents(&raw).map_err(|e: MoneyError| ConfigError::invalid(var, e))
        };

        let pricing = PricingTable::new(
            price("PRICE_DOCUMENT_PARSE")?,
            price("PRICE_QUESTION_BATCH")?,
            price("PRICE_VIDEO_MINUTE")?,
            price("STANDARD_RECHARGE_AMOUNT")?,
        )
        .map_err(|e| ConfigError::invalid("PRICE_*", e))?;

        let mut config = Self::with_pricing(pricing);

        if let Some(addr) = lookup("LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.is_empty());
        config.database_max_connections =
            parse_or("DATABASE_MAX_CONNECTIONS", &lookup, config.database_max_connections)?;
        config.service_api_key = lookup("SERVICE_API_KEY");
        config.admin_api_key = lookup("ADMIN_API_KEY");
        config.stripe_api_key = lookup("STRIPE_API_KEY");
        config.stripe_webhook_secret = lookup("STRIPE_WEBHOOK_SECRET");

        if let Some(origins) = lookup("CORS_ORIGINS") {
            config.cors_origins = origins.split(',').map(|s| s.trim().to_string()).collect();
        }
        config.max_body_bytes = parse_or("MAX_BODY_BYTES", &lookup, config.max_body_bytes)?;
        config.request_timeout_seconds =
            parse_or("REQUEST_TIMEOUT_SECONDS", &lookup, config.request_timeout_seconds)?;

        config.tax_rate = parse_or("TAX_RATE", &lookup, 0.0)?;
        if !(0.0..=1.0).contains(&config.tax_rate) {
            return Err(ConfigError::invalid(
                "TAX_RATE",
                format!("{} is outside 0.0-1.0", config.tax_rate),
            ));
        }

        if let Some(raw) = lookup("BILLING_UTC_OFFSET") {
            config.billing_utc_offset = parse_utc_offset(&raw)
                .ok_or_else(|| ConfigError::invalid("BILLING_UTC_OFFSET", raw))?;
        }

        let capture_seconds: u64 = parse_or("PAYMENT_CAPTURE_TIMEOUT_SECONDS", &lookup, 15)?;
        if capture_seconds == 0 {
            return Err(ConfigError::invalid(
                "PAYMENT_CAPTURE_TIMEOUT_SECONDS",
                "must be positive",
            ));
        }
        config.payment_capture_timeout = Duration::from_secs(capture_seconds);
        config.auto_recharge_default = parse_or("AUTO_RECHARGE_DEFAULT", &lookup, false)?;

        Ok(config)
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_or<T>(
    var: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::invalid(var, e)),
        None => Ok(default),
    }
}

/// Load Stripe secrets from the first secrets file found.
fn load_stripe_secrets() -> Option<StripeSecrets> {
    let secret_paths = [
        ".secrets/stripe.json",
        "recruit-billing/.secrets/stripe.json",
        "../.secrets/stripe.json",
    ];

    for path in &secret_paths {
        match load_secrets_file::<StripeSecrets>(path) {
            Ok(secrets) => {
                tracing::info!(path = %path, "Loaded Stripe secrets from file");
                return Some(secrets);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path, error = %e, "Unreadable Stripe secrets file"),
        }
    }

    tracing::debug!("Stripe secrets file not found");
    None
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let contents = std::fs::read_to_string(Path::new(path))?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const PRICES: [(&str, &str); 4] = [
        ("PRICE_DOCUMENT_PARSE", "0.50"),
        ("PRICE_QUESTION_BATCH", "0.25"),
        ("PRICE_VIDEO_MINUTE", "1.20"),
        ("STANDARD_RECHARGE_AMOUNT", "100.00"),
    ];

    #[test]
    fn loads_pricing_and_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&PRICES)).unwrap();
        assert_eq!(config.pricing.document_parse_cents, 50);
        assert_eq!(config.pricing.question_batch_cents, 25);
        assert_eq!(config.pricing.video_minute_cents, 120);
        assert_eq!(config.pricing.standard_recharge_cents, 10_000);
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert!(config.database_url.is_none());
        assert!(!config.auto_recharge_default);
        assert_eq!(config.payment_capture_timeout, Duration::from_secs(15));
        assert_eq!(config.billing_utc_offset.local_minus_utc(), 0);
        assert!(config.tax_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn missing_price_fails_fast() {
        let err = ServiceConfig::from_lookup(lookup(&PRICES[..3])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("STANDARD_RECHARGE_AMOUNT")));
    }

    #[test]
    fn sub_cent_price_is_rejected() {
        let mut vars = PRICES.to_vec();
        vars[0] = ("PRICE_DOCUMENT_PARSE", "0.505");
        let err = ServiceConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "PRICE_DOCUMENT_PARSE",
                ..
            }
        ));
    }

    #[test]
    fn zero_recharge_amount_is_rejected() {
        let mut vars = PRICES.to_vec();
        vars[3] = ("STANDARD_RECHARGE_AMOUNT", "0");
        assert!(ServiceConfig::from_lookup(lookup(&vars)).is_err());
    }

    #[test]
    fn reads_optional_settings() {
        let mut vars = PRICES.to_vec();
        vars.extend([
            ("TAX_RATE", "0.2"),
            ("BILLING_UTC_OFFSET", "+05:30"),
            ("PAYMENT_CAPTURE_TIMEOUT_SECONDS", "3"),
            ("AUTO_RECHARGE_DEFAULT", "true"),
            ("CORS_ORIGINS", "https://a.example, https://b.example"),
            ("SERVICE_API_KEY", "svc"),
        ]);
        let config = ServiceConfig::from_lookup(lookup(&vars)).unwrap();
        assert!((config.tax_rate - 0.2).abs() < f64::EPSILON);
        assert_eq!(config.billing_utc_offset.local_minus_utc(), 5 * 3600 + 30 * 60);
        assert_eq!(config.payment_capture_timeout, Duration::from_secs(3));
        assert!(config.auto_recharge_default);
        assert_eq!(
            config.cors_origins,
            vec!["https://a.example", "https://b.example"]
        );
        assert_eq!(config.service_api_key.as_deref(), Some("svc"));
    }

    #[test]
    fn rejects_out_of_range_tax_and_bad_offset() {
        let mut vars = PRICES.to_vec();
        vars.push(("TAX_RATE", "1.5"));
        assert!(ServiceConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = PRICES.to_vec();
        vars.push(("BILLING_UTC_OFFSET", "CET"));
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&vars)),
            Err(ConfigError::Invalid {
                var: "BILLING_UTC_OFFSET",
                ..
            })
        ));
    }
}
