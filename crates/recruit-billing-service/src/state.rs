//! Application state.

use std::sync::Arc;

use recruit_billing_store::Store;

use crate::config::ServiceConfig;
use crate::metering::{BillingEngine, EngineSettings};
use crate::payment::{PaymentProvider, UnconfiguredProvider};
use crate::stripe::StripeClient;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Metering components.
    pub engine: BillingEngine,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Stripe client for captures and webhook verification (optional).
    pub stripe: Option<Arc<StripeClient>>,
}

impl AppState {
    /// Create application state, using Stripe for captures when configured.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let stripe = stripe_client(&config);
        let payments: Arc<dyn PaymentProvider> = match &stripe {
            Some(client) => Arc::clone(client) as Arc<dyn PaymentProvider>,
            None => {
                tracing::warn!("Stripe not configured - auto-recharge captures will fail");
                Arc::new(UnconfiguredProvider)
            }
        };

        Self::assemble(store, config, stripe, payments)
    }

    /// Create application state with an explicit payment provider.
    ///
    /// Stripe is still used for webhook verification when configured.
    #[must_use]
    pub fn with_payment_provider(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        payments: Arc<dyn PaymentProvider>,
    ) -> Self {
        let stripe = stripe_client(&config);
        Self::assemble(store, config, stripe, payments)
    }

    fn assemble(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        stripe: Option<Arc<StripeClient>>,
        payments: Arc<dyn PaymentProvider>,
    ) -> Self {
        let engine = BillingEngine::new(
            Arc::clone(&store),
            payments,
            EngineSettings::from(&config),
        );

        Self {
            store,
            engine,
            config,
            stripe,
        }
    }

    /// Check if Stripe is configured.
    #[must_use]
    pub fn has_stripe(&self) -> bool {
        self.stripe.is_some()
    }
}

fn stripe_client(config: &ServiceConfig) -> Option<Arc<StripeClient>> {
    let key = config.stripe_api_key.as_ref()?;
    match StripeClient::new(key, config.stripe_webhook_secret.clone()) {
        Ok(client) => {
            tracing::info!("Stripe integration enabled");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to create Stripe client");
            None
        }
    }
}
