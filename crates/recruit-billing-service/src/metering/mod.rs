//! Metering and wallet-billing engine.
//!
//! The components here hold no state of their own beyond configuration;
//! every balance change goes through the [`Store`]'s compound operations.

pub mod invoicing;
pub mod recharge;
pub mod recorder;
pub mod spend_cap;
pub mod status;
pub mod wallets;

pub use invoicing::InvoiceGenerator;
pub use recharge::AutoRecharger;
pub use recorder::{UsageReceipt, UsageRecorder, UsageRequest};
pub use spend_cap::SpendCapEnforcer;
pub use status::{BillingStatusQuery, BillingStatusView};
pub use wallets::{ManualCredit, NewWallet, WalletManager};

use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;

use recruit_billing_core::PricingTable;
use recruit_billing_store::Store;

use crate::config::ServiceConfig;
use crate::payment::PaymentProvider;

/// Engine parameters taken from service configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Unit prices and recharge amount.
    pub pricing: PricingTable,
    /// Tax rate for usage statements.
    pub tax_rate: f64,
    /// Reference timezone for month windows.
    pub billing_utc_offset: FixedOffset,
    /// Bound on one payment capture.
    pub payment_capture_timeout: Duration,
    /// Auto-recharge flag for new wallets.
    pub auto_recharge_default: bool,
}

impl From<&ServiceConfig> for EngineSettings {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            pricing: config.pricing,
            tax_rate: config.tax_rate,
            billing_utc_offset: config.billing_utc_offset,
            payment_capture_timeout: config.payment_capture_timeout,
            auto_recharge_default: config.auto_recharge_default,
        }
    }
}

/// All metering components, wired to one store and payment provider.
#[derive(Clone)]
pub struct BillingEngine {
    /// Metering entry point.
    pub recorder: UsageRecorder,
    /// Automatic top-ups.
    pub recharger: AutoRecharger,
    /// Monthly cap checks.
    pub spend_cap: SpendCapEnforcer,
    /// Usage statements.
    pub invoices: InvoiceGenerator,
    /// Dashboard read model.
    pub status: BillingStatusQuery,
    /// Wallet lifecycle.
    pub wallets: WalletManager,
}

impl BillingEngine {
    /// Wire the engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        payments: Arc<dyn PaymentProvider>,
        settings: EngineSettings,
    ) -> Self {
        let spend_cap = SpendCapEnforcer::new(Arc::clone(&store), settings.billing_utc_offset);
        let recharger = AutoRecharger::new(
            Arc::clone(&store),
            payments,
            settings.pricing.standard_recharge_amount(),
            settings.payment_capture_timeout,
        );
        let recorder = UsageRecorder::new(
            Arc::clone(&store),
            settings.pricing,
            spend_cap.clone(),
            recharger.clone(),
        );

        Self {
            recorder,
            recharger,
            invoices: InvoiceGenerator::new(Arc::clone(&store), settings.tax_rate),
            status: BillingStatusQuery::new(Arc::clone(&store), spend_cap.clone()),
            wallets: WalletManager::new(store, settings.auto_recharge_default),
            spend_cap,
        }
    }
}
