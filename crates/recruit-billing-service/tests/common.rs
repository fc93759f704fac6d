//! Common test utilities for recruit-billing integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum_test::TestServer;

use recruit_billing_core::ledger::audit;
use recruit_billing_core::{
    BillingStatus, JobId, JobRef, PricingTable, TenantId, UsageType,
};
use recruit_billing_service::metering::{ManualCredit, NewWallet};
use recruit_billing_service::{
    create_router, AppState, BillingEngine, CaptureReceipt, CaptureRequest, PaymentError,
    PaymentProvider, ServiceConfig, UsageRequest,
};
use recruit_billing_store::{MemoryStore, Store};

pub const SERVICE_KEY: &str = "test-service-key";
pub const ADMIN_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// $0.50 per parse, $1.00 per ten questions, $2.00 per video minute,
/// $100.00 recharge.
pub fn pricing() -> PricingTable {
    PricingTable::new(50, 100, 200, 10_000).expect("valid pricing")
}

/// Configuration with both API keys and a Stripe webhook secret set.
pub fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::with_pricing(pricing());
    config.listen_addr = "127.0.0.1:0".into();
    config.service_api_key = Some(SERVICE_KEY.into());
    config.admin_api_key = Some(ADMIN_KEY.into());
    config.stripe_api_key = Some("sk_test_unused".into());
    config.stripe_webhook_secret = Some(WEBHOOK_SECRET.into());
    config.payment_capture_timeout = Duration::from_secs(5);
    config
}

/// What the scripted provider does with the next capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    Succeed,
    Decline,
    Hang,
}

/// In-test payment provider.
pub struct ScriptedProvider {
    outcome: Mutex<CaptureOutcome>,
    captures: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(outcome: CaptureOutcome) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            captures: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, outcome: CaptureOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    /// Number of capture attempts seen.
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for ScriptedProvider {
    async fn capture(&self, request: &CaptureRequest) -> Result<CaptureReceipt, PaymentError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let outcome = *self.outcome.lock().unwrap();

        match outcome {
            CaptureOutcome::Succeed => Ok(CaptureReceipt {
                reference: format!("pi_test_{}", request.invoice_id),
            }),
            CaptureOutcome::Decline => Err(PaymentError::Declined("card_declined".into())),
            CaptureOutcome::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(CaptureReceipt {
                    reference: "pi_too_late".into(),
                })
            }
        }
    }
}

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The engine behind the server.
    pub engine: BillingEngine,
    /// The store behind the engine.
    pub store: Arc<dyn Store>,
    /// Payment provider used for recharges.
    pub payments: Arc<ScriptedProvider>,
}

impl TestHarness {
    /// Create a harness over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    /// Create a harness with custom configuration.
    pub fn with_config(config: ServiceConfig) -> Self {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let payments = Arc::new(ScriptedProvider::new(CaptureOutcome::Succeed));

        let state = AppState::with_payment_provider(
            Arc::clone(&store),
            config,
            Arc::clone(&payments) as Arc<dyn PaymentProvider>,
        );
        let engine = state.engine.clone();
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            engine,
            store,
            payments,
        }
    }

    /// Onboard a tenant with a trial wallet.
    pub async fn trial_wallet(&self, auto_recharge: bool) -> TenantId {
        let tenant_id = TenantId::generate();
        self.engine
            .wallets
            .create(
                tenant_id,
                NewWallet {
                    auto_recharge_enabled: Some(auto_recharge),
                    ..NewWallet::default()
                },
            )
            .await
            .expect("create wallet");
        tenant_id
    }

    /// Onboard an active tenant funded with `balance_cents`.
    pub async fn active_wallet(&self, balance_cents: i64, auto_recharge: bool) -> TenantId {
        let tenant_id = self.trial_wallet(auto_recharge).await;
        self.engine
            .wallets
            .transition(tenant_id, BillingStatus::Active)
            .await
            .expect("activate wallet");
        if balance_cents > 0 {
            self.fund(tenant_id, balance_cents).await;
        }
        tenant_id
    }

    /// Add a manual credit.
    pub async fn fund(&self, tenant_id: TenantId, amount_cents: i64) {
        self.engine
            .wallets
            .credit(
                tenant_id,
                ManualCredit {
                    amount_cents,
                    reason: "Test funding".into(),
                    reference: None,
                },
                "test-admin",
            )
            .await
            .expect("fund wallet");
    }

    pub async fn balance(&self, tenant_id: TenantId) -> i64 {
        self.store
            .get_wallet(tenant_id)
            .await
            .expect("read wallet")
            .expect("wallet exists")
            .balance_cents
    }

    /// Replay the ledger and check the balance chain.
    pub async fn assert_ledger_consistent(&self, tenant_id: TenantId) {
        let history = self.store.ledger_history(tenant_id).await.expect("history");
        let balance = self.balance(tenant_id).await;
        let audit = audit(&history, balance);
        assert!(audit.is_consistent(), "ledger inconsistent: {audit:?}");
        assert!(balance >= 0, "negative balance: {balance}");
    }

    pub async fn ledger_len(&self, tenant_id: TenantId) -> usize {
        self.store
            .ledger_history(tenant_id)
            .await
            .expect("history")
            .len()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// A usage request against a saved job.
pub fn usage(
    tenant_id: TenantId,
    job_id: Option<JobId>,
    usage_type: UsageType,
    quantity: f64,
) -> UsageRequest {
    UsageRequest {
        tenant_id,
        job_ref: job_id.map(JobRef::from),
        usage_type,
        quantity,
        event_key: None,
        metadata: serde_json::Value::Null,
    }
}
