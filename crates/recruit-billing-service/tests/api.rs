//! HTTP API integration tests.

mod common;

use axum::http::StatusCode;
use serde_json::{json, Value};

use common::{TestHarness, ADMIN_KEY, SERVICE_KEY, WEBHOOK_SECRET};
use recruit_billing_core::{BillingStatus, DraftRef, JobId, TenantId};
use recruit_billing_service::crypto::hmac_sha256_hex;

// ============================================================================
// Helpers
// ============================================================================

async fn create_wallet(harness: &TestHarness, body: Value) -> Value {
    let response = harness
        .server
        .post("/v1/wallets")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&body)
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    response.json()
}

async fn credit(harness: &TestHarness, tenant: TenantId, amount_cents: i64) {
    harness
        .server
        .post(&format!("/v1/wallets/{tenant}/credit"))
        .add_header("x-admin-key", ADMIN_KEY)
        .add_header("x-admin-id", "support-7")
        .json(&json!({ "amount_cents": amount_cents, "reason": "Onboarding grant" }))
        .await
        .assert_status_ok();
}

async fn activate(harness: &TestHarness, tenant: TenantId) {
    harness
        .server
        .post(&format!("/v1/wallets/{tenant}/status"))
        .add_header("x-admin-key", ADMIN_KEY)
        .json(&json!({ "status": "active" }))
        .await
        .assert_status_ok();
}

fn sign(payload: &str) -> String {
    let timestamp = chrono::Utc::now().timestamp();
    let signature =
        hmac_sha256_hex(WEBHOOK_SECRET, &format!("{timestamp}.{payload}")).expect("hmac");
    format!("t={timestamp},v1={signature}")
}

// ============================================================================
// Health and auth
// ============================================================================

#[tokio::test]
async fn health_is_public() {
    let harness = TestHarness::new();

    let response = harness.server.get("/health").await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "recruit-billing");
    assert_eq!(body["store"], "reachable");
    assert_eq!(body["payments"], "stripe");
}

#[tokio::test]
async fn usage_requires_service_key() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/usage")
        .add_header("x-api-key", "wrong-key")
        .json(&json!({
            "tenant_id": TenantId::generate().to_string(),
            "usage_type": "document_parse",
            "quantity": 1.0
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn service_key_cannot_credit() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;

    let response = harness
        .server
        .post(&format!("/v1/wallets/{tenant}/credit"))
        .add_header("x-admin-key", SERVICE_KEY)
        .json(&json!({ "amount_cents": 1000, "reason": "nope" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
    assert_eq!(harness.balance(tenant).await, 0);
}

// ============================================================================
// Wallets
// ============================================================================

#[tokio::test]
async fn create_wallet_and_read_status() {
    let harness = TestHarness::new();
    let tenant = TenantId::generate();

    let wallet = create_wallet(
        &harness,
        json!({
            "tenant_id": tenant.to_string(),
            "auto_recharge_enabled": true,
            "monthly_spend_cap_cents": 5000
        }),
    )
    .await;
    assert_eq!(wallet["billing_status"], "trial");
    assert_eq!(wallet["balance_cents"], 0);
    assert_eq!(wallet["balance_formatted"], "$0.00");

    let response = harness
        .server
        .get(&format!("/v1/wallets/{tenant}"))
        .add_header("x-api-key", SERVICE_KEY)
        .await;

    response.assert_status_ok();
    let status: Value = response.json();
    assert_eq!(status["billing_status"], "trial");
    assert_eq!(status["auto_recharge_enabled"], true);
    assert_eq!(status["monthly_spend_cap_cents"], 5000);
    assert_eq!(status["current_month_spent_cents"], 0);
    assert_eq!(status["needs_recharge_prompt"], true);
    assert_eq!(status["trial"]["phase"], "no_trial_job_set");
}

#[tokio::test]
async fn create_wallet_twice_conflicts() {
    let harness = TestHarness::new();
    let body = json!({ "tenant_id": TenantId::generate().to_string() });
    create_wallet(&harness, body.clone()).await;

    let response = harness
        .server
        .post("/v1/wallets")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&body)
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_tenant_is_billing_not_initialized() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get(&format!("/v1/wallets/{}", TenantId::generate()))
        .add_header("x-api-key", SERVICE_KEY)
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "billing_not_initialized");
}

#[tokio::test]
async fn malformed_tenant_id_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .get("/v1/wallets/not-a-uuid")
        .add_header("x-api-key", SERVICE_KEY)
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn settings_patch_sets_and_clears_cap() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;
    let path = format!("/v1/wallets/{tenant}/settings");

    let response = harness
        .server
        .patch(&path)
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({ "monthly_spend_cap_cents": 2500, "auto_recharge_enabled": true }))
        .await;
    response.assert_status_ok();
    let wallet: Value = response.json();
    assert_eq!(wallet["monthly_spend_cap_cents"], 2500);
    assert_eq!(wallet["auto_recharge_enabled"], true);

    let response = harness
        .server
        .patch(&path)
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({ "monthly_spend_cap_cents": null }))
        .await;
    response.assert_status_ok();
    let wallet: Value = response.json();
    assert_eq!(wallet["monthly_spend_cap_cents"], Value::Null);
    assert_eq!(wallet["auto_recharge_enabled"], true);
}

#[tokio::test]
async fn negative_cap_is_bad_request() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;

    let response = harness
        .server
        .patch(&format!("/v1/wallets/{tenant}/settings"))
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({ "monthly_spend_cap_cents": -1 }))
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_transition_conflicts() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;

    let response = harness
        .server
        .post(&format!("/v1/wallets/{tenant}/status"))
        .add_header("x-admin-key", ADMIN_KEY)
        .json(&json!({ "status": "past_due" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
}

// ============================================================================
// Usage
// ============================================================================

#[tokio::test]
async fn record_usage_returns_receipt() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;
    credit(&harness, tenant, 1000).await;
    activate(&harness, tenant).await;

    let response = harness
        .server
        .post("/v1/usage")
        .add_header("x-api-key", SERVICE_KEY)
        .add_header("x-service-name", "cv-parser")
        .json(&json!({
            "tenant_id": tenant.to_string(),
            "job_ref": format!("job:{}", JobId::generate()),
            "usage_type": "document_parse",
            "quantity": 2,
            "metadata": { "file": "resume.pdf" }
        }))
        .await;

    response.assert_status_ok();
    let receipt: Value = response.json();
    assert_eq!(receipt["cost_cents"], 100);
    assert_eq!(receipt["entry_type"], "CV_PARSE");
    assert_eq!(receipt["balance_cents"], 900);
    assert_eq!(receipt["trial"]["reason"], "not_in_trial");
}

#[tokio::test]
async fn insufficient_funds_is_payment_required_with_details() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(30, false).await;

    let response = harness
        .server
        .post("/v1/usage")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({
            "tenant_id": tenant.to_string(),
            "usage_type": "document_parse",
            "quantity": 1
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::PAYMENT_REQUIRED);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "insufficient_funds");
    assert_eq!(body["error"]["details"]["balance_cents"], 30);
    assert_eq!(body["error"]["details"]["required_cents"], 50);
}

#[tokio::test]
async fn past_due_is_forbidden() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;
    harness
        .engine
        .wallets
        .transition(tenant, BillingStatus::PastDue)
        .await
        .unwrap();

    let response = harness
        .server
        .post("/v1/usage")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({
            "tenant_id": tenant.to_string(),
            "usage_type": "video_minutes",
            "quantity": 1
        }))
        .await;

    assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
    let body: Value = response.json();
    assert_eq!(body["error"]["code"], "account_blocked");
    assert_eq!(body["error"]["details"]["billing_status"], "past_due");
}

#[tokio::test]
async fn batch_reports_each_event() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(120, false).await;

    let event = json!({
        "tenant_id": tenant.to_string(),
        "usage_type": "document_parse",
        "quantity": 1
    });
    let response = harness
        .server
        .post("/v1/usage/batch")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({ "events": [event.clone(), event.clone(), event] }))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["processed"], 2);
    assert_eq!(body["failed"], 1);
    assert_eq!(body["results"][2]["success"], false);
    assert_eq!(body["results"][2]["error"]["code"], "insufficient_funds");
    assert_eq!(harness.balance(tenant).await, 20);
}

#[tokio::test]
async fn duplicate_event_key_conflicts() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;
    let body = json!({
        "tenant_id": tenant.to_string(),
        "usage_type": "document_parse",
        "quantity": 1,
        "event_key": "cv-123"
    });

    harness
        .server
        .post("/v1/usage")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&body)
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/usage")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&body)
        .await;

    assert_eq!(response.status_code(), StatusCode::CONFLICT);
    let error: Value = response.json();
    assert_eq!(error["error"]["code"], "duplicate_event");
    assert_eq!(harness.balance(tenant).await, 950);
}

#[tokio::test]
async fn draft_usage_moves_to_job() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;
    let draft = DraftRef::generate();
    let job = JobId::generate();

    harness
        .server
        .post("/v1/usage")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({
            "tenant_id": tenant.to_string(),
            "job_ref": format!("draft:{draft}"),
            "usage_type": "question_generation",
            "quantity": 10
        }))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/usage/reconcile")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({
            "tenant_id": tenant.to_string(),
            "draft_ref": draft.to_string(),
            "job_id": job.to_string()
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["moved_events"], 1);

    let response = harness
        .server
        .get(&format!("/v1/usage/jobs/{tenant}/job:{job}"))
        .add_header("x-api-key", SERVICE_KEY)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["total_cost_cents"], 100);
    assert_eq!(body["usage"][0]["usage_type"], "question_generation");
    assert_eq!(body["usage"][0]["event_count"], 1);
}

// ============================================================================
// Ledger and invoices
// ============================================================================

#[tokio::test]
async fn ledger_lists_newest_first_and_audits_clean() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;
    for _ in 0..3 {
        harness
            .server
            .post("/v1/usage")
            .add_header("x-api-key", SERVICE_KEY)
            .json(&json!({
                "tenant_id": tenant.to_string(),
                "usage_type": "document_parse",
                "quantity": 1
            }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .get(&format!("/v1/ledger/{tenant}?limit=2"))
        .add_header("x-api-key", SERVICE_KEY)
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["balance_after_cents"], 850);
    assert_eq!(entries[1]["balance_after_cents"], 900);

    let response = harness
        .server
        .get(&format!("/v1/ledger/{tenant}/audit"))
        .add_header("x-api-key", SERVICE_KEY)
        .await;
    response.assert_status_ok();
    let audit: Value = response.json();
    assert_eq!(audit["consistent"], true);
    assert_eq!(audit["entry_count"], 4);
    assert_eq!(audit["replayed_balance_cents"], 850);
}

#[tokio::test]
async fn statement_generate_list_and_settle() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;
    harness
        .server
        .post("/v1/usage")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({
            "tenant_id": tenant.to_string(),
            "usage_type": "video_minutes",
            "quantity": 2
        }))
        .await
        .assert_status_ok();

    let response = harness
        .server
        .post("/v1/invoices")
        .add_header("x-api-key", SERVICE_KEY)
        .json(&json!({ "tenant_id": tenant.to_string() }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let invoice: Value = response.json();
    assert_eq!(invoice["status"], "pending");
    assert_eq!(invoice["total_cents"], 400);
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let response = harness
        .server
        .get(&format!("/v1/invoices/{tenant}"))
        .add_header("x-api-key", SERVICE_KEY)
        .await;
    response.assert_status_ok();
    let list: Value = response.json();
    assert_eq!(list["invoices"].as_array().unwrap().len(), 1);

    let response = harness
        .server
        .post(&format!("/v1/invoices/{tenant}/{invoice_id}/settle"))
        .add_header("x-admin-key", ADMIN_KEY)
        .json(&json!({ "payment_reference": "wire-42" }))
        .await;
    response.assert_status_ok();
    let paid: Value = response.json();
    assert_eq!(paid["status"], "paid");
    assert_eq!(paid["payment_reference"], "wire-42");

    // Settling twice is a conflict
    let response = harness
        .server
        .post(&format!("/v1/invoices/{tenant}/{invoice_id}/settle"))
        .add_header("x-admin-key", ADMIN_KEY)
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    // Wallet was debited once, by the usage itself
    assert_eq!(harness.balance(tenant).await, 600);
}

#[tokio::test]
async fn unknown_invoice_is_not_found() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;

    let response = harness
        .server
        .get(&format!(
            "/v1/invoices/{tenant}/{}",
            recruit_billing_core::InvoiceId::generate()
        ))
        .add_header("x-api-key", SERVICE_KEY)
        .await;

    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Stripe webhooks
// ============================================================================

#[tokio::test]
async fn payment_failure_webhook_moves_wallet_past_due() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(0, true).await;

    let payload = json!({
        "id": "evt_1",
        "type": "payment_intent.payment_failed",
        "created": 1_700_000_000,
        "data": { "object": { "id": "pi_1", "metadata": { "tenant_id": tenant.to_string() } } }
    })
    .to_string();

    harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", sign(&payload))
        .text(payload)
        .await
        .assert_status_ok();

    let wallet = harness.engine.status.status(tenant).await.unwrap();
    assert_eq!(wallet.billing_status, BillingStatus::PastDue);

    let payload = json!({
        "id": "evt_2",
        "type": "setup_intent.succeeded",
        "data": { "object": { "id": "seti_1", "metadata": { "tenant_id": tenant.to_string() } } }
    })
    .to_string();

    harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", sign(&payload))
        .text(payload)
        .await
        .assert_status_ok();

    let wallet = harness.engine.status.status(tenant).await.unwrap();
    assert_eq!(wallet.billing_status, BillingStatus::Active);
}

#[tokio::test]
async fn webhook_for_trial_wallet_is_acknowledged_and_ignored() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;

    let payload = json!({
        "id": "evt_3",
        "type": "payment_intent.payment_failed",
        "data": { "object": { "metadata": { "tenant_id": tenant.to_string() } } }
    })
    .to_string();

    harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", sign(&payload))
        .text(payload)
        .await
        .assert_status_ok();

    let wallet = harness.engine.status.status(tenant).await.unwrap();
    assert_eq!(wallet.billing_status, BillingStatus::Trial);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_rejected() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(0, false).await;

    let payload = json!({
        "id": "evt_4",
        "type": "payment_intent.payment_failed",
        "data": { "object": { "metadata": { "tenant_id": tenant.to_string() } } }
    })
    .to_string();

    let response = harness
        .server
        .post("/webhooks/stripe")
        .add_header("stripe-signature", "t=1700000000,v1=deadbeef")
        .text(payload)
        .await;

    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let wallet = harness.engine.status.status(tenant).await.unwrap();
    assert_eq!(wallet.billing_status, BillingStatus::Active);
}
