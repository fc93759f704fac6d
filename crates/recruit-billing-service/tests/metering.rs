//! Metering engine integration tests.

mod common;

use std::time::Duration;

use common::{test_config, usage, CaptureOutcome, TestHarness};

use recruit_billing_core::{
    BillingError, BillingStatus, DraftRef, EntryType, InvoiceKind, InvoiceStatus, JobId, JobRef,
    TrialPhase, TrialReason, UsageType, WalletSettings,
};
use recruit_billing_store::Store;

// ============================================================================
// Trial gate
// ============================================================================

#[tokio::test]
async fn first_tagged_request_claims_trial_job_for_free() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;
    let job_a = JobId::generate();

    let receipt = harness
        .engine
        .recorder
        .record(usage(tenant, Some(job_a), UsageType::DocumentParse, 1.0))
        .await
        .unwrap();

    assert_eq!(receipt.cost_cents, 0);
    assert_eq!(receipt.entry_type, EntryType::TrialCredit);
    assert!(receipt.trial.is_free_usage);
    assert_eq!(receipt.trial.reason, TrialReason::ClaimsTrialJob);

    let wallet = harness.store.get_wallet(tenant).await.unwrap().unwrap();
    assert_eq!(wallet.trial_job_id, Some(job_a));
    assert_eq!(wallet.balance_cents, 0);
    harness.assert_ledger_consistent(tenant).await;
}

#[tokio::test]
async fn different_job_is_priced_during_trial() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;
    harness.fund(tenant, 1000).await;

    let job_a = JobId::generate();
    let job_b = JobId::generate();
    harness
        .engine
        .recorder
        .record(usage(tenant, Some(job_a), UsageType::DocumentParse, 1.0))
        .await
        .unwrap();

    let receipt = harness
        .engine
        .recorder
        .record(usage(tenant, Some(job_b), UsageType::DocumentParse, 1.0))
        .await
        .unwrap();

    assert_eq!(receipt.cost_cents, 50);
    assert_eq!(receipt.entry_type, EntryType::CvParse);
    assert!(receipt.trial.is_in_trial);
    assert!(!receipt.trial.is_free_usage);
    assert_eq!(receipt.trial.reason, TrialReason::DifferentJob);
    assert_eq!(harness.balance(tenant).await, 950);
}

#[tokio::test]
async fn trial_interviews_are_free_until_limit() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;
    harness.fund(tenant, 1000).await;
    let job = JobId::generate();

    for _ in 0..2 {
        let receipt = harness
            .engine
            .recorder
            .record(usage(tenant, Some(job), UsageType::VideoMinutes, 3.0))
            .await
            .unwrap();
        assert_eq!(receipt.cost_cents, 0);
        assert_eq!(receipt.entry_type, EntryType::TrialCredit);
    }

    let receipt = harness
        .engine
        .recorder
        .record(usage(tenant, Some(job), UsageType::VideoMinutes, 1.5))
        .await
        .unwrap();
    assert_eq!(receipt.cost_cents, 300);
    assert_eq!(receipt.trial.reason, TrialReason::InterviewLimitReached);
    assert_eq!(receipt.entry_type, EntryType::VideoInterview);

    // Non-interview usage on the trial job is priced once the limit is hit
    let receipt = harness
        .engine
        .recorder
        .record(usage(tenant, Some(job), UsageType::DocumentParse, 1.0))
        .await
        .unwrap();
    assert_eq!(receipt.cost_cents, 50);
    harness.assert_ledger_consistent(tenant).await;
}

#[tokio::test]
async fn untagged_trial_usage_is_priced_and_does_not_claim() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;
    harness.fund(tenant, 500).await;

    let receipt = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::QuestionGeneration, 20.0))
        .await
        .unwrap();

    assert_eq!(receipt.cost_cents, 200);
    assert_eq!(receipt.trial.reason, TrialReason::NoJobTagged);

    let wallet = harness.store.get_wallet(tenant).await.unwrap().unwrap();
    assert_eq!(wallet.trial_job_id, None);
}

#[tokio::test]
async fn free_trial_events_are_zero_cost_trial_credits() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;
    let job = JobId::generate();

    for usage_type in [UsageType::DocumentParse, UsageType::QuestionGeneration] {
        harness
            .engine
            .recorder
            .record(usage(tenant, Some(job), usage_type, 10.0))
            .await
            .unwrap();
    }

    let history = harness.store.ledger_history(tenant).await.unwrap();
    assert_eq!(history.len(), 2);
    for entry in &history {
        assert_eq!(entry.amount_cents, 0);
        assert_eq!(entry.entry_type, EntryType::TrialCredit);
    }

    let aggregates = harness
        .store
        .job_usage(tenant, JobRef::Job(job))
        .await
        .unwrap();
    assert_eq!(aggregates.len(), 2);
    assert!(aggregates.iter().all(|a| a.cost_cents == 0));
}

// ============================================================================
// Wallet debits and auto-recharge
// ============================================================================

#[tokio::test]
async fn balance_runs_out_after_twenty_parses() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;

    for _ in 0..20 {
        harness
            .engine
            .recorder
            .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
            .await
            .unwrap();
    }
    assert_eq!(harness.balance(tenant).await, 0);
    let ledger_before = harness.ledger_len(tenant).await;

    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BillingError::InsufficientFunds {
            balance: 0,
            required: 50
        }
    ));
    assert_eq!(harness.balance(tenant).await, 0);
    assert_eq!(harness.ledger_len(tenant).await, ledger_before);
    assert_eq!(harness.payments.captures(), 0);
    harness.assert_ledger_consistent(tenant).await;
}

#[tokio::test]
async fn auto_recharge_covers_the_shortfall_once() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, true).await;

    for _ in 0..20 {
        harness
            .engine
            .recorder
            .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
            .await
            .unwrap();
    }

    let receipt = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
        .await
        .unwrap();

    assert_eq!(receipt.balance_cents, 9950);
    assert_eq!(harness.balance(tenant).await, 9950);
    assert_eq!(harness.payments.captures(), 1);

    let invoice_id = receipt.recharge_invoice_id.expect("recharge invoice");
    let invoice = harness
        .store
        .get_invoice(tenant, invoice_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invoice.kind, InvoiceKind::Recharge);
    assert_eq!(invoice.status, InvoiceStatus::Paid);
    assert_eq!(invoice.total_cents, 10_000);
    assert!(invoice.payment_reference.is_some());

    let history = harness.store.ledger_history(tenant).await.unwrap();
    let recharge = &history[history.len() - 2];
    assert_eq!(recharge.entry_type, EntryType::AutoRecharge);
    assert_eq!(recharge.amount_cents, 10_000);
    assert_eq!(recharge.balance_before_cents, 0);
    harness.assert_ledger_consistent(tenant).await;
}

#[tokio::test]
async fn declined_recharge_fails_without_mutation() {
    let harness = TestHarness::new();
    harness.payments.set(CaptureOutcome::Decline);
    let tenant = harness.active_wallet(30, true).await;
    let ledger_before = harness.ledger_len(tenant).await;

    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::AutoRechargeFailed { .. }));
    assert_eq!(harness.payments.captures(), 1);
    assert_eq!(harness.balance(tenant).await, 30);
    assert_eq!(harness.ledger_len(tenant).await, ledger_before);

    let invoices = harness.store.list_invoices(tenant, 10, 0).await.unwrap();
    assert_eq!(invoices.len(), 1);
    assert_eq!(invoices[0].status, InvoiceStatus::Failed);
    assert!(invoices[0].failure_reason.is_some());
    harness.assert_ledger_consistent(tenant).await;
}

#[tokio::test]
async fn recharge_too_small_for_cost_is_not_captured() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(0, true).await;
    let ledger_before = harness.ledger_len(tenant).await;

    // 60 minutes at $2.00 costs more than one $100.00 recharge
    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::VideoMinutes, 60.0))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::AutoRechargeFailed { .. }));
    assert_eq!(harness.payments.captures(), 0);
    assert_eq!(harness.balance(tenant).await, 0);
    assert_eq!(harness.ledger_len(tenant).await, ledger_before);
    assert!(harness
        .store
        .list_invoices(tenant, 10, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn capture_timeout_counts_as_failure() {
    let mut config = test_config();
    config.payment_capture_timeout = Duration::from_secs(2);
    let harness = TestHarness::with_config(config);
    harness.payments.set(CaptureOutcome::Hang);
    let tenant = harness.active_wallet(0, true).await;

    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
        .await
        .unwrap_err();

    match err {
        BillingError::AutoRechargeFailed { reason } => assert!(reason.contains("timed out")),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(harness.balance(tenant).await, 0);

    let invoices = harness.store.list_invoices(tenant, 10, 0).await.unwrap();
    assert_eq!(invoices[0].status, InvoiceStatus::Failed);
}

#[tokio::test]
async fn concurrent_debits_never_double_spend() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;

    // 12 parses at $0.50 = $6.00 each
    let (a, b) = tokio::join!(
        harness
            .engine
            .recorder
            .record(usage(tenant, None, UsageType::DocumentParse, 12.0)),
        harness
            .engine
            .recorder
            .record(usage(tenant, None, UsageType::DocumentParse, 12.0)),
    );

    let results = [a, b];
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(BillingError::InsufficientFunds { .. }))));
    assert_eq!(harness.balance(tenant).await, 400);
    harness.assert_ledger_consistent(tenant).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_metering_keeps_the_ledger_chained() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(2000, false).await;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let recorder = harness.engine.recorder.clone();
        handles.push(tokio::spawn(async move {
            recorder
                .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 40);
    assert_eq!(harness.balance(tenant).await, 0);
    harness.assert_ledger_consistent(tenant).await;
}

// ============================================================================
// Spend cap
// ============================================================================

async fn capped_tenant(harness: &TestHarness, cap_cents: i64) -> recruit_billing_core::TenantId {
    let tenant = harness.active_wallet(5000, false).await;
    harness
        .engine
        .wallets
        .update_settings(
            tenant,
            &WalletSettings {
                monthly_spend_cap_cents: Some(Some(cap_cents)),
                ..WalletSettings::default()
            },
        )
        .await
        .unwrap();
    tenant
}

#[tokio::test]
async fn spend_cap_rejects_despite_balance() {
    let harness = TestHarness::new();
    let tenant = capped_tenant(&harness, 500).await;

    // 9.6 parses = $4.80
    harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 9.6))
        .await
        .unwrap();
    let ledger_before = harness.ledger_len(tenant).await;

    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BillingError::MonthlySpendCapExceeded {
            cap: 500,
            spent: 480,
            cost: 50
        }
    ));
    assert_eq!(harness.balance(tenant).await, 4520);
    assert_eq!(harness.ledger_len(tenant).await, ledger_before);
}

#[tokio::test]
async fn spend_cap_allows_reaching_the_cap_exactly() {
    let harness = TestHarness::new();
    let tenant = capped_tenant(&harness, 100).await;

    for _ in 0..2 {
        harness
            .engine
            .recorder
            .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
            .await
            .unwrap();
    }

    let status = harness.engine.status.status(tenant).await.unwrap();
    assert_eq!(status.current_month_spent_cents, 100);

    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::MonthlySpendCapExceeded { .. }));
}

#[tokio::test]
async fn spend_cap_does_not_block_free_trial_usage() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;
    harness
        .engine
        .wallets
        .update_settings(
            tenant,
            &WalletSettings {
                monthly_spend_cap_cents: Some(Some(0)),
                ..WalletSettings::default()
            },
        )
        .await
        .unwrap();

    let receipt = harness
        .engine
        .recorder
        .record(usage(tenant, Some(JobId::generate()), UsageType::DocumentParse, 1.0))
        .await
        .unwrap();
    assert_eq!(receipt.cost_cents, 0);
}

// ============================================================================
// Rejections leave nothing behind
// ============================================================================

#[tokio::test]
async fn missing_wallet_is_billing_not_initialized() {
    let harness = TestHarness::new();
    let tenant = recruit_billing_core::TenantId::generate();

    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::BillingNotInitialized { .. }));
}

#[tokio::test]
async fn invalid_quantity_is_rejected() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;

    for quantity in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        let err = harness
            .engine
            .recorder
            .record(usage(tenant, None, UsageType::DocumentParse, quantity))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidQuantity(_)));
    }
    assert_eq!(harness.balance(tenant).await, 1000);
}

#[tokio::test]
async fn unpriceable_quantity_is_rejected_before_recharge() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(0, true).await;

    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 1e300))
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::InvalidQuantity(_)));
    assert_eq!(harness.payments.captures(), 0);
    assert_eq!(harness.balance(tenant).await, 0);
    assert_eq!(harness.ledger_len(tenant).await, 0);
}

#[tokio::test]
async fn repeated_event_key_is_duplicate() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;
    let job = JobId::generate();

    let mut request = usage(tenant, Some(job), UsageType::DocumentParse, 1.0);
    request.event_key = Some("parse-cv-42".into());

    harness.engine.recorder.record(request.clone()).await.unwrap();
    let err = harness.engine.recorder.record(request).await.unwrap_err();

    assert!(matches!(err, BillingError::DuplicateEvent { .. }));
    assert_eq!(harness.balance(tenant).await, 950);

    let aggregates = harness
        .store
        .job_usage(tenant, JobRef::Job(job))
        .await
        .unwrap();
    assert_eq!(aggregates[0].event_count, 1);
}

#[tokio::test]
async fn past_due_blocks_priced_usage() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, true).await;
    harness
        .engine
        .wallets
        .transition(tenant, BillingStatus::PastDue)
        .await
        .unwrap();

    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::DocumentParse, 1.0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BillingError::AccountBlocked {
            status: BillingStatus::PastDue
        }
    ));
    assert_eq!(harness.payments.captures(), 0);
    assert_eq!(harness.balance(tenant).await, 1000);
}

#[tokio::test]
async fn past_due_blocks_priced_usage_that_rounds_to_zero() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;
    harness
        .engine
        .wallets
        .transition(tenant, BillingStatus::PastDue)
        .await
        .unwrap();
    let ledger_before = harness.ledger_len(tenant).await;

    // 0.002 minutes at $2.00 is 0.4 cents, which rounds to nothing
    let err = harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::VideoMinutes, 0.002))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BillingError::AccountBlocked {
            status: BillingStatus::PastDue
        }
    ));
    assert_eq!(harness.ledger_len(tenant).await, ledger_before);
}

#[tokio::test]
async fn suspended_blocks_trial_usage_too() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;
    harness
        .engine
        .wallets
        .transition(tenant, BillingStatus::Suspended)
        .await
        .unwrap();

    let err = harness
        .engine
        .recorder
        .record(usage(tenant, Some(JobId::generate()), UsageType::DocumentParse, 1.0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        BillingError::AccountBlocked {
            status: BillingStatus::Suspended
        }
    ));
    let wallet = harness.store.get_wallet(tenant).await.unwrap().unwrap();
    assert_eq!(wallet.trial_job_id, None);
}

#[tokio::test]
async fn invalid_status_transition_is_rejected() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;

    let err = harness
        .engine
        .wallets
        .transition(tenant, BillingStatus::PastDue)
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::InvalidStatusTransition { .. }));
}

// ============================================================================
// Drafts, status and invoices
// ============================================================================

#[tokio::test]
async fn draft_usage_is_reconciled_to_saved_job() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(1000, false).await;
    let draft = DraftRef::generate();
    let job = JobId::generate();

    for _ in 0..3 {
        let mut request = usage(tenant, None, UsageType::QuestionGeneration, 10.0);
        request.job_ref = Some(JobRef::Draft(draft));
        harness.engine.recorder.record(request).await.unwrap();
    }

    let moved = harness
        .engine
        .recorder
        .reconcile_draft(tenant, draft, job)
        .await
        .unwrap();
    assert_eq!(moved, 3);

    let job_usage = harness
        .store
        .job_usage(tenant, JobRef::Job(job))
        .await
        .unwrap();
    assert_eq!(job_usage.len(), 1);
    assert_eq!(job_usage[0].event_count, 3);
    assert_eq!(job_usage[0].cost_cents, 300);

    let draft_usage = harness
        .store
        .job_usage(tenant, JobRef::Draft(draft))
        .await
        .unwrap();
    assert!(draft_usage.is_empty());

    // Balance and ledger are untouched by reconciliation
    assert_eq!(harness.balance(tenant).await, 700);
    harness.assert_ledger_consistent(tenant).await;
}

#[tokio::test]
async fn billing_status_is_recomputed_from_history() {
    let harness = TestHarness::new();
    let tenant = harness.trial_wallet(false).await;

    let status = harness.engine.status.status(tenant).await.unwrap();
    assert_eq!(status.billing_status, BillingStatus::Trial);
    assert_eq!(status.trial, TrialPhase::NoTrialJobSet);
    assert!(status.needs_recharge_prompt);

    harness.fund(tenant, 1000).await;
    harness
        .engine
        .recorder
        .record(usage(tenant, None, UsageType::VideoMinutes, 2.5))
        .await
        .unwrap();

    let status = harness.engine.status.status(tenant).await.unwrap();
    assert_eq!(status.wallet_balance_cents, 500);
    assert_eq!(status.current_month_spent_cents, 500);
    assert_eq!(status.total_spent_cents, 500);
    assert!(!status.needs_recharge_prompt);
    assert!(!status.auto_recharge_enabled);
    assert_eq!(status.monthly_spend_cap_cents, None);
}

#[tokio::test]
async fn usage_statement_summarizes_without_debiting() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(5000, false).await;

    for (usage_type, quantity) in [
        (UsageType::DocumentParse, 4.0),
        (UsageType::QuestionGeneration, 30.0),
        (UsageType::VideoMinutes, 5.0),
    ] {
        harness
            .engine
            .recorder
            .record(usage(tenant, None, usage_type, quantity))
            .await
            .unwrap();
    }
    let balance = harness.balance(tenant).await;
    assert_eq!(balance, 5000 - 200 - 300 - 1000);

    let invoice = harness.engine.invoices.generate(tenant, None).await.unwrap();
    assert_eq!(invoice.kind, InvoiceKind::UsageStatement);
    assert_eq!(invoice.status, InvoiceStatus::Pending);
    assert_eq!(invoice.line_items.len(), 3);
    assert_eq!(invoice.subtotal_cents, 1500);
    assert_eq!(invoice.total_cents, 1500);
    assert_eq!(harness.balance(tenant).await, balance);

    let paid = harness
        .engine
        .invoices
        .settle_statement(tenant, invoice.id, Some("wire-001".into()))
        .await
        .unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(harness.balance(tenant).await, balance);

    // The next default period starts where this one ended
    let next = harness.engine.invoices.generate(tenant, None).await.unwrap();
    assert_eq!(next.time_period.start, invoice.time_period.end);
    assert!(next.line_items.is_empty());
}

#[tokio::test]
async fn recharge_invoices_cannot_be_settled_manually() {
    let harness = TestHarness::new();
    let tenant = harness.active_wallet(0, true).await;

    let invoice = harness.engine.recharger.recharge(tenant).await.unwrap();
    let err = harness
        .engine
        .invoices
        .settle_statement(tenant, invoice.id, None)
        .await
        .unwrap_err();

    assert!(matches!(err, BillingError::Conflict(_)));
}
