//! Request and response types for the recruit-billing client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use recruit_billing_core::{
    BillingStatus, DraftRef, EntryType, InvoiceId, JobId, JobRef, JobUsage, LedgerEntryId,
    TenantId, TrialDecision, TrialPhase, UsageEventId, UsageType,
};

/// A usage event to record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordUsage {
    /// Tenant to charge.
    pub tenant_id: TenantId,
    /// Job or draft the usage belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_ref: Option<JobRef>,
    /// What was used.
    pub usage_type: UsageType,
    /// Parses, questions, or minutes.
    pub quantity: f64,
    /// Idempotency key, unique per tenant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_key: Option<String>,
    /// Additional metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl RecordUsage {
    /// Usage not attributed to any job.
    #[must_use]
    pub fn new(tenant_id: TenantId, usage_type: UsageType, quantity: f64) -> Self {
        Self {
            tenant_id,
            job_ref: None,
            usage_type,
            quantity,
            event_key: None,
            metadata: None,
        }
    }

    /// Attribute the usage to a saved job.
    #[must_use]
    pub fn for_job(mut self, job_id: JobId) -> Self {
        self.job_ref = Some(JobRef::Job(job_id));
        self
    }

    /// Attribute the usage to an unsaved draft.
    #[must_use]
    pub fn for_draft(mut self, draft: DraftRef) -> Self {
        self.job_ref = Some(JobRef::Draft(draft));
        self
    }

    /// Make retries of this request safe.
    #[must_use]
    pub fn with_event_key(mut self, key: impl Into<String>) -> Self {
        self.event_key = Some(key.into());
        self
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// What the service recorded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UsageReceipt {
    /// Stored usage event.
    pub event_id: UsageEventId,
    /// Ledger entry written for it.
    pub ledger_entry_id: LedgerEntryId,
    /// Amount charged in cents.
    pub cost_cents: i64,
    /// Ledger entry type.
    pub entry_type: EntryType,
    /// Trial evaluation.
    pub trial: TrialDecision,
    /// Wallet balance after the charge.
    pub balance_cents: i64,
    /// Recharge invoice paid to cover this request, if any.
    #[serde(default)]
    pub recharge_invoice_id: Option<InvoiceId>,
}

/// Batch usage request.
#[derive(Debug, Clone, Serialize)]
pub struct BatchUsageRequest {
    /// Events to record, in order.
    pub events: Vec<RecordUsage>,
}

/// Batch usage response.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchUsageResponse {
    /// Number of events recorded.
    pub processed: usize,
    /// Number of events rejected.
    pub failed: usize,
    /// Per-event results.
    pub results: Vec<BatchUsageResult>,
}

/// Outcome of one batch item.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchUsageResult {
    /// Position in the request.
    pub index: usize,
    /// Whether the event was recorded.
    pub success: bool,
    /// Receipt for recorded events.
    #[serde(default)]
    pub receipt: Option<UsageReceipt>,
    /// Error for rejected events.
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

/// A tenant's billing status.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BillingStatusResponse {
    /// The tenant.
    pub tenant_id: TenantId,
    /// Wallet balance in cents.
    pub wallet_balance_cents: i64,
    /// Billing status.
    pub billing_status: BillingStatus,
    /// Usage cost since the start of the month.
    pub current_month_spent_cents: i64,
    /// Usage cost since onboarding.
    pub total_spent_cents: i64,
    /// Whether auto-recharge is on.
    pub auto_recharge_enabled: bool,
    /// Monthly cap, if any.
    pub monthly_spend_cap_cents: Option<i64>,
    /// Trial progress.
    pub trial: TrialPhase,
    /// Whether to show a recharge prompt.
    pub needs_recharge_prompt: bool,
    /// Start of the month window.
    pub month_start: DateTime<Utc>,
}

/// Per-job usage aggregates.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobUsageResponse {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The job or draft.
    pub job_ref: JobRef,
    /// Aggregates by usage type.
    pub usage: Vec<JobUsage>,
    /// Total cost across usage types.
    pub total_cost_cents: i64,
}

/// Draft reconciliation request.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileRequest {
    /// The tenant.
    pub tenant_id: TenantId,
    /// The draft.
    pub draft_ref: DraftRef,
    /// The saved job.
    pub job_id: JobId,
}

/// Draft reconciliation response.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileResponse {
    /// Number of usage events moved.
    pub moved_events: u64,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}
