//! Usage event types for recruit-billing.
//!
//! A usage event is one metered operation: a document parse, a batch of
//! generated questions, or minutes of video interview. Events are immutable
//! once written, except that a draft reference may be re-pointed to the saved
//! job exactly once (see [`JobRef`]).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::IdError;
use crate::{BillingError, DraftRef, EntryType, JobId, TenantId, UsageEventId};

/// The three priced operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageType {
    /// Parsing a candidate document (CV/resume).
    DocumentParse,

    /// Generating screening questions, priced per group of ten.
    QuestionGeneration,

    /// Minutes of AI video interview.
    VideoMinutes,
}

impl UsageType {
    /// All usage types, in display order.
    pub const ALL: [Self; 3] = [
        Self::DocumentParse,
        Self::QuestionGeneration,
        Self::VideoMinutes,
    ];

    /// Get the usage type name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DocumentParse => "document_parse",
            Self::QuestionGeneration => "question_generation",
            Self::VideoMinutes => "video_minutes",
        }
    }

    /// Ledger entry type for a priced event of this kind.
    #[must_use]
    pub const fn entry_type(&self) -> EntryType {
        match self {
            Self::DocumentParse => EntryType::CvParse,
            Self::QuestionGeneration => EntryType::JdQuestions,
            Self::VideoMinutes => EntryType::VideoInterview,
        }
    }

    /// Whether each event of this kind counts as one interview for trial limits.
    #[must_use]
    pub const fn is_interview(&self) -> bool {
        matches!(self, Self::VideoMinutes)
    }

    /// Human-readable pricing unit, used on invoices.
    #[must_use]
    pub const fn unit_label(&self) -> &'static str {
        match self {
            Self::DocumentParse => "per document",
            Self::QuestionGeneration => "per 10 questions",
            Self::VideoMinutes => "per minute",
        }
    }

    /// Human-readable name.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::DocumentParse => "Document parsing",
            Self::QuestionGeneration => "Question generation",
            Self::VideoMinutes => "Video interview",
        }
    }
}

impl fmt::Display for UsageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document_parse" => Ok(Self::DocumentParse),
            "question_generation" => Ok(Self::QuestionGeneration),
            "video_minutes" => Ok(Self::VideoMinutes),
            other => Err(BillingError::Serialization(format!(
                "unknown usage type: {other}"
            ))),
        }
    }
}

/// What a usage event is attributed to.
///
/// Usage produced while a job description is still a draft is recorded
/// against a [`DraftRef`]; once the job is saved the reference is rewritten
/// to the [`JobId`] by a single reconciliation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JobRef {
    /// A saved job description.
    Job(JobId),

    /// An unsaved draft.
    Draft(DraftRef),
}

impl JobRef {
    /// The saved job, if this reference points at one.
    #[must_use]
    pub const fn job_id(&self) -> Option<JobId> {
        match self {
            Self::Job(id) => Some(*id),
            Self::Draft(_) => None,
        }
    }

    /// Whether this is a draft reference.
    #[must_use]
    pub const fn is_draft(&self) -> bool {
        matches!(self, Self::Draft(_))
    }
}

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Job(id) => write!(f, "job:{id}"),
            Self::Draft(id) => write!(f, "draft:{id}"),
        }
    }
}

impl FromStr for JobRef {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("job", id)) => Ok(Self::Job(id.parse()?)),
            Some(("draft", id)) => Ok(Self::Draft(id.parse()?)),
            _ => Err(IdError::InvalidJobRef(s.to_string())),
        }
    }
}

impl TryFrom<String> for JobRef {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JobRef> for String {
    fn from(job_ref: JobRef) -> Self {
        job_ref.to_string()
    }
}

impl From<JobId> for JobRef {
    fn from(id: JobId) -> Self {
        Self::Job(id)
    }
}

impl From<DraftRef> for JobRef {
    fn from(id: DraftRef) -> Self {
        Self::Draft(id)
    }
}

/// A recorded usage event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Event identifier, referenced from the ledger.
    pub id: UsageEventId,

    /// Caller-supplied idempotency key, unique per tenant.
    pub event_key: Option<String>,

    /// The tenant being metered.
    pub tenant_id: TenantId,

    /// Job or draft the usage belongs to; `None` for unattributed usage.
    pub job_ref: Option<JobRef>,

    /// What was used.
    pub usage_type: UsageType,

    /// Parses, questions, or minutes.
    pub quantity: f64,

    /// Unit price in cents at the time of recording.
    pub unit_price_cents: i64,

    /// Charged amount in cents; zero for trial-free usage.
    pub cost_cents: i64,

    /// Whether the trial gate made this event free.
    pub trial_free: bool,

    /// Free-form context (file size, token counts, interview duration, ...).
    pub metadata: serde_json::Value,

    /// When the usage was recorded.
    pub created_at: DateTime<Utc>,
}

impl UsageEvent {
    /// Ledger entry type for this event.
    #[must_use]
    pub const fn entry_type(&self) -> EntryType {
        if self.trial_free {
            EntryType::TrialCredit
        } else {
            self.usage_type.entry_type()
        }
    }

    /// Description written to the ledger.
    #[must_use]
    pub fn ledger_description(&self) -> String {
        let subject = self
            .job_ref
            .map_or_else(|| "unattributed".to_string(), |r| r.to_string());
        let what = match self.usage_type {
            UsageType::DocumentParse => format!("{} document parse(s)", self.quantity),
            UsageType::QuestionGeneration => format!("{} generated question(s)", self.quantity),
            UsageType::VideoMinutes => format!("{} video interview minute(s)", self.quantity),
        };
        if self.trial_free {
            format!("Trial: {what} for {subject}")
        } else {
            format!("{what} for {subject}")
        }
    }
}

/// Validate a metered quantity.
///
/// # Errors
///
/// Returns `InvalidQuantity` for non-finite or non-positive values.
pub fn validate_quantity(quantity: f64) -> Result<(), BillingError> {
    if quantity.is_finite() && quantity > 0.0 {
        Ok(())
    } else {
        Err(BillingError::InvalidQuantity(quantity))
    }
}

/// Running usage totals for one job (or draft) and usage type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUsage {
    /// The job or draft.
    pub job_ref: JobRef,

    /// The usage type.
    pub usage_type: UsageType,

    /// Number of events recorded.
    pub event_count: u64,

    /// Summed quantity.
    pub quantity: f64,

    /// Summed cost in cents.
    pub cost_cents: i64,
}

impl JobUsage {
    /// Start a new aggregate from a single event.
    #[must_use]
    pub fn from_event(job_ref: JobRef, event: &UsageEvent) -> Self {
        Self {
            job_ref,
            usage_type: event.usage_type,
            event_count: 1,
            quantity: event.quantity,
            cost_cents: event.cost_cents,
        }
    }

    /// Fold another event into this aggregate.
    pub fn add_event(&mut self, event: &UsageEvent) {
        self.event_count += 1;
        self.quantity += event.quantity;
        self.cost_cents += event.cost_cents;
    }

    /// Fold another aggregate of the same usage type into this one.
    pub fn merge(&mut self, other: &Self) {
        self.event_count += other.event_count;
        self.quantity += other.quantity;
        self.cost_cents += other.cost_cents;
    }
}
