//! Ledger journal types for recruit-billing.
//!
//! Every change to a wallet balance appends exactly one [`LedgerEntry`].
//! Entries are never updated or deleted. Amounts follow a single sign
//! convention: positive = credit (top-up), negative = debit (cost), so that
//! summing every entry of a tenant from zero reproduces the wallet balance.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BillingError, InvoiceId, JobRef, LedgerEntryId, TenantId, UsageEvent, UsageEventId};

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryType {
    /// Priced document parse.
    CvParse,

    /// Priced question generation.
    JdQuestions,

    /// Priced video interview minutes.
    VideoInterview,

    /// Wallet top-up paid through the payment provider.
    AutoRecharge,

    /// Usage made free by the trial gate (zero amount).
    TrialCredit,

    /// Credit granted by an administrator.
    ManualCredit,
}

impl EntryType {
    /// Get the entry type name as stored and exported.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CvParse => "CV_PARSE",
            Self::JdQuestions => "JD_QUESTIONS",
            Self::VideoInterview => "VIDEO_INTERVIEW",
            Self::AutoRecharge => "AUTO_RECHARGE",
            Self::TrialCredit => "TRIAL_CREDIT",
            Self::ManualCredit => "MANUAL_CREDIT",
        }
    }

    /// Whether entries of this type add to the balance.
    #[must_use]
    pub const fn is_credit(&self) -> bool {
        matches!(self, Self::AutoRecharge | Self::ManualCredit)
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CV_PARSE" => Ok(Self::CvParse),
            "JD_QUESTIONS" => Ok(Self::JdQuestions),
            "VIDEO_INTERVIEW" => Ok(Self::VideoInterview),
            "AUTO_RECHARGE" => Ok(Self::AutoRecharge),
            "TRIAL_CREDIT" => Ok(Self::TrialCredit),
            "MANUAL_CREDIT" => Ok(Self::ManualCredit),
            other => Err(BillingError::Serialization(format!(
                "unknown ledger entry type: {other}"
            ))),
        }
    }
}

/// What a ledger entry originated from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LedgerReference {
    /// A recorded usage event.
    UsageEvent(UsageEventId),

    /// A recharge invoice.
    Invoice(InvoiceId),

    /// An external reference supplied by an administrator (ticket, grant id).
    External(String),
}

impl LedgerReference {
    /// Storage discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UsageEvent(_) => "usage_event",
            Self::Invoice(_) => "invoice",
            Self::External(_) => "external",
        }
    }

    /// Storage value.
    #[must_use]
    pub fn value(&self) -> String {
        match self {
            Self::UsageEvent(id) => id.to_string(),
            Self::Invoice(id) => id.to_string(),
            Self::External(reference) => reference.clone(),
        }
    }

    /// Rebuild a reference from its stored discriminator and value.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown kind or a malformed identifier.
    pub fn from_parts(kind: &str, value: &str) -> Result<Self, BillingError> {
        match kind {
            "usage_event" => Ok(Self::UsageEvent(value.parse()?)),
            "invoice" => Ok(Self::Invoice(value.parse()?)),
            "external" => Ok(Self::External(value.to_string())),
            other => Err(BillingError::Serialization(format!(
                "unknown ledger reference kind: {other}"
            ))),
        }
    }
}

/// Balance snapshot taken by a single atomic debit or credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    /// Balance immediately before the operation.
    pub before_cents: i64,

    /// Balance immediately after the operation.
    pub after_cents: i64,
}

impl BalanceChange {
    /// A snapshot where nothing moved.
    #[must_use]
    pub const fn unchanged(balance_cents: i64) -> Self {
        Self {
            before_cents: balance_cents,
            after_cents: balance_cents,
        }
    }

    /// Signed amount applied.
    #[must_use]
    pub const fn delta(&self) -> i64 {
        self.after_cents - self.before_cents
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID (ULID, time-ordered).
    pub id: LedgerEntryId,

    /// The tenant whose wallet changed.
    pub tenant_id: TenantId,

    /// Job or draft the entry relates to, as recorded at write time.
    pub job_ref: Option<JobRef>,

    /// Kind of entry.
    pub entry_type: EntryType,

    /// Human-readable description.
    pub description: String,

    /// Metered quantity, for usage entries.
    pub quantity: Option<f64>,

    /// Unit price in cents, for usage entries.
    pub unit_price_cents: Option<i64>,

    /// Signed amount in cents. Positive = credit, negative = debit.
    pub amount_cents: i64,

    /// Balance before this entry.
    pub balance_before_cents: i64,

    /// Balance after this entry.
    pub balance_after_cents: i64,

    /// Originating usage event, invoice, or external reference.
    pub reference: Option<LedgerReference>,

    /// Additional metadata.
    pub metadata: serde_json::Value,

    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Journal a usage event against the balance change its debit produced.
    ///
    /// Trial-free and other zero-cost events produce a zero-amount entry with
    /// `before == after`.
    #[must_use]
    pub fn for_usage(event: &UsageEvent, change: BalanceChange) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            tenant_id: event.tenant_id,
            job_ref: event.job_ref,
            entry_type: event.entry_type(),
            description: event.ledger_description(),
            quantity: Some(event.quantity),
            unit_price_cents: Some(event.unit_price_cents),
            amount_cents: -event.cost_cents,
            balance_before_cents: change.before_cents,
            balance_after_cents: change.after_cents,
            reference: Some(LedgerReference::UsageEvent(event.id)),
            metadata: event.metadata.clone(),
            created_at: event.created_at,
        }
    }

    /// Journal a credit (top-up or grant).
    #[must_use]
    pub fn for_credit(
        tenant_id: TenantId,
        entry_type: EntryType,
        change: BalanceChange,
        description: String,
        reference: Option<LedgerReference>,
    ) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            tenant_id,
            job_ref: None,
            entry_type,
            description,
            quantity: None,
            unit_price_cents: None,
            amount_cents: change.delta(),
            balance_before_cents: change.before_cents,
            balance_after_cents: change.after_cents,
            reference,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Whether `before + amount == after` holds for this entry.
    #[must_use]
    pub const fn is_balanced(&self) -> bool {
        self.balance_before_cents + self.amount_cents == self.balance_after_cents
    }
}

/// Sum the signed amounts of a tenant's entries from an initial balance of zero.
#[must_use]
pub fn replay<'a>(entries: impl IntoIterator<Item = &'a LedgerEntry>) -> i64 {
    entries.into_iter().map(|e| e.amount_cents).sum()
}

/// A break in the balance chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// The entry whose snapshot does not line up.
    pub entry_id: LedgerEntryId,

    /// What was expected (previous `balance_after`, or `before + amount`).
    pub expected_cents: i64,

    /// What the entry recorded.
    pub actual_cents: i64,
}

/// Result of auditing a tenant's ledger against its wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAudit {
    /// Number of entries examined.
    pub entry_count: usize,

    /// Balance reproduced by replaying every amount from zero.
    pub replayed_balance_cents: i64,

    /// Balance currently held by the wallet.
    pub wallet_balance_cents: i64,

    /// Entries whose snapshots do not chain.
    pub chain_breaks: Vec<ChainBreak>,
}

impl LedgerAudit {
    /// Whether replay matches the wallet and the chain has no gaps.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.replayed_balance_cents == self.wallet_balance_cents && self.chain_breaks.is_empty()
    }
}

/// Audit entries given in creation order against the current wallet balance.
///
/// Checks that each entry's `balance_before` equals the previous entry's
/// `balance_after` (the first entry must start from zero), that each entry is
/// internally balanced, and that replay reproduces `wallet_balance_cents`.
#[must_use]
pub fn audit(entries: &[LedgerEntry], wallet_balance_cents: i64) -> LedgerAudit {
    let mut chain_breaks = Vec::new();
    let mut previous_after = 0;

    for entry in entries {
        if entry.balance_before_cents != previous_after {
            chain_breaks.push(ChainBreak {
                entry_id: entry.id,
                expected_cents: previous_after,
                actual_cents: entry.balance_before_cents,
            });
        }
        if !entry.is_balanced() {
            chain_breaks.push(ChainBreak {
                entry_id: entry.id,
                expected_cents: entry.balance_before_cents + entry.amount_cents,
                actual_cents: entry.balance_after_cents,
            });
        }
        previous_after = entry.balance_after_cents;
    }

    LedgerAudit {
        entry_count: entries.len(),
        replayed_balance_cents: replay(entries),
        wallet_balance_cents,
        chain_breaks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(tenant_id: TenantId, before: i64, amount: i64) -> LedgerEntry {
        LedgerEntry::for_credit(
            tenant_id,
            EntryType::ManualCredit,
            BalanceChange {
                before_cents: before,
                after_cents: before + amount,
            },
            "grant".into(),
            None,
        )
    }

    fn debit(tenant_id: TenantId, before: i64, cost: i64) -> LedgerEntry {
        let event = UsageEvent {
            id: UsageEventId::generate(),
            event_key: None,
            tenant_id,
            job_ref: None,
            usage_type: crate::UsageType::DocumentParse,
            quantity: 1.0,
            unit_price_cents: cost,
            cost_cents: cost,
            trial_free: false,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        };
        LedgerEntry::for_usage(
            &event,
            BalanceChange {
                before_cents: before,
                after_cents: before - cost,
            },
        )
    }

    #[test]
    fn usage_entries_are_negative() {
        let entry = debit(TenantId::generate(), 1000, 50);
        assert_eq!(entry.amount_cents, -50);
        assert_eq!(entry.entry_type, EntryType::CvParse);
        assert!(entry.is_balanced());
        assert!(matches!(
            entry.reference,
            Some(LedgerReference::UsageEvent(_))
        ));
    }

    #[test]
    fn replay_reproduces_balance() {
        let tenant = TenantId::generate();
        let entries = vec![
            credit(tenant, 0, 1000),
            debit(tenant, 1000, 50),
            debit(tenant, 950, 600),
        ];
        assert_eq!(replay(&entries), 350);

        let audit = audit(&entries, 350);
        assert!(audit.is_consistent());
        assert_eq!(audit.entry_count, 3);
    }

    #[test]
    fn audit_detects_gaps_and_drift() {
        let tenant = TenantId::generate();
        let entries = vec![credit(tenant, 0, 1000), debit(tenant, 900, 50)];

        let audit = audit(&entries, 950);
        assert!(!audit.is_consistent());
        assert_eq!(audit.chain_breaks.len(), 1);
        assert_eq!(audit.chain_breaks[0].expected_cents, 1000);
        assert_eq!(audit.chain_breaks[0].actual_cents, 900);
    }

    #[test]
    fn reference_storage_form() {
        let id = InvoiceId::generate();
        let reference = LedgerReference::Invoice(id);
        let rebuilt = LedgerReference::from_parts(reference.kind(), &reference.value()).unwrap();
        assert_eq!(rebuilt, reference);
        assert!(LedgerReference::from_parts("refund", "x").is_err());
    }

    #[test]
    fn entry_type_serializes_screaming_case() {
        let json = serde_json::to_string(&EntryType::TrialCredit).unwrap();
        assert_eq!(json, "\"TRIAL_CREDIT\"");
        assert_eq!("AUTO_RECHARGE".parse::<EntryType>().unwrap(), EntryType::AutoRecharge);
        assert!(EntryType::ManualCredit.is_credit());
        assert!(!EntryType::VideoInterview.is_credit());
    }
}
