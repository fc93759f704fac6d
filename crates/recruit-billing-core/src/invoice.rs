//! Invoice types for recruit-billing.
//!
//! Two kinds of invoice exist: a recharge invoice, created by auto-recharge
//! for the standard top-up amount and paid by capturing a payment, and a
//! usage statement, which batches historical usage into line items for a
//! period. Statements describe spend that was already debited from the
//! wallet; they are never captured automatically.
//!
//! Status only moves forward: `pending -> paid` or `pending -> failed`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{format_cents, scale_cents};
use crate::{BillingError, InvoiceId, TenantId, UsageEvent, UsageType};

/// Why an invoice was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    /// Wallet top-up.
    Recharge,

    /// Periodic usage statement.
    UsageStatement,
}

impl InvoiceKind {
    /// Get the kind name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recharge => "recharge",
            Self::UsageStatement => "usage_statement",
        }
    }
}

impl FromStr for InvoiceKind {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recharge" => Ok(Self::Recharge),
            "usage_statement" => Ok(Self::UsageStatement),
            other => Err(BillingError::Serialization(format!(
                "unknown invoice kind: {other}"
            ))),
        }
    }
}

/// Payment status of an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Awaiting payment.
    Pending,

    /// Payment captured.
    Paid,

    /// Payment capture failed or timed out.
    Failed,
}

impl InvoiceStatus {
    /// Get the status name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }

    /// Only pending invoices may change status.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!((self, to), (Self::Pending, Self::Paid | Self::Failed))
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            other => Err(BillingError::Serialization(format!(
                "unknown invoice status: {other}"
            ))),
        }
    }
}

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePeriod {
    /// Inclusive start.
    pub start: DateTime<Utc>,

    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl TimePeriod {
    /// Create a period, rejecting an end before the start.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if `end < start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, BillingError> {
        if end < start {
            return Err(BillingError::InvalidAmount(format!(
                "period end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// A zero-length period at one instant.
    #[must_use]
    pub const fn instant(at: DateTime<Utc>) -> Self {
        Self { start: at, end: at }
    }

    /// Whether `at` falls inside the period.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// One invoice line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Usage type billed, `None` for recharge lines.
    pub usage_type: Option<UsageType>,

    /// Human-readable description.
    pub description: String,

    /// Quantity billed.
    pub quantity: f64,

    /// Unit price in cents.
    pub unit_price_cents: i64,

    /// Line amount in cents.
    pub amount_cents: i64,
}

/// Group priced usage events into line items by usage type and unit price.
///
/// Line amounts are the sum of the costs actually charged, so a statement
/// always agrees with the wallet debits it describes. Trial-free events are
/// skipped.
#[must_use]
pub fn usage_line_items<'a>(events: impl IntoIterator<Item = &'a UsageEvent>) -> Vec<LineItem> {
    let mut groups: BTreeMap<(UsageType, i64), (f64, i64)> = BTreeMap::new();
    for event in events {
        if event.trial_free || event.cost_cents == 0 {
            continue;
        }
        let group = groups
            .entry((event.usage_type, event.unit_price_cents))
            .or_insert((0.0, 0));
        group.0 += event.quantity;
        group.1 += event.cost_cents;
    }

    groups
        .into_iter()
        .map(|((usage_type, unit_price_cents), (quantity, amount_cents))| LineItem {
            usage_type: Some(usage_type),
            description: format!(
                "{} ({} @ {})",
                usage_type.display_name(),
                usage_type.unit_label(),
                format_cents(unit_price_cents)
            ),
            quantity,
            unit_price_cents,
            amount_cents,
        })
        .collect()
}

/// Pass-through tax on a subtotal, rounded to the nearest cent.
#[must_use]
pub fn tax_cents(subtotal_cents: i64, tax_rate: f64) -> i64 {
    scale_cents(tax_rate, subtotal_cents)
}

/// Human-readable, time-coded invoice number.
///
/// The timestamp gives ordering; the suffix is the ULID's full 80-bit
/// random part.
#[must_use]
pub fn invoice_number(id: InvoiceId, at: DateTime<Utc>) -> String {
    let ulid = id.to_string();
    let suffix = &ulid[ulid.len().saturating_sub(ULID_RANDOM_CHARS)..];
    format!("INV-{}-{suffix}", at.format("%Y%m%d-%H%M%S"))
}

/// Crockford base32 characters holding a ULID's random component.
const ULID_RANDOM_CHARS: usize = 16;

/// An invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    /// Invoice ID.
    pub id: InvoiceId,

    /// Unique, human-readable number.
    pub invoice_number: String,

    /// Billed tenant.
    pub tenant_id: TenantId,

    /// Recharge or usage statement.
    pub kind: InvoiceKind,

    /// Payment status.
    pub status: InvoiceStatus,

    /// Sum of line amounts in cents.
    pub subtotal_cents: i64,

    /// Pass-through tax rate (0.0-1.0).
    pub tax_rate: f64,

    /// Tax in cents.
    pub tax_amount_cents: i64,

    /// Subtotal plus tax in cents.
    pub total_cents: i64,

    /// Line items.
    pub line_items: Vec<LineItem>,

    /// Billed period.
    pub time_period: TimePeriod,

    /// Payment-provider reference once paid.
    pub payment_reference: Option<String>,

    /// Why payment failed, if it did.
    pub failure_reason: Option<String>,

    /// When the invoice was created.
    pub created_at: DateTime<Utc>,

    /// When the invoice was paid.
    pub paid_at: Option<DateTime<Utc>>,
}

impl Invoice {
    fn build(
        tenant_id: TenantId,
        kind: InvoiceKind,
        line_items: Vec<LineItem>,
        tax_rate: f64,
        time_period: TimePeriod,
    ) -> Self {
        let id = InvoiceId::generate();
        let created_at = Utc::now();
        let subtotal_cents = line_items.iter().map(|l| l.amount_cents).sum();
        let tax_amount_cents = tax_cents(subtotal_cents, tax_rate);
        Self {
            id,
            invoice_number: invoice_number(id, created_at),
            tenant_id,
            kind,
            status: InvoiceStatus::Pending,
            subtotal_cents,
            tax_rate,
            tax_amount_cents,
            total_cents: subtotal_cents + tax_amount_cents,
            line_items,
            time_period,
            payment_reference: None,
            failure_reason: None,
            created_at,
            paid_at: None,
        }
    }

    /// A pending invoice for a wallet top-up of `amount_cents`.
    ///
    /// Recharges are untaxed: the captured total is exactly what the wallet
    /// is credited.
    #[must_use]
    pub fn recharge(tenant_id: TenantId, amount_cents: i64) -> Self {
        let line = LineItem {
            usage_type: None,
            description: format!("Wallet recharge {}", format_cents(amount_cents)),
            quantity: 1.0,
            unit_price_cents: amount_cents,
            amount_cents,
        };
        Self::build(
            tenant_id,
            InvoiceKind::Recharge,
            vec![line],
            0.0,
            TimePeriod::instant(Utc::now()),
        )
    }

    /// A pending usage statement for `period`.
    #[must_use]
    pub fn usage_statement(
        tenant_id: TenantId,
        period: TimePeriod,
        line_items: Vec<LineItem>,
        tax_rate: f64,
    ) -> Self {
        Self::build(
            tenant_id,
            InvoiceKind::UsageStatement,
            line_items,
            tax_rate,
            period,
        )
    }

    /// Transition pending -> paid.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInvoiceTransition` unless the invoice is pending.
    pub fn mark_paid(&mut self, reference: Option<String>) -> Result<(), BillingError> {
        self.transition(InvoiceStatus::Paid)?;
        self.payment_reference = reference;
        self.paid_at = Some(Utc::now());
        Ok(())
    }

    /// Transition pending -> failed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInvoiceTransition` unless the invoice is pending.
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), BillingError> {
        self.transition(InvoiceStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    fn transition(&mut self, to: InvoiceStatus) -> Result<(), BillingError> {
        if !self.status.can_transition_to(to) {
            return Err(BillingError::InvalidInvoiceTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
