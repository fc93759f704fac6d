//! Core types and policies for recruit-billing.
//!
//! This crate provides the foundational types of the usage-metering and
//! wallet-billing engine. It performs no I/O:
//!
//! - **Identifiers**: `TenantId`, `JobId`, `DraftRef`, `UsageEventId`, `LedgerEntryId`, `InvoiceId`
//! - **Wallets**: `WalletAccount`, `BillingStatus`, `WalletSettings`
//! - **Usage**: `UsageType`, `UsageEvent`, `JobRef`, `JobUsage`
//! - **Ledger**: `LedgerEntry`, `EntryType`, replay and audit
//! - **Invoices**: `Invoice`, `LineItem`, `TimePeriod`
//! - **Policies**: `PricingTable`, `TrialGate`, calendar-month windows
//!
//! # Money
//!
//! All amounts are `i64` cents (1 = $0.01). Configuration strings such as
//! `"0.50"` are parsed exactly with [`money::parse_cents`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod error;
pub mod ids;
pub mod invoice;
pub mod ledger;
pub mod money;
pub mod period;
pub mod pricing;
pub mod trial;
pub mod usage;

pub use account::{BillingStatus, WalletAccount, WalletSettings};
pub use error::{BillingError, Result};
pub use ids::{DraftRef, IdError, InvoiceId, JobId, LedgerEntryId, TenantId, UsageEventId};
pub use invoice::{Invoice, InvoiceKind, InvoiceStatus, LineItem, TimePeriod};
pub use ledger::{BalanceChange, EntryType, LedgerAudit, LedgerEntry, LedgerReference};
pub use period::month_window;
pub use pricing::{PricingTable, QUESTIONS_PER_PRICING_UNIT};
pub use trial::{TrialDecision, TrialGate, TrialMutation, TrialPhase, TrialReason};
pub use usage::{validate_quantity, JobRef, JobUsage, UsageEvent, UsageType};
