//! Recruit-Billing metering engine and HTTP API service.
//!
//! This crate wires the pure policies of `recruit-billing-core` to a
//! [`Store`](recruit_billing_store::Store) and a payment provider:
//!
//! - Usage metering with trial gating, spend caps and auto-recharge
//! - Wallet onboarding, settings, status transitions and manual credits
//! - Usage statements and ledger audit
//! - Stripe captures and webhooks
//!
//! # Authentication
//!
//! 1. **Service API key** (`X-API-Key`) - feature code recording usage and
//!    reading billing status
//! 2. **Admin API key** (`X-Admin-Key`) - credits, status changes and
//!    statement settlement

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Handlers need async for the router

pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handlers;
pub mod metering;
pub mod payment;
pub mod routes;
pub mod state;
pub mod stripe;

pub use config::{ConfigError, ServiceConfig};
pub use error::ApiError;
pub use metering::{BillingEngine, EngineSettings, UsageReceipt, UsageRequest};
pub use payment::{CaptureReceipt, CaptureRequest, PaymentError, PaymentProvider};
pub use routes::create_router;
pub use state::AppState;
pub use stripe::{StripeClient, StripeError};
