//! Recruit-Billing Client SDK.
//!
//! Feature code uses this crate to tell the billing service that something
//! billable just happened ("a document was parsed") and to read a tenant's
//! billing status.
//!
//! # Example
//!
//! ```no_run
//! use recruit_billing_client::{ClientOptions, RecordUsage, RecruitBillingClient};
//! use recruit_billing_core::{JobId, TenantId, UsageType};
//!
//! # async fn example(tenant_id: TenantId, job_id: JobId) -> Result<(), recruit_billing_client::ClientError> {
//! let client = RecruitBillingClient::with_options(
//!     "http://recruit-billing.billing.svc:8080",
//!     "your-service-api-key",
//!     ClientOptions::with_service_name("cv-parser"),
//! )?;
//!
//! let receipt = client
//!     .record_usage(RecordUsage::new(tenant_id, UsageType::DocumentParse, 1.0).for_job(job_id))
//!     .await?;
//!
//! println!("Charged {} cents, balance {}", receipt.cost_cents, receipt.balance_cents);
//! # Ok(())
//! # }
//! ```
//!
//! Whether a billing rejection should also abort the feature is the
//! caller's decision; [`ClientError::is_billing_rejection`] separates those
//! rejections from transport and server failures.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, RecruitBillingClient};
pub use error::ClientError;
pub use types::*;
