//! Stripe integration.
//!
//! Stripe handles:
//! - Off-session captures for auto-recharge
//! - Webhooks that move wallets in and out of `past_due`

pub mod client;
pub mod types;

pub use client::StripeClient;
pub use client::StripeError;
pub use types::*;
