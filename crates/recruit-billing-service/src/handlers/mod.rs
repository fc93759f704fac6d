//! API handlers.

pub mod health;
pub mod invoices;
pub mod ledger;
pub mod usage;
pub mod wallets;
pub mod webhooks;

use std::str::FromStr;

use serde::Deserialize;

use recruit_billing_core::TenantId;

use crate::error::ApiError;

/// Largest page any list endpoint returns.
const MAX_PAGE_SIZE: usize = 200;

/// Pagination query parameters.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Pagination {
    /// Maximum number of items to return (default: 50).
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Offset for pagination (default: 0).
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

impl Pagination {
    /// The limit, clamped to the page size ceiling.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.min(MAX_PAGE_SIZE)
    }
}

/// Parse a tenant id from a path segment.
pub(crate) fn parse_tenant(raw: &str) -> Result<TenantId, ApiError> {
    parse_id(raw, "tenant ID")
}

/// Parse any identifier from a path segment or body field.
pub(crate) fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {what}: {raw}")))
}
