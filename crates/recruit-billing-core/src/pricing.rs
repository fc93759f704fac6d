//! Pricing table for recruit-billing.
//!
//! Prices come from static process configuration and are validated once at
//! startup. There is deliberately no `Default`: a process without pricing
//! must not start.

use serde::{Deserialize, Serialize};

use crate::money::checked_scale_cents;
use crate::{BillingError, UsageType};

/// Questions covered by one question-generation price unit.
pub const QUESTIONS_PER_PRICING_UNIT: f64 = 10.0;

/// Unit prices for metered operations, in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingTable {
    /// Cost of parsing one document.
    pub document_parse_cents: i64,

    /// Cost of ten generated questions.
    pub question_batch_cents: i64,

    /// Cost of one video-interview minute.
    pub video_minute_cents: i64,

    /// Amount credited by one auto-recharge.
    pub standard_recharge_cents: i64,
}

impl PricingTable {
    /// Build and validate a pricing table.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if any price is negative or the recharge
    /// amount is not positive.
    pub fn new(
        document_parse_cents: i64,
        question_batch_cents: i64,
        video_minute_cents: i64,
        standard_recharge_cents: i64,
    ) -> Result<Self, BillingError> {
        let table = Self {
            document_parse_cents,
            question_batch_cents,
            video_minute_cents,
            standard_recharge_cents,
        };
        table.validate()?;
        Ok(table)
    }

    /// Check the table's values.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` describing the first invalid value.
    pub fn validate(&self) -> Result<(), BillingError> {
        for usage_type in UsageType::ALL {
            let price = self.unit_price(usage_type);
            if price < 0 {
                return Err(BillingError::Configuration(format!(
                    "price for {usage_type} must not be negative: {price}"
                )));
            }
        }
        if self.standard_recharge_cents <= 0 {
            return Err(BillingError::Configuration(format!(
                "standard recharge amount must be positive: {}",
                self.standard_recharge_cents
            )));
        }
        Ok(())
    }

    /// Unit price in cents for a usage type.
    ///
    /// For question generation the unit is a batch of ten questions.
    #[must_use]
    pub const fn unit_price(&self, usage_type: UsageType) -> i64 {
        match usage_type {
            UsageType::DocumentParse => self.document_parse_cents,
            UsageType::QuestionGeneration => self.question_batch_cents,
            UsageType::VideoMinutes => self.video_minute_cents,
        }
    }

    /// Amount credited by one auto-recharge, in cents.
    #[must_use]
    pub const fn standard_recharge_amount(&self) -> i64 {
        self.standard_recharge_cents
    }

    /// Priced cost of `quantity` units, before trial rules are applied.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` if the cost does not fit in `i64` cents.
    pub fn cost_cents(&self, usage_type: UsageType, quantity: f64) -> Result<i64, BillingError> {
        checked_scale_cents(billable_units(usage_type, quantity), self.unit_price(usage_type))
            .ok_or(BillingError::InvalidQuantity(quantity))
    }
}

/// Convert a raw quantity into pricing units.
#[must_use]
pub fn billable_units(usage_type: UsageType, quantity: f64) -> f64 {
    match usage_type {
        UsageType::QuestionGeneration => quantity / QUESTIONS_PER_PRICING_UNIT,
        UsageType::DocumentParse | UsageType::VideoMinutes => quantity,
    }
}
