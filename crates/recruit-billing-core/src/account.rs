//! Wallet account types for recruit-billing.
//!
//! A wallet is created once per tenant at onboarding. Its balance is only
//! ever changed by the storage layer's atomic debit/credit operations, each of
//! which appends exactly one ledger entry. Month-to-date and lifetime spend are
//! not stored here; they are recomputed from usage history on read.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BillingError, JobId, TenantId};

/// A tenant's prepaid wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletAccount {
    /// Owning tenant.
    pub tenant_id: TenantId,

    /// Prepaid balance in cents. Never negative.
    pub balance_cents: i64,

    /// Current billing status.
    pub billing_status: BillingStatus,

    /// Whether an insufficient balance triggers a top-up.
    pub auto_recharge_enabled: bool,

    /// Monthly ceiling on billable spend in cents; `None` means unlimited.
    pub monthly_spend_cap_cents: Option<i64>,

    /// The one job description eligible for free trial usage.
    pub trial_job_id: Option<JobId>,

    /// Number of interview usages recorded against the trial job.
    pub trial_interview_count: u32,

    /// Payment-provider customer used for automatic captures.
    pub payment_customer_id: Option<String>,

    /// When the wallet was created.
    pub created_at: DateTime<Utc>,

    /// When the wallet row was last changed.
    pub updated_at: DateTime<Utc>,
}

impl WalletAccount {
    /// Create a new trial wallet with zero balance.
    #[must_use]
    pub fn new(tenant_id: TenantId, auto_recharge_enabled: bool) -> Self {
        let now = Utc::now();
        Self {
            tenant_id,
            balance_cents: 0,
            billing_status: BillingStatus::Trial,
            auto_recharge_enabled,
            monthly_spend_cap_cents: None,
            trial_job_id: None,
            trial_interview_count: 0,
            payment_customer_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach a payment-provider customer.
    #[must_use]
    pub fn with_payment_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.payment_customer_id = Some(customer_id.into());
        self
    }

    /// Check whether the balance covers a debit.
    #[must_use]
    pub fn has_sufficient_balance(&self, amount_cents: i64) -> bool {
        self.balance_cents >= amount_cents
    }

    /// Whether dashboards should prompt the tenant to recharge.
    ///
    /// Raised for trial wallets that have run dry.
    #[must_use]
    pub fn needs_recharge_prompt(&self) -> bool {
        self.billing_status == BillingStatus::Trial && self.balance_cents <= 0
    }

    /// Apply a settings change to this wallet in memory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` for a negative spend cap.
    pub fn apply_settings(&mut self, settings: &WalletSettings) -> Result<(), BillingError> {
        settings.validate()?;
        if let Some(enabled) = settings.auto_recharge_enabled {
            self.auto_recharge_enabled = enabled;
        }
        if let Some(cap) = settings.monthly_spend_cap_cents {
            self.monthly_spend_cap_cents = cap;
        }
        if let Some(customer) = &settings.payment_customer_id {
            self.payment_customer_id = Some(customer.clone());
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// A partial update of tenant-controlled wallet settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WalletSettings {
    /// New auto-recharge flag.
    #[serde(default)]
    pub auto_recharge_enabled: Option<bool>,

    /// `Some(Some(cap))` sets a cap, `Some(None)` clears it.
    #[serde(default, with = "double_option")]
    pub monthly_spend_cap_cents: Option<Option<i64>>,

    /// New payment-provider customer.
    #[serde(default)]
    pub payment_customer_id: Option<String>,
}

impl WalletSettings {
    /// Validate the requested values.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if a negative cap is requested.
    pub fn validate(&self) -> Result<(), BillingError> {
        if let Some(Some(cap)) = self.monthly_spend_cap_cents {
            if cap < 0 {
                return Err(BillingError::InvalidAmount(format!(
                    "monthly spend cap must not be negative: {cap}"
                )));
            }
        }
        Ok(())
    }
}

/// Distinguishes an absent field from an explicit `null`.
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[allow(clippy::option_option)]
    pub fn serialize<S: Serializer>(value: &Option<Option<i64>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(inner) => inner.serialize(s),
            None => s.serialize_none(),
        }
    }

    #[allow(clippy::option_option)]
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Option<i64>>, D::Error> {
        Option::<i64>::deserialize(d).map(Some)
    }
}

/// Billing status of a wallet.
///
/// Transitions are only performed through [`BillingStatus::transition_to`];
/// `TrialGate`, not this status alone, decides whether usage is free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingStatus {
    /// Newly onboarded, trial rules may apply.
    Trial,

    /// Paying customer in good standing.
    Active,

    /// A payment failed; priced usage is blocked until a payment method is restored.
    PastDue,

    /// Administratively suspended; all metering is blocked.
    Suspended,
}

impl BillingStatus {
    /// Get the status name as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trial => "trial",
            Self::Active => "active",
            Self::PastDue => "past_due",
            Self::Suspended => "suspended",
        }
    }

    /// Check whether a transition is permitted.
    #[must_use]
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Trial, Self::Active | Self::Suspended)
                | (Self::Active, Self::PastDue | Self::Suspended)
                | (Self::PastDue, Self::Active | Self::Suspended)
                | (Self::Suspended, Self::Active)
        )
    }

    /// Validate a transition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStatusTransition` if the transition is not permitted.
    pub fn transition_to(self, to: Self) -> Result<Self, BillingError> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(BillingError::InvalidStatusTransition { from: self, to })
        }
    }

    /// Whether metering that costs money may proceed.
    #[must_use]
    pub const fn allows_priced_usage(self) -> bool {
        matches!(self, Self::Trial | Self::Active)
    }

    /// Whether any metering, including trial-free usage, may proceed.
    #[must_use]
    pub const fn allows_metering(self) -> bool {
        !matches!(self, Self::Suspended)
    }
}

impl fmt::Display for BillingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingStatus {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trial" => Ok(Self::Trial),
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "suspended" => Ok(Self::Suspended),
            other => Err(BillingError::Serialization(format!(
                "unknown billing status: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_wallet_starts_in_trial_with_zero_balance() {
        let wallet = WalletAccount::new(TenantId::generate(), false);
        assert_eq!(wallet.balance_cents, 0);
        assert_eq!(wallet.billing_status, BillingStatus::Trial);
        assert!(wallet.trial_job_id.is_none());
        assert_eq!(wallet.trial_interview_count, 0);
        assert!(wallet.monthly_spend_cap_cents.is_none());
        assert!(wallet.needs_recharge_prompt());
    }

    #[test]
    fn sufficient_balance_is_inclusive() {
        let mut wallet = WalletAccount::new(TenantId::generate(), false);
        wallet.balance_cents = 1000;
        assert!(wallet.has_sufficient_balance(1000));
        assert!(!wallet.has_sufficient_balance(1001));
    }

    #[test]
    fn status_transitions() {
        use BillingStatus::{Active, PastDue, Suspended, Trial};

        assert!(Trial.can_transition_to(Active));
        assert!(Active.can_transition_to(PastDue));
        assert!(PastDue.can_transition_to(Active));
        assert!(Suspended.can_transition_to(Active));

        assert!(!Active.can_transition_to(Trial));
        assert!(!Trial.can_transition_to(PastDue));
        assert!(!Suspended.can_transition_to(PastDue));
        assert!(matches!(
            Active.transition_to(Trial),
            Err(BillingError::InvalidStatusTransition { .. })
        ));
    }

    #[test]
    fn status_gates_metering() {
        assert!(BillingStatus::Trial.allows_priced_usage());
        assert!(BillingStatus::Active.allows_priced_usage());
        assert!(!BillingStatus::PastDue.allows_priced_usage());
        assert!(BillingStatus::PastDue.allows_metering());
        assert!(!BillingStatus::Suspended.allows_metering());
    }

    #[test]
    fn status_string_form_matches_serde() {
        for status in [
            BillingStatus::Trial,
            BillingStatus::Active,
            BillingStatus::PastDue,
            BillingStatus::Suspended,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
            assert_eq!(status.as_str().parse::<BillingStatus>().unwrap(), status);
        }
    }

    #[test]
    fn settings_distinguish_clearing_the_cap_from_leaving_it() {
        let clear: WalletSettings =
            serde_json::from_value(serde_json::json!({ "monthly_spend_cap_cents": null }))
                .unwrap();
        assert_eq!(clear.monthly_spend_cap_cents, Some(None));

        let untouched: WalletSettings =
            serde_json::from_value(serde_json::json!({ "auto_recharge_enabled": true })).unwrap();
        assert_eq!(untouched.monthly_spend_cap_cents, None);

        let mut wallet = WalletAccount::new(TenantId::generate(), false);
        wallet.monthly_spend_cap_cents = Some(500);
        wallet.apply_settings(&untouched).unwrap();
        assert_eq!(wallet.monthly_spend_cap_cents, Some(500));
        assert!(wallet.auto_recharge_enabled);
        wallet.apply_settings(&clear).unwrap();
        assert_eq!(wallet.monthly_spend_cap_cents, None);
    }

    #[test]
    fn negative_cap_is_rejected() {
        let settings = WalletSettings {
            monthly_spend_cap_cents: Some(Some(-1)),
            ..WalletSettings::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(BillingError::InvalidAmount(_))
        ));
    }
}
