//! Trial eligibility.
//!
//! `TrialGate` is a pure function of the wallet's trial fields and the
//! request. It never mutates anything; instead it returns the
//! [`TrialMutation`] that must be applied atomically together with the usage
//! commit. The storage layer applies that mutation as a conditional update so
//! that two concurrent requests cannot both claim the trial job or both
//! consume the last free interview.

use serde::{Deserialize, Serialize};

use crate::{BillingError, BillingStatus, JobId, JobRef, UsageType, WalletAccount};

/// Interviews on the trial job stay free while the recorded count is at or
/// below this value.
pub const TRIAL_INTERVIEW_LIMIT: u32 = 1;

/// Where a wallet is in its trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum TrialPhase {
    /// Trial status, no job flagged yet.
    NoTrialJobSet,

    /// A trial job is flagged.
    TrialJobActive {
        /// The flagged job.
        job_id: JobId,
        /// Interview usages recorded against it.
        interview_count: u32,
    },

    /// Not (or no longer) eligible.
    Ended,
}

impl TrialPhase {
    /// Read the phase from a wallet.
    #[must_use]
    pub fn of(wallet: &WalletAccount) -> Self {
        if wallet.billing_status != BillingStatus::Trial {
            return Self::Ended;
        }
        match wallet.trial_job_id {
            None => Self::NoTrialJobSet,
            Some(job_id) => Self::TrialJobActive {
                job_id,
                interview_count: wallet.trial_interview_count,
            },
        }
    }
}

/// Why the gate decided what it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialReason {
    /// First tagged request; its job becomes the trial job.
    ClaimsTrialJob,

    /// Request against the trial job within the interview limit.
    TrialJobWithinLimit,

    /// Request against the trial job after the interview limit.
    InterviewLimitReached,

    /// Request against a different job than the trial job.
    DifferentJob,

    /// Request not tagged with a saved job (draft or unattributed).
    NoJobTagged,

    /// Wallet is not in trial status.
    NotInTrial,
}

/// Mutation to apply with the usage commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrialMutation {
    /// Nothing to change.
    None,

    /// Flag `job_id` as the trial job; valid only if no job is flagged yet.
    ClaimJob {
        /// The job to flag.
        job_id: JobId,
        /// Whether the claiming request is itself an interview.
        count_interview: bool,
    },

    /// Increment the interview counter; valid only if it still equals
    /// `expected` and the trial job is still `job_id`.
    CountInterview {
        /// The trial job.
        job_id: JobId,
        /// Counter value observed at evaluation.
        expected: u32,
    },
}

/// Outcome of a trial evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialDecision {
    /// Wallet is still in trial status.
    pub is_in_trial: bool,

    /// The request is free of charge.
    pub is_free_usage: bool,

    /// Explanation.
    pub reason: TrialReason,

    /// Mutation to commit with the usage.
    pub mutation: TrialMutation,
}

impl TrialDecision {
    const fn priced(is_in_trial: bool, reason: TrialReason) -> Self {
        Self {
            is_in_trial,
            is_free_usage: false,
            reason,
            mutation: TrialMutation::None,
        }
    }
}

/// Trial eligibility policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrialGate;

impl TrialGate {
    /// Decide whether a request is free, without side effects.
    #[must_use]
    pub fn evaluate(
        wallet: &WalletAccount,
        job_ref: Option<JobRef>,
        usage_type: UsageType,
    ) -> TrialDecision {
        let job_id = job_ref.and_then(|r| r.job_id());

        match (TrialPhase::of(wallet), job_id) {
            (TrialPhase::Ended, _) => TrialDecision::priced(false, TrialReason::NotInTrial),
            (_, None) => TrialDecision::priced(true, TrialReason::NoJobTagged),
            (TrialPhase::NoTrialJobSet, Some(job_id)) => TrialDecision {
                is_in_trial: true,
                is_free_usage: true,
                reason: TrialReason::ClaimsTrialJob,
                mutation: TrialMutation::ClaimJob {
                    job_id,
                    count_interview: usage_type.is_interview(),
                },
            },
            (
                TrialPhase::TrialJobActive {
                    job_id: trial_job,
                    interview_count,
                },
                Some(job_id),
            ) => {
                if job_id != trial_job {
                    return TrialDecision::priced(true, TrialReason::DifferentJob);
                }
                if interview_count > TRIAL_INTERVIEW_LIMIT {
                    return TrialDecision::priced(true, TrialReason::InterviewLimitReached);
                }
                let mutation = if usage_type.is_interview() {
                    TrialMutation::CountInterview {
                        job_id,
                        expected: interview_count,
                    }
                } else {
                    TrialMutation::None
                };
                TrialDecision {
                    is_in_trial: true,
                    is_free_usage: true,
                    reason: TrialReason::TrialJobWithinLimit,
                    mutation,
                }
            }
        }
    }
}

impl WalletAccount {
    /// Apply a trial mutation if the wallet is still in the state the gate saw.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the trial job was claimed or the interview
    /// counter moved since evaluation.
    pub fn apply_trial_mutation(&mut self, mutation: TrialMutation) -> Result<(), BillingError> {
        match mutation {
            TrialMutation::None => Ok(()),
            TrialMutation::ClaimJob {
                job_id,
                count_interview,
            } => {
                if self.billing_status != BillingStatus::Trial || self.trial_job_id.is_some() {
                    return Err(BillingError::Conflict(format!(
                        "trial job already claimed for tenant {}",
                        self.tenant_id
                    )));
                }
                self.trial_job_id = Some(job_id);
                if count_interview {
                    self.trial_interview_count += 1;
                }
                Ok(())
            }
            TrialMutation::CountInterview { job_id, expected } => {
                if self.billing_status != BillingStatus::Trial
                    || self.trial_job_id != Some(job_id)
                    || self.trial_interview_count != expected
                {
                    return Err(BillingError::Conflict(format!(
                        "trial interview count moved for tenant {}",
                        self.tenant_id
                    )));
                }
                self.trial_interview_count += 1;
                Ok(())
            }
        }
    }
}
