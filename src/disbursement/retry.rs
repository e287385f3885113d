//! Failure classification and retry policy
//!
//! Retries are scheduled (next_retry_at) and picked up by the retry worker.
//! Nothing here recurses or sleeps.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SettlementConfig;

/// Canonical class of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum FailureClass {
    /// Retry on the same vendor
    Retryable = 1,
    /// Retry, but route away from the vendor that failed
    ForceSwitch = 2,
    /// Never retried
    Permanent = 3,
    /// Float too low; retried on the long interval without failover
    InsufficientBalance = 4,
    /// Timeout / 5xx / malformed response after in-attempt retries
    Transport = 5,
    /// Vendor code missing from the lookup table: retried, but alerts
    Unclassified = 6,
}

impl FailureClass {
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(FailureClass::Retryable),
            2 => Some(FailureClass::ForceSwitch),
            3 => Some(FailureClass::Permanent),
            4 => Some(FailureClass::InsufficientBalance),
            5 => Some(FailureClass::Transport),
            6 => Some(FailureClass::Unclassified),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Retryable => "RETRYABLE",
            FailureClass::ForceSwitch => "FORCE_SWITCH",
            FailureClass::Permanent => "PERMANENT",
            FailureClass::InsufficientBalance => "INSUFFICIENT_BALANCE",
            FailureClass::Transport => "TRANSPORT",
            FailureClass::Unclassified => "UNCLASSIFIED",
        }
    }

    #[inline]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureClass::Permanent)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAt {
        at: DateTime<Utc>,
        /// Exclude the failed vendor on the next routing decision
        switch_vendor: bool,
        /// Whether the failed attempt counts against `max_attempts`
        charged: bool,
    },
    GiveUp,
}

/// Retry policy for failed settlement attempts
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub insufficient_balance_backoff: Duration,
    /// When false, insufficient-balance retries do not consume attempts
    pub charge_insufficient_balance: bool,
    /// Hard cap on uncharged insufficient-balance retries
    pub max_balance_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(60),
            max_backoff: Duration::from_secs(3600),
            insufficient_balance_backoff: Duration::from_secs(1800),
            charge_insufficient_balance: false,
            max_balance_retries: 24,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SettlementConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_secs(config.base_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            insufficient_balance_backoff: Duration::from_secs(
                config.insufficient_balance_backoff_secs,
            ),
            charge_insufficient_balance: config.charge_insufficient_balance,
            max_balance_retries: config.max_balance_retries,
        }
    }

    /// Decide the follow-up for an attempt that failed with `class`.
    ///
    /// `charged_attempts` counts attempts consumed including the failed one;
    /// `uncharged_retries` counts insufficient-balance retries so far.
    pub fn decide(
        &self,
        class: FailureClass,
        charged_attempts: u32,
        uncharged_retries: u32,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        match class {
            FailureClass::Permanent => RetryDecision::GiveUp,
            FailureClass::InsufficientBalance => {
                let charged = self.charge_insufficient_balance;
                let exhausted = if charged {
                    charged_attempts >= self.max_attempts
                } else {
                    uncharged_retries >= self.max_balance_retries
                };
                if exhausted {
                    RetryDecision::GiveUp
                } else {
                    RetryDecision::RetryAt {
                        at: now + to_chrono(self.insufficient_balance_backoff),
                        switch_vendor: false,
                        charged,
                    }
                }
            }
            _ => {
                if charged_attempts >= self.max_attempts {
                    return RetryDecision::GiveUp;
                }
                RetryDecision::RetryAt {
                    at: now + to_chrono(self.backoff(charged_attempts)),
                    switch_vendor: class == FailureClass::ForceSwitch,
                    charged: true,
                }
            }
        }
    }

    /// Exponential backoff: base * 2^(attempt-1), capped at max_backoff
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff)
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
