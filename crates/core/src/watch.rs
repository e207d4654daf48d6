//! Watch specifications and their validation.

use crate::duration::serde_secs;
use crate::InstrumentKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Bounds a watch must satisfy before it may be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchLimits {
    pub min_period: Duration,
    pub min_cooldown: Duration,
}

impl Default for WatchLimits {
    fn default() -> Self {
        Self {
            min_period: Duration::from_secs(10),
            min_cooldown: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("symbol must not be empty")]
    EmptySymbol,
    #[error("threshold must be a positive percentage, got {0}")]
    NonPositiveThreshold(f64),
    #[error("period must be at least {min}s, got {got}s")]
    PeriodTooShort { min: u64, got: u64 },
    #[error("cooldown must be at least {min}s, got {got}s")]
    CooldownTooShort { min: u64, got: u64 },
}

/// A user-configured rule: alert when the price of `instrument` moves by at
/// least `threshold_pct` percent over `period`, at most once per `cooldown`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSpec {
    #[serde(flatten)]
    pub instrument: InstrumentKey,
    pub threshold_pct: f64,
    #[serde(rename = "period_seconds", with = "serde_secs")]
    pub period: Duration,
    #[serde(rename = "cooldown_seconds", with = "serde_secs")]
    pub cooldown: Duration,
    #[serde(default, with = "chrono::serde::ts_seconds_option")]
    pub last_alert_at: Option<DateTime<Utc>>,
}

impl WatchSpec {
    /// Build a validated spec. The cooldown timer starts unset.
    pub fn new(
        instrument: InstrumentKey,
        threshold_pct: f64,
        period: Duration,
        cooldown: Duration,
        limits: &WatchLimits,
    ) -> Result<Self, ValidationError> {
        if instrument.symbol().is_empty() {
            return Err(ValidationError::EmptySymbol);
        }
        if !threshold_pct.is_finite() || threshold_pct <= 0.0 {
            return Err(ValidationError::NonPositiveThreshold(threshold_pct));
        }
        if period < limits.min_period {
            return Err(ValidationError::PeriodTooShort {
                min: limits.min_period.as_secs(),
                got: period.as_secs(),
            });
        }
        if cooldown < limits.min_cooldown {
            return Err(ValidationError::CooldownTooShort {
                min: limits.min_cooldown.as_secs(),
                got: cooldown.as_secs(),
            });
        }

        Ok(Self {
            instrument,
            threshold_pct,
            period,
            cooldown,
            last_alert_at: None,
        })
    }
}
