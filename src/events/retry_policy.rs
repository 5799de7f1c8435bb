//! Retry policy for failed dispatches.
//!
//! Implements exponential (or fixed) backoff with configurable parameters.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use clap::ValueEnum;

use super::error::HandlerError;
use super::models::EventRecord;
use crate::config::EventQueueSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffStrategy {
    /// `base * multiplier^retry_count`, capped
    Exponential,
    /// Always `base`
    Fixed,
}

/// What to do with a record whose dispatch just failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Back to PENDING, due again at `next_attempt_at`.
    Retry {
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Terminal.
    Fail { retry_count: u32 },
}

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Backoff seed when the handler declares no retry delay.
    pub initial_backoff: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Multiplier applied to backoff after each retry.
    pub backoff_multiplier: f64,
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    /// Create a new RetryPolicy from configuration settings.
    pub fn new(settings: &EventQueueSettings) -> Self {
        Self {
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            backoff_multiplier: settings.backoff_multiplier,
            strategy: settings.backoff_strategy,
        }
    }

    /// Backoff after `retry_count` earlier failures, seeded by the handler's
    /// `retry_delay` when it has one.
    pub fn backoff(&self, retry_count: u32, retry_delay: Option<Duration>) -> Duration {
        let base = retry_delay.unwrap_or(self.initial_backoff);
        match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => {
                let exponent = retry_count.min(i32::MAX as u32) as i32;
                let backoff = base.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
                let capped = backoff.min(self.max_backoff.as_millis() as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
        }
    }

    /// Decide the outcome of a failed attempt on `record`.
    ///
    /// The failed attempt counts toward `retry_count`; once the count reaches
    /// `max_retries`, or the handler declares the failure permanent, the record fails.
    pub fn decide(
        &self,
        record: &EventRecord,
        error: &HandlerError,
        retry_delay: Option<Duration>,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        let attempts = record.retry_count.saturating_add(1);
        if !error.should_retry || attempts >= record.max_retries {
            return RetryDecision::Fail {
                retry_count: attempts.min(record.max_retries),
            };
        }

        let delay = error
            .retry_after
            .unwrap_or_else(|| self.backoff(record.retry_count, retry_delay));
        let next_attempt_at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        RetryDecision::Retry {
            retry_count: attempts,
            next_attempt_at,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&EventQueueSettings::default())
    }
}
