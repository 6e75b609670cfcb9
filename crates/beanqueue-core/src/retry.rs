//! Composable retry policies.
//!
//! A [`RetryPolicy`] maps a task that just failed, plus the number of times it
//! has already been retried, to either a future timestamp (retry then) or
//! `None` (give up, the failure is terminal).

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::error::HandlerError;

/// Decides whether, and when, a failed task should be retried.
///
/// `attempt` is the number of `FAILED_RETRY_SCHEDULED` events already recorded
/// against the task, i.e. `0` on the first failure.
pub trait RetryPolicy: Send + Sync {
    fn next_attempt_at(&self, now: DateTime<Utc>, attempt: u32) -> Option<DateTime<Utc>>;
}

impl<F> RetryPolicy for F
where
    F: Fn(DateTime<Utc>, u32) -> Option<DateTime<Utc>> + Send + Sync,
{
    fn next_attempt_at(&self, now: DateTime<Utc>, attempt: u32) -> Option<DateTime<Utc>> {
        self(now, attempt)
    }
}

/// Decides whether a particular handler failure is eligible for a retry at
/// all, independent of the retry policy's timing.
///
/// A [`HandlerDescriptor`](crate) with a `retry_policy` but no
/// `retry_exceptions` filter retries every failure. With a filter attached,
/// a failure the filter rejects goes straight to `failed` even though a
/// retry policy is configured.
pub trait RetryFilter: Send + Sync {
    fn matches(&self, error: &HandlerError) -> bool;
}

impl<F> RetryFilter for F
where
    F: Fn(&HandlerError) -> bool + Send + Sync,
{
    fn matches(&self, error: &HandlerError) -> bool {
        self(error)
    }
}

/// Always retries after a fixed delay.
pub struct DelayRetry {
    pub delay: std::time::Duration,
}

impl DelayRetry {
    pub fn new(delay: std::time::Duration) -> Self {
        Self { delay }
    }
}

impl RetryPolicy for DelayRetry {
    fn next_attempt_at(&self, now: DateTime<Utc>, _attempt: u32) -> Option<DateTime<Utc>> {
        Some(now + ChronoDuration::from_std(self.delay).unwrap_or(ChronoDuration::zero()))
    }
}

/// Retries with a delay of `base ^ (offset + scalar * (attempt + 1))` seconds.
pub struct ExponentialBackoffRetry {
    pub base: f64,
    pub offset: f64,
    pub scalar: f64,
}

impl ExponentialBackoffRetry {
    pub fn new(base: f64, offset: f64, scalar: f64) -> Self {
        Self {
            base,
            offset,
            scalar,
        }
    }
}

impl Default for ExponentialBackoffRetry {
    fn default() -> Self {
        Self {
            base: 2.0,
            offset: 0.0,
            scalar: 1.0,
        }
    }
}

impl RetryPolicy for ExponentialBackoffRetry {
    fn next_attempt_at(&self, now: DateTime<Utc>, attempt: u32) -> Option<DateTime<Utc>> {
        let exponent = self.offset + self.scalar * (attempt as f64 + 1.0);
        let delay_secs = self.base.powf(exponent);
        let delay = ChronoDuration::milliseconds((delay_secs * 1000.0) as i64);

        Some(now + delay)
    }
}

/// Delegates to `inner`, but gives up once `attempt + 1 >= max`.
pub struct LimitAttempt<P> {
    pub max: u32,
    pub inner: P,
}

impl<P: RetryPolicy> LimitAttempt<P> {
    pub fn new(max: u32, inner: P) -> Self {
        Self { max, inner }
    }
}

impl<P: RetryPolicy> RetryPolicy for LimitAttempt<P> {
    fn next_attempt_at(&self, now: DateTime<Utc>, attempt: u32) -> Option<DateTime<Utc>> {
        if attempt + 1 >= self.max {
            return None;
        }

        self.inner.next_attempt_at(now, attempt)
    }
}
