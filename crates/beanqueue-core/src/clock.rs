//! Abstraction over wall-clock time, so that retry-policy and heartbeat math
//! can be tested without sleeping or depending on the real clock.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Controls the process's view of time.
///
/// Production code uses [`SystemClock`], which delegates to `chrono::Utc::now()`
/// and `tokio::time::sleep`. Tests that exercise retry-policy or heartbeat-timeout
/// arithmetic can substitute a fake clock instead of sleeping in real time.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for the given duration.
    async fn sleep(&self, duration: Duration);
}

/// The default clock, backed by the real system time.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}
