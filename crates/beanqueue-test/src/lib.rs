//! Test helpers for spawning a [`beanqueue::Worker`] against a throwaway
//! database and tearing it down cleanly at the end of a test.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use beanqueue::{Registry, WorkerBuilder, WorkerHandle};
use beanqueue_core::{Clock, Config};
use futures_util::FutureExt;
use tokio::task::JoinHandle;

/// Spawn a worker over `registry` against `pool`, using [`Config::default`]
/// with a short poll timeout so tests don't have to wait out the real
/// default.
pub async fn spawn_worker(pool: sqlx::PgPool, registry: Registry) -> anyhow::Result<WorkerGuard> {
    spawn_worker_with(pool, registry, test_config()).await
}

pub async fn spawn_worker_with(
    pool: sqlx::PgPool,
    registry: Registry,
    config: Config,
) -> anyhow::Result<WorkerGuard> {
    let mut worker = WorkerBuilder::new(pool, registry)
        .config(config)
        .validate_database(false)
        .build()
        .await?;

    let handle = worker.handle();
    let id = worker.id();
    let task = tokio::spawn(async move { worker.run().await });

    Ok(WorkerGuard { handle, id, task })
}

/// Like [`spawn_worker_with`], but substitutes `clock` for the worker's view
/// of time instead of [`beanqueue_core::SystemClock`].
pub async fn spawn_worker_with_clock(
    pool: sqlx::PgPool,
    registry: Registry,
    config: Config,
    clock: impl Clock + 'static,
) -> anyhow::Result<WorkerGuard> {
    let mut worker = WorkerBuilder::new(pool, registry)
        .config(config)
        .clock(clock)
        .validate_database(false)
        .build()
        .await?;

    let handle = worker.handle();
    let id = worker.id();
    let task = tokio::spawn(async move { worker.run().await });

    Ok(WorkerGuard { handle, id, task })
}

/// A [`Clock`] whose [`Clock::sleep`] resolves almost immediately regardless
/// of the requested duration, so tests can exercise heartbeat/reap timing
/// without waiting on the wall clock. [`Clock::now`] still reports real time,
/// since tests assert on `scheduled_at`/`last_heartbeat` relative to it.
#[derive(Copy, Clone, Debug, Default)]
pub struct InstantClock;

#[async_trait::async_trait]
impl Clock for InstantClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }

    async fn sleep(&self, _duration: std::time::Duration) {
        tokio::time::sleep(std::time::Duration::from_millis(1)).await
    }
}

/// A [`Config`] tuned for fast test feedback: a short poll timeout (so a
/// missed notification is still noticed quickly) and a heartbeat timeout
/// short enough that dead-worker tests don't need to sleep for a minute.
pub fn test_config() -> Config {
    Config {
        database_url: String::new(),
        poll_timeout: std::time::Duration::from_millis(250),
        heartbeat_period: std::time::Duration::from_millis(100),
        heartbeat_timeout: std::time::Duration::from_millis(500),
        health_server_enabled: false,
        ..Config::default()
    }
}

/// Owns a spawned worker's background task and raises its shutdown flag when
/// dropped, so a test can't leak a worker still polling the database after
/// the test function returns.
pub struct WorkerGuard {
    handle: WorkerHandle,
    id: uuid::Uuid,
    task: JoinHandle<anyhow::Result<()>>,
}

impl WorkerGuard {
    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    pub fn id(&self) -> uuid::Uuid {
        self.id
    }
}

impl Future for WorkerGuard {
    type Output = anyhow::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = std::task::ready!(self.task.poll_unpin(cx));

        Poll::Ready(match result {
            Ok(result) => result,
            Err(e) => match e.try_into_panic() {
                Ok(payload) => std::panic::resume_unwind(payload),
                Err(e) => Err(anyhow::anyhow!(e)),
            },
        })
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

#[ctor::ctor]
fn setup_tracing() {
    use tracing_subscriber::prelude::*;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();
}
