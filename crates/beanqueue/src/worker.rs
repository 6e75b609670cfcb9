//! The worker loop: dispatch, heartbeat, and dead-worker recovery.

use std::sync::Arc;

use anyhow::Context;
use beanqueue_core::{Clock, Config, SystemClock, WorkerState};
use tokio::task::JoinSet;
use tracing::Instrument;
use uuid::Uuid;

use crate::dispatch;
use crate::flag::{ShutdownFlag, ShutdownGuard};
use crate::notify::{EventSource, PgEventSource};
use crate::processor;
use crate::registry::Registry;
use crate::unit_of_work::UnitOfWork;
use crate::worker_service;

struct Shared {
    pool: sqlx::PgPool,
    registry: Arc<Registry>,
    config: Config,
    clock: Arc<dyn Clock>,
    shutdown: ShutdownFlag,
    channels: Vec<String>,
    worker_id: Uuid,
}

pub struct WorkerBuilder {
    pool: sqlx::PgPool,
    registry: Registry,
    config: Config,
    clock: Arc<dyn Clock>,
    name: Option<String>,
    channels: Option<Vec<String>>,
    migrate: bool,
    validate: bool,
}

impl WorkerBuilder {
    pub fn new(pool: sqlx::PgPool, registry: Registry) -> Self {
        Self {
            pool,
            registry,
            config: Config::default(),
            clock: Arc::new(SystemClock),
            name: None,
            channels: None,
            migrate: false,
            validate: true,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Substitutes the worker's view of time. Defaults to [`SystemClock`];
    /// tests can supply one that sleeps faster than real time.
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Channels this worker dispatches tasks from. Defaults to every channel
    /// with at least one registered handler.
    pub fn channels(mut self, channels: Vec<String>) -> Self {
        self.channels = Some(channels);
        self
    }

    /// Whether the database should be migrated to the latest schema on
    /// startup, rather than merely checked against it.
    pub fn migrate(mut self, migrate: bool) -> Self {
        self.migrate = migrate;
        self
    }

    pub fn validate_database(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    pub async fn build(self) -> anyhow::Result<Worker> {
        let migrator = crate::migrate::Migrator::new();
        let mut conn = self.pool.acquire().await?;

        if self.migrate {
            let options = crate::migrate::Options {
                target: migrator.latest(),
                transaction_mode: crate::migrate::TransactionMode::Single,
                ..Default::default()
            };

            migrator
                .migrate(&mut conn, &options)
                .await
                .context("failed to migrate the database")?;
        } else if self.validate {
            let version = migrator.read_database_version(&mut conn).await?.unwrap_or(0);
            let latest = migrator.latest_version();

            if version != latest {
                anyhow::bail!(
                    "database schema version does not match that required by this worker \
                     (expected {latest}, got {version} instead)"
                );
            }
        }

        drop(conn);

        let channels = self.channels.unwrap_or_else(|| self.registry.channels());
        let name = self.name.unwrap_or_else(|| format!("worker-{}", Uuid::new_v4()));
        let worker = worker_service::make_worker(&self.pool, &name, &channels).await?;

        let shared = Arc::new(Shared {
            pool: self.pool,
            registry: Arc::new(self.registry),
            config: self.config,
            clock: self.clock,
            shutdown: ShutdownFlag::new(),
            channels,
            worker_id: worker.id,
        });

        Ok(Worker {
            shared,
            tasks: JoinSet::new(),
        })
    }
}

#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<Shared>,
}

impl WorkerHandle {
    pub fn shutdown(&self) {
        self.shared.shutdown.raise();
    }

    pub fn id(&self) -> Uuid {
        self.shared.worker_id
    }
}

pub struct Worker {
    shared: Arc<Shared>,
    tasks: JoinSet<()>,
}

impl Worker {
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.shared.worker_id
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        let worker_id = self.shared.worker_id;
        tracing::info!(worker_id = %worker_id, channels = ?self.shared.channels, "worker starting up");
        self.shared.shutdown.reset();

        let heartbeat = tokio::spawn(Self::heartbeat_loop(self.shared.clone()));
        let reap = tokio::spawn(Self::reap_loop(self.shared.clone()));

        let result = self
            .dispatch_loop()
            .instrument(tracing::info_span!("worker", worker_id = %worker_id))
            .await;

        self.shared.shutdown.raise();

        tracing::info!("draining in-flight tasks");
        while self.tasks.join_next().await.is_some() {}

        worker_service::mark_shutdown(&self.shared.pool, worker_id).await?;

        let heartbeat = heartbeat.await.context("heartbeat task panicked")?;
        let reap = reap.await.context("dead-worker reaper task panicked")?;

        result?;
        heartbeat?;
        reap?;

        Ok(())
    }

    async fn dispatch_loop(&mut self) -> anyhow::Result<()> {
        let _guard = ShutdownGuard::new(&self.shared.shutdown);
        let mut shutdown = std::pin::pin!(self.shared.shutdown.wait());

        let mut event_source = PgEventSource::connect(&self.shared.pool, &self.shared.channels).await?;

        self.spawn_eligible_tasks().await?;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.as_mut() => break,

                _ = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.spawn_eligible_tasks().await?;
                }

                event = tokio::time::timeout(self.shared.config.poll_timeout, event_source.next()) => {
                    if let Ok(event) = event {
                        event?;
                    }

                    self.spawn_eligible_tasks().await?;
                }
            }
        }

        Ok(())
    }

    async fn spawn_eligible_tasks(&mut self) -> anyhow::Result<()> {
        let available = self
            .shared
            .config
            .batch_size
            .saturating_sub(self.tasks.len() as u32);

        if available == 0 {
            return Ok(());
        }

        let tasks = dispatch::dispatch(
            &self.shared.pool,
            &self.shared.channels,
            self.shared.worker_id,
            available,
            self.shared.clock.now(),
        )
        .await?;

        if !tasks.is_empty() {
            tracing::debug!(count = tasks.len(), "dispatched tasks");
        }

        for task in tasks {
            let pool = self.shared.pool.clone();
            let registry = self.shared.registry.clone();
            let clock = self.shared.clock.clone();

            self.tasks.spawn(async move {
                if let Err(err) = processor::process(&pool, &registry, clock, task).await {
                    tracing::error!(error = %err, "task processing failed");
                }
            });
        }

        Ok(())
    }

    /// Keeps this worker's `last_heartbeat` fresh so peers don't reap it, and
    /// terminates as soon as this worker's own row stops reading `RUNNING` —
    /// another worker may have reaped it as dead while it was still alive.
    async fn heartbeat_loop(shared: Arc<Shared>) -> anyhow::Result<()> {
        let _guard = ShutdownGuard::new(&shared.shutdown);
        let mut shutdown = std::pin::pin!(shared.shutdown.wait());
        let worker_id = shared.worker_id;

        loop {
            let sleep = shared.clock.sleep(shared.config.heartbeat_period);
            tokio::select! {
                biased;

                _ = shutdown.as_mut() => break,
                _ = sleep => {
                    worker_service::update_heartbeat(&shared.pool, worker_id).await?;

                    let worker = worker_service::get_worker(&shared.pool, worker_id).await?;
                    match worker {
                        Some(worker) if worker.state == WorkerState::Running => {}
                        _ => {
                            return Err(beanqueue_core::Error::WorkerNotRunning(worker_id).into());
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Periodically reaps peers that have stopped heartbeating and
    /// reschedules whatever tasks they had checked out.
    async fn reap_loop(shared: Arc<Shared>) -> anyhow::Result<()> {
        let _guard = ShutdownGuard::new(&shared.shutdown);
        let mut shutdown = std::pin::pin!(shared.shutdown.wait());

        loop {
            let sleep = shared.clock.sleep(shared.config.heartbeat_timeout / 2);
            tokio::select! {
                biased;

                _ = shutdown.as_mut() => break,
                _ = sleep => {
                    let dead = worker_service::fetch_dead_workers(
                        &shared.pool,
                        shared.config.heartbeat_timeout,
                        16,
                    )
                    .await?;

                    if dead.is_empty() {
                        continue;
                    }

                    let worker_ids: Vec<Uuid> = dead.iter().map(|w| w.id).collect();
                    tracing::warn!(count = worker_ids.len(), "reaping workers with no heartbeat");

                    let channels = worker_service::reschedule_dead_tasks(&shared.pool, &worker_ids).await?;

                    if !channels.is_empty() {
                        let mut uow = UnitOfWork::begin(&shared.pool).await?;
                        for channel in channels {
                            uow.notify(channel);
                        }
                        uow.commit().await?;
                    }
                }
            }
        }

        Ok(())
    }
}
