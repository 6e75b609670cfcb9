//! Task, Worker, and Event row shapes.
//!
//! These mirror the `bq_tasks`, `bq_workers`, and `bq_events` tables applied by
//! `beanqueue-migrate`. Deserialization uses `sqlx::FromRow` so that callers can
//! fetch full rows with a plain `query_as`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a [`Task`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "bq_task_state", rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Done,
    Failed,
}

/// A unit of work to be picked up and run by some worker.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub state: TaskState,
    pub channel: String,
    pub module: String,
    pub func_name: String,
    pub kwargs: Value,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub worker_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub parent_id: Option<Uuid>,
}

impl Task {
    /// Whether this task is currently eligible for dispatch, given the
    /// instant `now`.
    ///
    /// This mirrors the predicate the dispatch query applies in SQL; it is
    /// exposed here mainly so that tests can assert on it directly.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Pending && self.scheduled_at.map_or(true, |at| at <= now)
    }
}

/// Liveness state of a [`Worker`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "bq_worker_state", rename_all = "lowercase")]
pub enum WorkerState {
    Running,
    Shutdown,
    NoHeartbeat,
}

/// A process competing to claim and run tasks.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Worker {
    pub id: Uuid,
    pub state: WorkerState,
    pub name: String,
    pub channels: Vec<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The kind of lifecycle event recorded against a task.
#[derive(Copy, Clone, Debug, Eq, PartialEq, sqlx::Type)]
#[sqlx(type_name = "bq_event_type", rename_all = "snake_case")]
pub enum EventType {
    Complete,
    Failed,
    FailedRetryScheduled,
}

/// An append-only record of something that happened to a task.
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Event {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    pub event_type: EventType,
    pub task_id: Uuid,
    pub error_message: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
