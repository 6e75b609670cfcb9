//! A durable, PostgreSQL-backed task queue.
//!
//! Tasks are claimed with `SELECT ... FOR UPDATE SKIP LOCKED` so any number
//! of workers can pull from the same channels without contention, and idle
//! workers wake up via `LISTEN`/`NOTIFY` rather than busy-polling. See
//! [`WorkerBuilder`] to start a worker and [`Registry`] to register the
//! handlers it runs.

pub mod current_task;
pub mod dispatch;
pub mod error;
pub mod flag;
#[cfg(feature = "http")]
pub mod health;
pub mod migrate;
pub mod notify;
pub mod processor;
pub mod producer;
pub mod registry;
mod unit_of_work;
mod util;
mod worker;
pub mod worker_service;

pub use beanqueue_core::{Config, Task, TaskState, Worker as WorkerRow, WorkerState};

pub use self::producer::NewTask;
pub use self::registry::{Handler, HandlerContext, HandlerDescriptor, HandlerFuture, Registry};
pub use self::unit_of_work::UnitOfWork;
pub use self::worker::{Worker, WorkerBuilder, WorkerHandle};
