//! Data model, configuration, and retry-policy primitives shared between the
//! `beanqueue` worker runtime and the `beanqueue-cli` binary.

pub mod clock;
pub mod config;
pub mod error;
mod interval;
pub mod model;
pub mod retry;

pub use self::clock::{Clock, SystemClock};
pub use self::config::Config;
pub use self::error::Error;
pub use self::interval::IntoPgInterval;
pub use self::model::{Event, EventType, Task, TaskState, Worker, WorkerState};
pub use self::retry::{RetryFilter, RetryPolicy};
