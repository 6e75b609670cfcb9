//! Error types shared across the beanqueue crates.

use uuid::Uuid;

/// Errors that can occur while dispatching, processing, or bookkeeping tasks.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("no processor registered for channel {channel:?}, module {module:?}, func {func_name:?}")]
    MissingHandler {
        channel: String,
        module: String,
        func_name: String,
    },

    #[error("worker {0} is no longer running and cannot continue heartbeating")]
    WorkerNotRunning(Uuid),

    #[error("attempted to use the current-task scope outside of a running handler")]
    NoCurrentTask,
}

/// A handler-side failure, carrying whatever the handler returned as its error.
///
/// This is kept distinct from [`Error`] because a handler failure is an
/// expected, recorded outcome (it feeds the retry policy and is written as a
/// `FAILED` or `FAILED_RETRY_SCHEDULED` event), not a bug in beanqueue itself.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(err.to_string())
    }
}
