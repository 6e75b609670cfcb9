//! Ambient "current task" scope, so a handler's producer calls can stamp
//! `parent_id` on tasks they create without threading the parent explicitly.
//!
//! Backed by `tokio::task_local!` rather than a process-wide static: two
//! handler invocations running concurrently on different tokio tasks must
//! never observe each other's current task.

use uuid::Uuid;

tokio::task_local! {
    static CURRENT_TASK_ID: Uuid;
}

/// Run `fut` with `task_id` installed as the current task for the duration
/// of the future, including across every `.await` point and on panic unwind.
pub async fn scope<F, T>(task_id: Uuid, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CURRENT_TASK_ID.scope(task_id, fut).await
}

/// The task id of the handler currently executing on this tokio task, if any.
pub fn current() -> Option<Uuid> {
    CURRENT_TASK_ID.try_with(|id| *id).ok()
}
