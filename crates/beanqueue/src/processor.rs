//! Looks up a handler for a task and runs it inside a savepoint, recording
//! the outcome as a state transition plus an event row.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use beanqueue_core::{Clock, Error, EventType, HandlerError, Task, TaskState};
use futures_util::FutureExt;
use sqlx::PgPool;
use tracing::Instrument;

use crate::current_task;
use crate::registry::{HandlerContext, Registry};
use crate::unit_of_work::UnitOfWork;
use crate::util::MetricSpan;

/// Look up and run the handler for `task`, persisting its outcome.
///
/// On handler success (with `auto_complete` set) the task is marked `done`
/// and a `complete` event is recorded. On failure — including a handler
/// panic, which is caught rather than left to unwind through the task's
/// savepoint — the registered retry policy decides whether the task goes
/// back to `pending` with a future `scheduled_at` (recording a
/// `failed_retry_scheduled` event) or becomes terminally `failed` (recording
/// a `failed` event). A task with no matching handler is immediately marked
/// `failed`.
pub async fn process(
    pool: &PgPool,
    registry: &Registry,
    clock: Arc<dyn Clock>,
    task: Task,
) -> Result<(), sqlx::Error> {
    let span = tracing::info_span!("process_task", task_id = %task.id, channel = %task.channel);

    async {
        let descriptor = registry.lookup(&task.channel, &task.module, &task.func_name);

        let Some(descriptor) = descriptor else {
            let error = Error::MissingHandler {
                channel: task.channel.clone(),
                module: task.module.clone(),
                func_name: task.func_name.clone(),
            };
            tracing::error!(error = %error, "no processor registered for task");

            let mut uow = UnitOfWork::begin(pool).await?;
            fail_terminally(&mut uow, &task, &error.to_string()).await?;
            uow.commit().await?;

            return Ok(());
        };

        let mut uow = UnitOfWork::begin(pool).await?;
        let mut savepoint = uow.begin_nested().await?;

        let kwargs = task.kwargs.clone();
        let _span = MetricSpan::enter(metrics::gauge!("beanqueue_tasks_in_flight"));
        let outcome = AssertUnwindSafe(current_task::scope(task.id, async {
            let ctx = HandlerContext {
                task: &task,
                conn: &mut savepoint,
                kwargs,
            };
            descriptor.handler.call(ctx).await
        }))
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(HandlerError::new(panic_message(&*payload))));
        drop(_span);

        match outcome {
            Ok(result) => {
                savepoint.commit().await?;

                if descriptor.auto_complete {
                    sqlx::query("UPDATE bq_tasks SET state = $1, result = $2 WHERE id = $3")
                        .bind(TaskState::Done)
                        .bind(&result)
                        .bind(task.id)
                        .execute(&mut *uow)
                        .await?;

                    insert_event(&mut uow, task.id, EventType::Complete, None, None).await?;
                }

                uow.commit().await?;
            }
            Err(err) => {
                savepoint.rollback().await?;

                tracing::warn!(error = %err.message, "handler failed");

                let retryable = descriptor
                    .retry_exceptions
                    .as_deref()
                    .map_or(true, |filter| filter.matches(&err));

                match descriptor.retry_policy.as_deref().filter(|_| retryable) {
                    Some(policy) => {
                        let attempt = count_prior_retries(&mut uow, task.id).await?;
                        let now = clock.now();

                        match policy.next_attempt_at(now, attempt) {
                            Some(scheduled_at) => {
                                sqlx::query(
                                    "UPDATE bq_tasks SET state = $1, scheduled_at = $2, worker_id = NULL, error_message = $3 WHERE id = $4",
                                )
                                .bind(TaskState::Pending)
                                .bind(scheduled_at)
                                .bind(&err.message)
                                .bind(task.id)
                                .execute(&mut *uow)
                                .await?;

                                insert_event(
                                    &mut uow,
                                    task.id,
                                    EventType::FailedRetryScheduled,
                                    Some(&err.message),
                                    Some(scheduled_at),
                                )
                                .await?;

                                uow.notify(task.channel.clone());
                            }
                            None => {
                                fail_terminally(&mut uow, &task, &err.message).await?;
                            }
                        }
                    }
                    None => {
                        fail_terminally(&mut uow, &task, &err.message).await?;
                    }
                }

                uow.commit().await?;
            }
        }

        Ok(())
    }
    .instrument(span)
    .await
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else {
        "handler panicked".to_owned()
    }
}

async fn fail_terminally(
    uow: &mut UnitOfWork<'_>,
    task: &Task,
    message: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE bq_tasks SET state = $1, error_message = $2 WHERE id = $3")
        .bind(TaskState::Failed)
        .bind(message)
        .bind(task.id)
        .execute(&mut **uow)
        .await?;

    insert_event(uow, task.id, EventType::Failed, Some(message), None).await
}

async fn insert_event(
    uow: &mut UnitOfWork<'_>,
    task_id: uuid::Uuid,
    event_type: EventType,
    error_message: Option<&str>,
    scheduled_at: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO bq_events (id, type, task_id, error_message, scheduled_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(uuid::Uuid::new_v4())
    .bind(event_type)
    .bind(task_id)
    .bind(error_message)
    .bind(scheduled_at)
    .execute(&mut **uow)
    .await?;

    Ok(())
}

async fn count_prior_retries(
    uow: &mut UnitOfWork<'_>,
    task_id: uuid::Uuid,
) -> Result<u32, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM bq_events WHERE task_id = $1 AND type = $2",
    )
    .bind(task_id)
    .bind(EventType::FailedRetryScheduled)
    .fetch_one(&mut **uow)
    .await?;

    Ok(count as u32)
}
