use std::time::Duration;

use beanqueue::{HandlerContext, HandlerDescriptor, HandlerFuture, Registry, UnitOfWork};
use beanqueue_core::retry::{DelayRetry, LimitAttempt};
use beanqueue_core::{EventType, TaskState};
use serde_json::json;
use sqlx::PgPool;

fn echo(ctx: HandlerContext<'_>) -> HandlerFuture<'_> {
    Box::pin(async move { Ok(ctx.kwargs.clone()) })
}

fn always_fails(_ctx: HandlerContext<'_>) -> HandlerFuture<'_> {
    Box::pin(async move { Err(beanqueue::error::HandlerError::new("always fails")) })
}

/// Fails on its first attempt, then succeeds once a retry has been recorded.
fn flaky(ctx: HandlerContext<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let attempts: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM bq_events WHERE task_id = $1 AND type = 'failed_retry_scheduled'",
        )
        .bind(ctx.task.id)
        .fetch_one(&mut *ctx.conn)
        .await
        .map_err(|err| beanqueue::error::HandlerError::new(err.to_string()))?;

        if attempts == 0 {
            return Err(beanqueue::error::HandlerError::new("not yet"));
        }

        Ok(json!({"attempts": attempts}))
    })
}

#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn dispatched_task_runs_to_completion(pool: PgPool) -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register(HandlerDescriptor::new("default", "tests", "echo", echo));

    let descriptor = registry.lookup("default", "tests", "echo").unwrap();
    let new_task = descriptor.run(json!({"n": 1}));

    let mut uow = UnitOfWork::begin(&pool).await?;
    let task = new_task.submit(&mut uow).await?;
    uow.commit().await?;

    let _guard = beanqueue_test::spawn_worker(pool.clone(), registry).await?;

    let task = wait_for_state(&pool, task.id, TaskState::Done).await?;
    assert_eq!(task.result, Some(json!({"n": 1})));

    Ok(())
}

#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn task_with_no_registered_handler_fails_immediately(pool: PgPool) -> anyhow::Result<()> {
    let registry = Registry::new();

    let mut uow = UnitOfWork::begin(&pool).await?;
    let task = beanqueue::NewTask {
        channel: "default".to_owned(),
        module: "tests".to_owned(),
        func_name: "missing".to_owned(),
        kwargs: json!({}),
        parent_id: None,
    }
    .submit(&mut uow)
    .await?;
    uow.commit().await?;

    let _guard = beanqueue_test::spawn_worker(pool.clone(), registry).await?;

    let task = wait_for_state(&pool, task.id, TaskState::Failed).await?;
    assert!(task.error_message.unwrap().contains("no processor registered"));

    Ok(())
}

#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn failing_handler_without_retry_policy_fails_terminally(pool: PgPool) -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register(HandlerDescriptor::new(
        "default",
        "tests",
        "always_fails",
        always_fails,
    ));

    let descriptor = registry.lookup("default", "tests", "always_fails").unwrap();
    let mut uow = UnitOfWork::begin(&pool).await?;
    let task = descriptor.run(json!({})).submit(&mut uow).await?;
    uow.commit().await?;

    let _guard = beanqueue_test::spawn_worker(pool.clone(), registry).await?;

    let task = wait_for_state(&pool, task.id, TaskState::Failed).await?;
    assert_eq!(task.error_message.as_deref(), Some("always fails"));

    Ok(())
}

#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn failing_handler_with_retry_policy_eventually_succeeds(pool: PgPool) -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register(
        HandlerDescriptor::new("default", "tests", "flaky", flaky)
            .retry_policy(DelayRetry::new(Duration::from_millis(10))),
    );

    let descriptor = registry.lookup("default", "tests", "flaky").unwrap();
    let mut uow = UnitOfWork::begin(&pool).await?;
    let task = descriptor.run(json!({})).submit(&mut uow).await?;
    uow.commit().await?;

    let _guard = beanqueue_test::spawn_worker(pool.clone(), registry).await?;

    let task = wait_for_state(&pool, task.id, TaskState::Done).await?;
    assert_eq!(task.result, Some(json!({"attempts": 1})));

    Ok(())
}

/// `LimitAttempt(3, DelayRetry(d))` against a handler that always fails:
/// two scheduled retries, then a terminal failure, with the first retry's
/// `scheduled_at` landing close to `submitted_at + d`.
#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn retries_exhausted_then_terminal_failure_records_expected_events(pool: PgPool) -> anyhow::Result<()> {
    let delay = Duration::from_millis(20);

    let mut registry = Registry::new();
    registry.register(
        HandlerDescriptor::new("default", "tests", "always_fails", always_fails)
            .retry_policy(LimitAttempt::new(3, DelayRetry::new(delay))),
    );

    let descriptor = registry.lookup("default", "tests", "always_fails").unwrap();
    let mut uow = UnitOfWork::begin(&pool).await?;
    let task = descriptor.run(json!({})).submit(&mut uow).await?;
    uow.commit().await?;
    let submitted_at = chrono::Utc::now();

    let _guard = beanqueue_test::spawn_worker(pool.clone(), registry).await?;

    let task = wait_for_state(&pool, task.id, TaskState::Failed).await?;
    assert_eq!(task.error_message.as_deref(), Some("always fails"));

    let events: Vec<beanqueue_core::Event> =
        sqlx::query_as("SELECT * FROM bq_events WHERE task_id = $1 ORDER BY created_at ASC")
            .bind(task.id)
            .fetch_all(&pool)
            .await?;

    let retries: Vec<_> = events
        .iter()
        .filter(|event| event.event_type == EventType::FailedRetryScheduled)
        .collect();
    let failures: Vec<_> = events
        .iter()
        .filter(|event| event.event_type == EventType::Failed)
        .collect();

    assert_eq!(retries.len(), 2);
    assert_eq!(failures.len(), 1);

    let first_scheduled_at = retries[0].scheduled_at.expect("retry event records scheduled_at");
    let expected = submitted_at + chrono::Duration::from_std(delay).unwrap();
    assert!(
        (first_scheduled_at - expected).num_milliseconds().abs() < 2_000,
        "scheduled_at {first_scheduled_at} not close to expected {expected}"
    );

    Ok(())
}

/// A `retry_exceptions` filter that rejects the failure makes it terminal
/// even though a `retry_policy` is configured.
#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn retry_exceptions_filter_rejects_non_matching_failures(pool: PgPool) -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register(
        HandlerDescriptor::new("default", "tests", "always_fails", always_fails)
            .retry_policy(DelayRetry::new(Duration::from_millis(10)))
            .retry_exceptions(|error: &beanqueue::error::HandlerError| error.message.contains("timeout")),
    );

    let descriptor = registry.lookup("default", "tests", "always_fails").unwrap();
    let mut uow = UnitOfWork::begin(&pool).await?;
    let task = descriptor.run(json!({})).submit(&mut uow).await?;
    uow.commit().await?;

    let _guard = beanqueue_test::spawn_worker(pool.clone(), registry).await?;

    let task = wait_for_state(&pool, task.id, TaskState::Failed).await?;
    assert_eq!(task.error_message.as_deref(), Some("always fails"));

    let retry_count: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM bq_events WHERE task_id = $1 AND type = 'failed_retry_scheduled'",
    )
    .bind(task.id)
    .fetch_one(&pool)
    .await?;
    assert_eq!(retry_count, 0);

    Ok(())
}

async fn wait_for_state(
    pool: &PgPool,
    task_id: uuid::Uuid,
    expected: TaskState,
) -> anyhow::Result<beanqueue_core::Task> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);

    loop {
        let task = sqlx::query_as::<_, beanqueue_core::Task>("SELECT * FROM bq_tasks WHERE id = $1")
            .bind(task_id)
            .fetch_one(pool)
            .await?;

        if task.state == expected {
            return Ok(task);
        }

        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("task {task_id} did not reach {expected:?} within 10s (currently {:?})", task.state);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
