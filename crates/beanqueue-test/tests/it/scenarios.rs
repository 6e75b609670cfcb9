//! End-to-end scenarios exercising concurrency, scheduling, dead-worker
//! recovery, and task lineage beyond the single-task basics in `basic.rs`.

use std::time::Duration;

use beanqueue::{dispatch, HandlerContext, HandlerDescriptor, HandlerFuture, Registry, UnitOfWork};
use beanqueue_core::{Config, Task, TaskState, WorkerState};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

fn echo(ctx: HandlerContext<'_>) -> HandlerFuture<'_> {
    Box::pin(async move { Ok(ctx.kwargs.clone()) })
}

fn double(ctx: HandlerContext<'_>) -> HandlerFuture<'_> {
    Box::pin(async move {
        let n = ctx.kwargs.get("n").and_then(Value::as_i64).unwrap_or(0);
        Ok(json!({ "n": n * 2 }))
    })
}

fn child(_ctx: HandlerContext<'_>) -> HandlerFuture<'_> {
    Box::pin(async move { Ok(Value::Null) })
}

/// Reduced-scale version of "ten workers, a thousand tasks": five workers
/// racing over the same channel must still run every task exactly once.
#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn many_workers_complete_many_tasks_exactly_once(pool: PgPool) -> anyhow::Result<()> {
    const WORKERS: usize = 5;
    const TASKS: i64 = 200;

    let mut registry = Registry::new();
    registry.register(HandlerDescriptor::new("c", "tests", "double", double));

    let descriptor = registry.lookup("c", "tests", "double").unwrap();
    let mut uow = UnitOfWork::begin(&pool).await?;
    for n in 0..TASKS {
        descriptor.run(json!({ "n": n })).submit(&mut uow).await?;
    }
    uow.commit().await?;

    let mut guards = Vec::with_capacity(WORKERS);
    for _ in 0..WORKERS {
        guards.push(beanqueue_test::spawn_worker(pool.clone(), registry.clone()).await?);
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let remaining: i64 = sqlx::query_scalar("SELECT count(*) FROM bq_tasks WHERE state != 'done'")
            .fetch_one(&pool)
            .await?;

        if remaining == 0 {
            break;
        }

        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("{remaining} of {TASKS} tasks still not done after 30s");
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Exactly one COMPLETE event per task rules out a task being dispatched
    // and successfully completed more than once.
    let complete_events: i64 = sqlx::query_scalar("SELECT count(*) FROM bq_events WHERE type = 'complete'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(complete_events, TASKS);

    drop(guards);
    Ok(())
}

/// `dispatch` must treat `scheduled_at` as relative to the `now` the caller
/// passes in, not the database's own clock.
#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn scheduled_task_is_ineligible_until_its_time_arrives(pool: PgPool) -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register(HandlerDescriptor::new("c", "tests", "echo", echo));

    let descriptor = registry.lookup("c", "tests", "echo").unwrap();
    let mut uow = UnitOfWork::begin(&pool).await?;
    let task = descriptor.run(json!({})).submit(&mut uow).await?;
    uow.commit().await?;

    let now = Utc::now();
    let scheduled_at = now + chrono::Duration::seconds(10);

    sqlx::query("UPDATE bq_tasks SET scheduled_at = $1 WHERE id = $2")
        .bind(scheduled_at)
        .bind(task.id)
        .execute(&pool)
        .await?;

    let worker_id = Uuid::new_v4();
    sqlx::query("INSERT INTO bq_workers (id, name, channels) VALUES ($1, 'probe', '{c}')")
        .bind(worker_id)
        .execute(&pool)
        .await?;

    let channels = vec!["c".to_owned()];

    let claimed_now = dispatch::dispatch(&pool, &channels, worker_id, 10, now).await?;
    assert!(claimed_now.is_empty());

    let claimed_later = dispatch::dispatch(&pool, &channels, worker_id, 10, scheduled_at).await?;
    assert_eq!(claimed_later.len(), 1);
    assert_eq!(claimed_later[0].id, task.id);

    Ok(())
}

/// A task checked out by a worker that stops heartbeating is reclaimed by a
/// survivor and completed — at-least-once, not lost.
#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn dead_workers_tasks_are_reclaimed_and_completed_by_a_survivor(pool: PgPool) -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register(HandlerDescriptor::new("c", "tests", "echo", echo));

    let dead_worker_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO bq_workers (id, name, channels, last_heartbeat) \
         VALUES ($1, 'dead', '{c}', now() - interval '1 hour')",
    )
    .bind(dead_worker_id)
    .execute(&pool)
    .await?;

    let descriptor = registry.lookup("c", "tests", "echo").unwrap();
    let mut uow = UnitOfWork::begin(&pool).await?;
    let task = descriptor.run(json!({ "ok": true })).submit(&mut uow).await?;
    uow.commit().await?;

    sqlx::query("UPDATE bq_tasks SET state = 'processing', worker_id = $1 WHERE id = $2")
        .bind(dead_worker_id)
        .bind(task.id)
        .execute(&pool)
        .await?;

    let config = Config {
        heartbeat_timeout: Duration::from_millis(50),
        ..beanqueue_test::test_config()
    };

    let _guard =
        beanqueue_test::spawn_worker_with_clock(pool.clone(), registry, config, beanqueue_test::InstantClock)
            .await?;

    let task = wait_for_state(&pool, task.id, TaskState::Done).await?;
    assert_eq!(task.result, Some(json!({ "ok": true })));

    let dead_worker_state: WorkerState = sqlx::query_scalar("SELECT state FROM bq_workers WHERE id = $1")
        .bind(dead_worker_id)
        .fetch_one(&pool)
        .await?;
    assert_eq!(dead_worker_state, WorkerState::NoHeartbeat);

    Ok(())
}

/// A handler that spawns a child task via its descriptor's `.run()` stamps
/// the child's `parent_id` with its own task id.
#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn handler_spawned_child_task_records_correct_parent_lineage(pool: PgPool) -> anyhow::Result<()> {
    let mut registry = Registry::new();
    registry.register(HandlerDescriptor::new("c", "tests", "child", child));

    let child_descriptor = registry.lookup("c", "tests", "child").unwrap();
    let parent_handler = move |ctx: HandlerContext<'_>| -> HandlerFuture<'_> {
        let child_descriptor = child_descriptor.clone();
        Box::pin(async move {
            let new_task = child_descriptor.run(json!({}));

            sqlx::query(
                "INSERT INTO bq_tasks (id, state, channel, module, func_name, kwargs, parent_id) \
                 VALUES ($1, 'pending', $2, $3, $4, $5, $6)",
            )
            .bind(Uuid::new_v4())
            .bind(&new_task.channel)
            .bind(&new_task.module)
            .bind(&new_task.func_name)
            .bind(&new_task.kwargs)
            .bind(new_task.parent_id)
            .execute(&mut *ctx.conn)
            .await
            .map_err(|err| beanqueue::error::HandlerError::new(err.to_string()))?;

            Ok(Value::Null)
        })
    };
    registry.register(HandlerDescriptor::new("c", "tests", "parent", parent_handler));

    let descriptor = registry.lookup("c", "tests", "parent").unwrap();
    let mut uow = UnitOfWork::begin(&pool).await?;
    let parent_task = descriptor.run(json!({})).submit(&mut uow).await?;
    uow.commit().await?;

    let _guard = beanqueue_test::spawn_worker(pool.clone(), registry).await?;

    let parent_task = wait_for_state(&pool, parent_task.id, TaskState::Done).await?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    let child_task = loop {
        let rows: Vec<Task> = sqlx::query_as("SELECT * FROM bq_tasks WHERE parent_id = $1")
            .bind(parent_task.id)
            .fetch_all(&pool)
            .await?;

        if let Some(child_task) = rows.into_iter().next() {
            break child_task;
        }

        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("no child task appeared for parent {}", parent_task.id);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert_eq!(child_task.parent_id, Some(parent_task.id));

    Ok(())
}

async fn wait_for_state(pool: &PgPool, task_id: Uuid, expected: TaskState) -> anyhow::Result<Task> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);

    loop {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM bq_tasks WHERE id = $1")
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
