//! Worker registration, heartbeats, and dead-worker recovery.

use beanqueue_core::{IntoPgInterval, Worker};
use sqlx::PgPool;
use uuid::Uuid;

/// Insert a new worker row in the `running` state and return it.
pub async fn make_worker(
    pool: &PgPool,
    name: &str,
    channels: &[String],
) -> Result<Worker, sqlx::Error> {
    sqlx::query_as::<_, Worker>(
        r#"
        INSERT INTO bq_workers (id, name, channels)
        VALUES ($1, $2, $3)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(channels)
    .fetch_one(pool)
    .await
}

pub async fn get_worker(pool: &PgPool, id: Uuid) -> Result<Option<Worker>, sqlx::Error> {
    sqlx::query_as::<_, Worker>("SELECT * FROM bq_workers WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Update `worker`'s heartbeat timestamp to the database's current time.
pub async fn update_heartbeat(pool: &PgPool, worker_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE bq_workers SET last_heartbeat = now() WHERE id = $1")
        .bind(worker_id)
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn mark_shutdown(pool: &PgPool, worker_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE bq_workers SET state = 'shutdown' WHERE id = $1")
        .bind(worker_id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Atomically find up to `limit` workers that haven't heartbeated within
/// `timeout`, mark them `no_heartbeat`, and return the updated rows.
///
/// Uses `SKIP LOCKED` so that multiple surviving workers running this check
/// concurrently never both "declare dead" (and then double-reschedule tasks
/// for) the same peer.
pub async fn fetch_dead_workers(
    pool: &PgPool,
    timeout: std::time::Duration,
    limit: u32,
) -> Result<Vec<Worker>, sqlx::Error> {
    let limit = i64::from(limit);

    sqlx::query_as::<_, Worker>(
        r#"
        WITH selected AS (
            SELECT id
              FROM bq_workers
             WHERE last_heartbeat < now() - $1::interval
               AND state = 'running'
             FOR UPDATE SKIP LOCKED
             LIMIT $2
        )
        UPDATE bq_workers
           SET state = 'no_heartbeat'
          FROM selected
         WHERE selected.id = bq_workers.id
        RETURNING bq_workers.*
        "#,
    )
    .bind(timeout.into_pg_interval())
    .bind(limit)
    .fetch_all(pool)
    .await
}

/// Reset every `processing` task owned by any of `worker_ids` back to
/// `pending` with no owner.
///
/// Returns the distinct set of channels that had a task rescheduled, so the
/// caller can notify them and wake a surviving worker onto the freed tasks.
pub async fn reschedule_dead_tasks(
    pool: &PgPool,
    worker_ids: &[Uuid],
) -> Result<Vec<String>, sqlx::Error> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        WITH rescheduled AS (
            UPDATE bq_tasks
               SET state = 'pending', worker_id = NULL
             WHERE worker_id = ANY($1)
               AND state = 'processing'
            RETURNING channel
        )
        SELECT DISTINCT channel FROM rescheduled
        "#,
    )
    .bind(worker_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(channel,)| channel).collect())
}
