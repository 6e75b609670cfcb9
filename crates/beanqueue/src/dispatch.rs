//! Atomic task claiming.

use beanqueue_core::Task;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Atomically claim up to `limit` eligible tasks on any of `channels` for
/// `worker_id`.
///
/// Eligible means `state = 'pending'` and (`scheduled_at` is null or
/// `scheduled_at <= now`). Uses `SELECT ... FOR UPDATE SKIP LOCKED` so that
/// concurrent callers never observe the same task: each call only ever sees
/// rows no other in-flight call has already locked.
pub async fn dispatch(
    pool: &PgPool,
    channels: &[String],
    worker_id: Uuid,
    limit: u32,
    now: DateTime<Utc>,
) -> Result<Vec<Task>, sqlx::Error> {
    let limit = i64::from(limit);

    sqlx::query_as::<_, Task>(
        r#"
        WITH selected AS (
            SELECT id
              FROM bq_tasks
             WHERE channel = ANY($1)
               AND state = 'pending'
               AND (scheduled_at IS NULL OR scheduled_at <= $2)
             ORDER BY created_at ASC
             FOR UPDATE SKIP LOCKED
             LIMIT $3
        )
        UPDATE bq_tasks
           SET state = 'processing', worker_id = $4
          FROM selected
         WHERE selected.id = bq_tasks.id
        RETURNING bq_tasks.*
        "#,
    )
    .bind(channels)
    .bind(now)
    .bind(limit)
    .bind(worker_id)
    .fetch_all(pool)
    .await
}
