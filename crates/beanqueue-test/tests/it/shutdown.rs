use std::time::Duration;

use beanqueue::Registry;

#[sqlx::test(migrations = "../beanqueue/migrations")]
async fn worker_shuts_down_promptly_once_asked(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let guard = beanqueue_test::spawn_worker(pool, Registry::new()).await?;

    // Give the worker a moment to finish starting up.
    tokio::time::sleep(Duration::from_millis(200)).await;

    guard.handle().shutdown();

    match tokio::time::timeout(Duration::from_secs(5), guard).await {
        Ok(result) => result,
        Err(_) => panic!("worker did not shut down within 5s of being asked to"),
    }
}
