//! Applying the bundled migrations to a fresh database, twice, is a no-op
//! the second time.

use beanqueue::migrate::{Migrator, Options, TransactionMode};
use sqlx::PgPool;

#[sqlx::test]
async fn create_tables_migration_is_idempotent(pool: PgPool) -> anyhow::Result<()> {
    let migrator = Migrator::new();
    let mut conn = pool.acquire().await?;

    let options = Options {
        target: migrator.latest(),
        transaction_mode: TransactionMode::Single,
        ..Default::default()
    };

    migrator.migrate(&mut conn, &options).await?;
    migrator.migrate(&mut conn, &options).await?;

    let version = migrator.read_database_version(&mut conn).await?;
    assert_eq!(version, Some(migrator.latest_version()));

    let tables: i64 = sqlx::query_scalar(
        "SELECT count(*) FROM information_schema.tables WHERE table_name = 'bq_tasks'",
    )
    .fetch_one(&mut *conn)
    .await?;
    assert_eq!(tables, 1);

    Ok(())
}
