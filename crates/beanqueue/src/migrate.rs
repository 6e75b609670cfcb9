//! Schema migrations for the beanqueue tables.

use beanqueue_migrate::Table;

use self::migrations::MIGRATIONS;

mod migrations {
    include!(concat!(env!("OUT_DIR"), "/migrations.rs"));
}

#[doc(inline)]
pub use beanqueue_migrate::{
    DivergingMigrationError, Error, ErrorKind, Options, Target, TransactionMode,
};

/// A migrator pre-loaded with the `bq_tasks`/`bq_workers`/`bq_events` schema.
pub struct Migrator(beanqueue_migrate::Migrator);

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Migrator {
    pub const fn new() -> Self {
        Self(MIGRATIONS)
    }

    /// A [`Target`] pointing at the latest version this build of beanqueue
    /// knows how to migrate to.
    pub fn latest(&self) -> Target {
        Target::Version(self.latest_version())
    }

    pub fn latest_version(&self) -> u64 {
        self.0.latest().unwrap()
    }

    /// Apply migrations to the database.
    ///
    /// Follows `options`, except that the migration bookkeeping table is
    /// always pinned to `bq.migrations` — changing that would make beanqueue
    /// forget every previously applied migration.
    pub async fn migrate(
        &self,
        conn: &mut sqlx::PgConnection,
        options: &Options,
    ) -> Result<(), Error> {
        let mut options = options.clone();
        options.migration_table = Table::new("bq", "migrations");

        self.0.run(conn, &options).await
    }

    pub async fn read_database_version(
        &self,
        conn: &mut sqlx::PgConnection,
    ) -> Result<Option<u64>, Error> {
        let table = Table::new("bq", "migrations");
        self.0.read_database_version(conn, &table).await
    }
}
