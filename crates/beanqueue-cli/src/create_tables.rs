use anyhow::Context;
use beanqueue::migrate::{Migrator, Options, Target, TransactionMode};

use crate::CommonOptions;

#[derive(Debug, clap::Args)]
pub(crate) struct CreateTables {
    /// Migrate to this version instead of the latest one this binary knows
    /// about. Mostly useful for reverting a bad migration.
    #[arg(long)]
    version: Option<u64>,
}

impl CreateTables {
    pub async fn run(self, options: &CommonOptions) -> anyhow::Result<()> {
        let pool = options.pool().await?;
        let mut conn = pool.acquire().await?;

        let migrator = Migrator::new();
        let target = match self.version {
            Some(version) => Target::Version(version),
            None => migrator.latest(),
        };

        migrator
            .migrate(
                &mut conn,
                &Options {
                    target,
                    transaction_mode: TransactionMode::Single,
                    ..Default::default()
                },
            )
            .await
            .context("failed to migrate the database")?;

        let version = migrator.read_database_version(&mut conn).await?.unwrap_or(0);
        println!("database is now at version {version}");

        Ok(())
    }
}
