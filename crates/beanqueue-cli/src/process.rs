use beanqueue::{Registry, WorkerBuilder};
use beanqueue_core::Config;

use crate::CommonOptions;

#[derive(Debug, clap::Args)]
pub(crate) struct Process {
    /// Channels to dispatch tasks from. Defaults to every channel with a
    /// registered handler.
    #[arg(long)]
    channel: Vec<String>,

    /// A name to identify this worker by. Defaults to a random id.
    #[arg(long)]
    name: Option<String>,

    /// Migrate the database to the latest schema on startup instead of just
    /// checking it matches.
    #[arg(long)]
    migrate: bool,
}

impl Process {
    pub async fn run(self, options: &CommonOptions) -> anyhow::Result<()> {
        let pool = options.pool().await?;
        let config = Config::from_env().unwrap_or_default();

        // A binary with no handlers registered still starts up and serves
        // /healthz; it simply never has anything eligible to dispatch.
        let registry = Registry::new();

        let mut builder = WorkerBuilder::new(pool.clone(), registry)
            .config(config.clone())
            .migrate(self.migrate);

        if let Some(name) = self.name {
            builder = builder.name(name);
        }
        if !self.channel.is_empty() {
            builder = builder.channels(self.channel);
        }

        let mut worker = builder.build().await?;
        let handle = worker.handle();
        let worker_id = worker.id();

        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received ctrl-c, shutting down");
            handle.shutdown();
        });

        if config.health_server_enabled {
            let pool = pool.clone();
            let interface = config.health_server_interface.clone();
            let port = config.health_server_port;
            tokio::spawn(async move {
                if let Err(err) =
                    beanqueue::health::serve(pool, worker_id, &interface, port, std::future::pending())
                        .await
                {
                    tracing::error!(error = %err, "health endpoint exited with an error");
                }
            });
        }

        tracing::info!("beanqueue worker starting up");
        worker.run().await
    }
}
