use anyhow::Context;
use beanqueue::{NewTask, UnitOfWork};

use crate::CommonOptions;

#[derive(Debug, clap::Args)]
pub(crate) struct Submit {
    /// The channel a worker must be listening on to pick this task up.
    channel: String,

    /// The dotted module path the handler is registered under.
    module: String,

    /// The handler's registered name.
    func_name: String,

    /// JSON object passed to the handler as `kwargs`. Defaults to `{}`.
    #[arg(long)]
    kwargs: Option<String>,
}

impl Submit {
    pub async fn run(self, options: &CommonOptions) -> anyhow::Result<()> {
        let pool = options.pool().await?;

        let kwargs = match self.kwargs {
            Some(raw) => {
                serde_json::from_str(&raw).context("--kwargs was not a valid json object")?
            }
            None => serde_json::json!({}),
        };

        let task = NewTask {
            channel: self.channel,
            module: self.module,
            func_name: self.func_name,
            kwargs,
            parent_id: None,
        };

        let mut uow = UnitOfWork::begin(&pool).await?;
        let task = task.submit(&mut uow).await?;
        uow.commit().await?;

        println!("submitted task {}", task.id);

        Ok(())
    }
}
