//! Building and submitting new tasks.

use beanqueue_core::{Task, TaskState};
use serde_json::Value;
use uuid::Uuid;

use crate::current_task;
use crate::registry::HandlerDescriptor;
use crate::unit_of_work::UnitOfWork;

/// An as-yet-unsubmitted task, bound to a registered handler.
///
/// Built by [`HandlerDescriptor::run`]. Its `parent_id` is taken from
/// whatever task is currently executing (see [`current_task`]), if any.
pub struct NewTask {
    pub channel: String,
    pub module: String,
    pub func_name: String,
    pub kwargs: Value,
    pub parent_id: Option<Uuid>,
}

impl HandlerDescriptor {
    /// Build (but do not submit) a task that will invoke this handler with
    /// `kwargs`.
    pub fn run(&self, kwargs: Value) -> NewTask {
        NewTask {
            channel: self.channel.clone(),
            module: self.module.clone(),
            func_name: self.name.clone(),
            kwargs,
            parent_id: current_task::current(),
        }
    }
}

impl NewTask {
    /// Insert this task within `uow` and mark its channel to be notified on
    /// commit. Returns the persisted [`Task`].
    pub async fn submit(self, uow: &mut UnitOfWork<'_>) -> Result<Task, sqlx::Error> {
        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO bq_tasks (id, state, channel, module, func_name, kwargs, parent_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(TaskState::Pending)
        .bind(&self.channel)
        .bind(&self.module)
        .bind(&self.func_name)
        .bind(&self.kwargs)
        .bind(self.parent_id)
        .fetch_one(&mut *uow)
        .await?;

        uow.notify(task.channel.clone());

        Ok(task)
    }
}
