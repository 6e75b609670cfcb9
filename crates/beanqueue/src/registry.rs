//! Handler registration and lookup.
//!
//! A [`Registry`] is a three-level map, `channel -> module -> name ->
//! HandlerDescriptor`, populated by explicit calls to [`Registry::register`]
//! rather than by scanning packages at runtime — Rust has no equivalent of
//! the reflective package scanner the distilled design used, so the binary
//! author registers handlers by hand, typically all from one `fn
//! register(registry: &mut Registry)` at startup.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use beanqueue_core::{RetryFilter, RetryPolicy, Task};
use serde_json::Value;
use sqlx::PgConnection;

use crate::error::HandlerError;

/// Everything a handler closure needs to do its work.
pub struct HandlerContext<'a> {
    pub task: &'a Task,
    pub conn: &'a mut PgConnection,
    pub kwargs: Value,
}

pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, HandlerError>> + Send + 'a>>;

/// A handler: an async function from a [`HandlerContext`] to a JSON result or
/// a [`HandlerError`].
pub trait Handler: Send + Sync {
    fn call<'a>(&self, ctx: HandlerContext<'a>) -> HandlerFuture<'a>;
}

impl<F> Handler for F
where
    F: for<'a> Fn(HandlerContext<'a>) -> HandlerFuture<'a> + Send + Sync,
{
    fn call<'a>(&self, ctx: HandlerContext<'a>) -> HandlerFuture<'a> {
        self(ctx)
    }
}

/// A registered handler: its routing address plus execution policy.
pub struct HandlerDescriptor {
    pub channel: String,
    pub module: String,
    pub name: String,
    pub auto_complete: bool,
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    /// Restricts `retry_policy` to failures it matches. `None` retries every
    /// failure the policy would otherwise schedule a retry for.
    pub retry_exceptions: Option<Arc<dyn RetryFilter>>,
    pub(crate) handler: Arc<dyn Handler>,
}

impl HandlerDescriptor {
    pub fn new(
        channel: impl Into<String>,
        module: impl Into<String>,
        name: impl Into<String>,
        handler: impl Handler + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            module: module.into(),
            name: name.into(),
            auto_complete: true,
            retry_policy: None,
            retry_exceptions: None,
            handler: Arc::new(handler),
        }
    }

    pub fn auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }

    pub fn retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry_policy = Some(Arc::new(policy));
        self
    }

    /// Only retry a failure that `filter` matches; any other failure is
    /// terminal even if `retry_policy` is set.
    pub fn retry_exceptions(mut self, filter: impl RetryFilter + 'static) -> Self {
        self.retry_exceptions = Some(Arc::new(filter));
        self
    }
}

/// A `channel -> module -> name -> HandlerDescriptor` lookup table.
#[derive(Default, Clone)]
pub struct Registry {
    handlers: HashMap<String, HashMap<String, HashMap<String, Arc<HandlerDescriptor>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: HandlerDescriptor) {
        self.handlers
            .entry(descriptor.channel.clone())
            .or_default()
            .entry(descriptor.module.clone())
            .or_default()
            .insert(descriptor.name.clone(), Arc::new(descriptor));
    }

    pub fn lookup(&self, channel: &str, module: &str, name: &str) -> Option<Arc<HandlerDescriptor>> {
        self.handlers.get(channel)?.get(module)?.get(name).cloned()
    }

    /// All distinct channels with at least one registered handler.
    pub fn channels(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}
