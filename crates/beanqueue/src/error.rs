//! Errors specific to running the worker loop.

pub use beanqueue_core::error::{Error, HandlerError};
