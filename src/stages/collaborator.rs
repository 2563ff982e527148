//! # Collaborator contracts.
//!
//! The runtime owns scheduling, supervision and teardown. What a stage actually *does*
//! lives behind two traits implemented by the user:
//!
//! - [`FetchCollaborator`] produces items for a [`Fetcher`](crate::Fetcher).
//! - [`WorkCollaborator`] transforms items inside a [`Worker`](crate::Worker) and may
//!   name the collaborator of the next worker in a chain.
//!
//! Each collaborator is shared by all instances of its stage, so calls may run
//! concurrently: implementations must be `Send + Sync` and guard their own state.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use gorgeous::{FetchCollaborator, Handled, StageError, WorkCollaborator};
//!
//! struct Greeter;
//!
//! #[async_trait]
//! impl FetchCollaborator<String> for Greeter {
//!     fn name(&self) -> &str { "greeter" }
//!     fn instance_count(&self) -> usize { 2 }
//!     async fn action(&self) -> Result<Option<String>, StageError> {
//!         Ok(Some("hello world".to_string()))
//!     }
//! }
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl WorkCollaborator<String> for Upper {
//!     fn name(&self) -> &str { "upper" }
//!     fn instance_count(&self) -> usize { 1 }
//!     async fn handle_data(&self, item: String) -> Handled<String> {
//!         Handled::ok(item.to_uppercase())
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StageError;

/// Source of items for a fetcher stage.
#[async_trait]
pub trait FetchCollaborator<T: Send + 'static>: Send + Sync + 'static {
    /// Stage name, used in logs, metric tags and events.
    fn name(&self) -> &str;

    /// Number of concurrent instances the fetcher runs.
    fn instance_count(&self) -> usize;

    /// Produces at most one item. `Ok(None)` means nothing was produced this call.
    async fn action(&self) -> Result<Option<T>, StageError>;

    /// Zero: call [`action`](Self::action) back-to-back. Non-zero: once per tick.
    fn interval(&self) -> Duration {
        Duration::ZERO
    }

    /// Called once when the fetcher stops, after every instance has exited.
    async fn close(&self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Outcome of [`WorkCollaborator::handle_data`].
///
/// Both halves are independent: a collaborator may report an error and still
/// produce an item, which is then forwarded as usual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled<T> {
    /// Item for the next worker in the chain, if any.
    pub item: Option<T>,
    /// Advisory error; routed to the worker's error stream and logged.
    pub error: Option<StageError>,
}

impl<T> Handled<T> {
    /// Produced `item`, no error.
    pub fn ok(item: T) -> Self {
        Self {
            item: Some(item),
            error: None,
        }
    }

    /// Nothing produced, no error.
    pub fn empty() -> Self {
        Self {
            item: None,
            error: None,
        }
    }

    /// Nothing produced, `error` raised.
    pub fn failed(error: impl Into<StageError>) -> Self {
        Self {
            item: None,
            error: Some(error.into()),
        }
    }

    /// Produced `item` and raised `error`.
    pub fn partial(item: T, error: impl Into<StageError>) -> Self {
        Self {
            item: Some(item),
            error: Some(error.into()),
        }
    }
}

impl<T> From<Result<T, StageError>> for Handled<T> {
    fn from(res: Result<T, StageError>) -> Self {
        match res {
            Ok(item) => Self::ok(item),
            Err(e) => Self::failed(e),
        }
    }
}

/// Transformation step of a worker stage.
#[async_trait]
pub trait WorkCollaborator<T: Send + 'static>: Send + Sync + 'static {
    /// Stage name, used in logs, metric tags and events.
    fn name(&self) -> &str;

    /// Number of concurrent instances the worker runs.
    fn instance_count(&self) -> usize;

    /// Handles one item.
    async fn handle_data(&self, item: T) -> Handled<T>;

    /// Collaborator of the next worker in the chain, if any.
    fn next(&self) -> Option<Arc<dyn WorkCollaborator<T>>> {
        None
    }

    /// Called once when the worker stops, after every instance has exited.
    async fn close(&self) -> Result<(), StageError> {
        Ok(())
    }
}
