//! # Supervised run-loop body.
//!
//! A [`Routine`] is what a slot supervisor launches: a named, fallible, cancelable
//! future factory. Each attempt calls [`Routine::spawn`] again, so a restarted slot
//! starts from a fresh future instead of resuming a poisoned one.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;

/// Boxed future returned by [`Routine::spawn`].
pub type BoxRoutineFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

/// Shared handle to a routine.
pub type RoutineRef = Arc<dyn Routine>;

/// # Asynchronous, cancelable, restartable unit.
///
/// Implementations should return:
/// - `Ok(())` or `Err(TaskError::Canceled)` once `ctx` is cancelled,
/// - `Err(TaskError::Fail { .. })` to ask the supervisor for a restart.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use gorgeous::{BoxRoutineFuture, Routine};
///
/// struct Idle;
///
/// impl Routine for Idle {
///     fn name(&self) -> &str { "idle" }
///
///     fn spawn(&self, ctx: CancellationToken) -> BoxRoutineFuture {
///         Box::pin(async move {
///             ctx.cancelled().await;
///             Ok(())
///         })
///     }
/// }
/// ```
pub trait Routine: Send + Sync + 'static {
    /// Returns a stable, human-readable name (used as the stage label in events).
    fn name(&self) -> &str;

    /// Creates the future for one attempt.
    fn spawn(&self, ctx: CancellationToken) -> BoxRoutineFuture;
}
