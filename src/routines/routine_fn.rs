//! # Closure-backed routine (`RoutineFn`)
//!
//! [`RoutineFn`] wraps a closure `F: Fn(CancellationToken) -> Fut`, producing a fresh
//! future per attempt. Stages build their run loops this way, capturing an
//! `Arc` of their shared state.
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use gorgeous::{RoutineFn, RoutineRef, TaskError};
//!
//! let r: RoutineRef = RoutineFn::arc("ticker", |ctx: CancellationToken| async move {
//!     ctx.cancelled().await;
//!     Ok::<_, TaskError>(())
//! });
//!
//! assert_eq!(r.name(), "ticker");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::routines::routine::{BoxRoutineFuture, Routine};

/// Function-backed routine.
pub struct RoutineFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> RoutineFn<F> {
    /// Creates a new function-backed routine.
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the routine and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<F, Fut> Routine for RoutineFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn spawn(&self, ctx: CancellationToken) -> BoxRoutineFuture {
        Box::pin((self.f)(ctx))
    }
}
