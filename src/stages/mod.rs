//! Pipeline stages.
//!
//! - [`fetcher`]: source stage driving a [`FetchCollaborator`];
//! - [`worker`]: processing stage driving a [`WorkCollaborator`], optionally chained;
//! - [`chain`]: turns `next()` links into an explicit, validated chain of workers;
//! - [`dispatcher`]: merges fetcher outputs and broadcasts to workers.
//!
//! All three stage kinds share one lifecycle (`start(token)` then `stop()`), driven by
//! a group of supervised slots.

pub mod chain;
pub mod collaborator;
pub mod dispatcher;
pub mod fetcher;
mod slots;
pub mod worker;

pub use chain::{MAX_CHAIN_LEN, WorkChain};
pub use collaborator::{FetchCollaborator, Handled, WorkCollaborator};
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use fetcher::{Fetcher, FetcherBuilder};
pub use worker::{Worker, WorkerBuilder};
