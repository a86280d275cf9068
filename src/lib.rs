//! # isoscope
//!
//! Nested isolation scopes with selective replay.
//!
//! Work runs as [`Task`]s inside an [`IsolationScope`]. Everything a task
//! reads and writes is recorded in the scope's private view; publishing the
//! scope checks that nothing it read has changed in the parent and then
//! merges its writes. On conflict only the tasks that touched the changed
//! data are rerun; everyone else's work is kept as is.
//!
//! ## Quick Start
//!
//! ```
//! use isoscope::prelude::*;
//!
//! let iso = Isolation::new();
//! let stock = DatumId::new(RecordId::new(), "stock");
//!
//! let s = stock.clone();
//! let restock = Task::new("restock", move |ctx| {
//!     let n = ctx.read_int(&s)?.unwrap_or(0);
//!     ctx.write(&s, n + 10)?;
//!     Ok(())
//! });
//!
//! iso.isolated(&[restock])?;
//! assert_eq!(iso.read_committed(&stock).value, Some(Value::Int(10)));
//! # Ok::<(), isoscope::Error>(())
//! ```
//!
//! ## Levels of control
//!
//! 1. **Simple** - [`Isolation::isolated`] runs, publishes and retries
//! 2. **Loop** - [`orchestrate()`] with an explicit policy and observer
//! 3. **Manual** - [`IsolationScope::run_task`], [`IsolationScope::publish`],
//!    [`IsolationScope::rerun_conflicted`]

#![warn(missing_docs)]

mod config;
mod error;
mod isolation;
mod types;

pub mod prelude;

pub use config::{IsolationConfig, RetryConfig};
pub use error::{Error, Result};
pub use isolation::{Isolation, IsolationBuilder};

pub use isoscope_concurrency::{
    current, orchestrate, ConflictObserver, ConflictSet, ConflictStats, ConflictStatsSnapshot, GiveUpReason,
    IsolationScope, NoopObserver, ObserverSet, Outcome, PublishCoordinator, PublishMetrics, PublishResult,
    PublishTarget, RetryControl, RetryPolicy, Task, TaskContext, TracingObserver,
};
pub use isoscope_storage::VersionedStore;

pub use types::*;
