//! Nested isolation scopes with selective replay
//!
//! This crate implements optimistic isolation over a [`Store`] with:
//! - IsolationScope: a tree of private views, read-through to the store
//! - Task: named, re-runnable units of work attributed in the view
//! - PublishCoordinator: conflict detection and merge into the parent
//! - RetryPolicy / ConflictObserver: the retry loop in [`orchestrate()`]
//!
//! [`Store`]: isoscope_core::Store

#![warn(missing_docs)]
#![warn(clippy::all)]

mod activation;
pub mod current;
pub mod observer;
pub mod orchestrate;
pub mod publish;
pub mod retry;
pub mod scope;
pub mod task;
mod view;

pub use observer::{
    ConflictObserver, ConflictStats, ConflictStatsSnapshot, NoopObserver, ObserverSet, TracingObserver,
};
pub use orchestrate::{orchestrate, GiveUpReason, Outcome};
pub use publish::{ConflictSet, PublishCoordinator, PublishMetrics, PublishResult, PublishTarget};
pub use retry::{RetryControl, RetryPolicy};
pub use scope::IsolationScope;
pub use task::{Task, TaskContext};
