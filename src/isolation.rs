//! Main entry point for isoscope.
//!
//! This module provides the `Isolation` struct, which owns a store, the
//! coordinator publishing into it, and the default retry behaviour used by
//! [`Isolation::isolated`].

use crate::config::IsolationConfig;
use crate::error::{Error, Result};
use isoscope_concurrency::{
    orchestrate, ConflictObserver, IsolationScope, NoopObserver, Outcome, PublishCoordinator, PublishMetrics,
    PublishResult, RetryPolicy, Task, TracingObserver,
};
use isoscope_core::{DatumId, Store, Versioned};
use isoscope_storage::VersionedStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Isolated, retryable units of work over one store.
///
/// Create one with [`Isolation::new`] or [`Isolation::builder`].
///
/// # Example
///
/// ```
/// use isoscope::prelude::*;
///
/// let iso = Isolation::builder().max_attempts(5).build();
/// let balance = DatumId::new(RecordId::new(), "balance");
///
/// let b = balance.clone();
/// let deposit = Task::new("deposit", move |ctx| {
///     let current = ctx.read_int(&b)?.unwrap_or(0);
///     ctx.write(&b, current + 100)?;
///     Ok(())
/// });
///
/// iso.isolated(&[deposit])?;
/// assert_eq!(iso.read_committed(&balance).value, Some(Value::Int(100)));
/// # Ok::<(), isoscope::Error>(())
/// ```
pub struct Isolation {
    store: Arc<dyn Store>,
    coordinator: Arc<PublishCoordinator>,
    retry: RetryPolicy,
    observer: Arc<dyn ConflictObserver>,
}

impl Isolation {
    /// In-memory store, three attempts, no observer.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Build from a parsed configuration, over a fresh in-memory store.
    pub fn from_config(config: &IsolationConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Create a builder.
    pub fn builder() -> IsolationBuilder {
        IsolationBuilder::new()
    }

    /// The store root scopes publish into.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The coordinator shared by every scope this facade creates.
    pub fn coordinator(&self) -> &Arc<PublishCoordinator> {
        &self.coordinator
    }

    /// Default retry policy.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Fresh root scope over the store.
    pub fn root_scope(&self) -> IsolationScope {
        self.coordinator.create_root_scope()
    }

    /// Run `tasks` isolated, with the default policy and observer.
    ///
    /// See [`isolated_with`](Self::isolated_with).
    pub fn isolated(&self, tasks: &[Task]) -> Result<PublishResult> {
        self.isolated_with(&self.retry, self.observer.as_ref(), tasks)
    }

    /// Run `tasks` in a new scope and publish it, retrying conflicts.
    ///
    /// The scope nests inside the thread's current scope if there is one,
    /// otherwise it is a root over the store. When the loop gives up or a
    /// task fails, the scope is discarded.
    ///
    /// # Errors
    ///
    /// - [`Error::FailedTransaction`] if conflicts persist
    /// - [`Error::TaskFailed`] if a task's operation fails
    /// - structural errors if the current scope cannot take a child
    pub fn isolated_with(
        &self,
        policy: &RetryPolicy,
        observer: &dyn ConflictObserver,
        tasks: &[Task],
    ) -> Result<PublishResult> {
        let scope = match IsolationScope::current() {
            Some(parent) => IsolationScope::nested_from(&parent)?,
            None => self.root_scope(),
        };

        match orchestrate(&scope, tasks, policy, observer) {
            Ok(Outcome::Published { result, .. }) => Ok(result),
            Ok(Outcome::GaveUp {
                attempts,
                last,
                reason,
            }) => {
                scope.discard()?;
                debug!(scope = %scope.id(), attempts, ?reason, "isolated work abandoned");
                Err(Error::FailedTransaction {
                    attempts,
                    conflicts: last.num_conflicts(),
                    reason,
                })
            }
            Err(e) => {
                if let Err(discard) = scope.discard() {
                    warn!(scope = %scope.id(), error = %discard, "discard after failed work");
                }
                Err(e.into())
            }
        }
    }

    /// Latest committed value of `datum`, bypassing every scope.
    pub fn read_committed(&self, datum: &DatumId) -> Versioned {
        self.store.read(datum)
    }

    /// Publish counters.
    pub fn metrics(&self) -> PublishMetrics {
        self.coordinator.metrics()
    }
}

impl Default for Isolation {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Isolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Isolation")
            .field("retry", &self.retry)
            .field("metrics", &self.metrics())
            .finish()
    }
}

/// Builder for [`Isolation`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use isoscope::prelude::*;
///
/// // Bounded by attempts
/// let iso = Isolation::builder().max_attempts(10).build();
///
/// // Bounded by time, with attempts logged
/// let iso = Isolation::builder()
///     .retry_for(Duration::from_millis(500))
///     .observer(std::sync::Arc::new(TracingObserver::new("checkout")))
///     .build();
/// ```
pub struct IsolationBuilder {
    store: Option<Arc<dyn Store>>,
    retry: RetryPolicy,
    observer: Option<Arc<dyn ConflictObserver>>,
}

impl IsolationBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            store: None,
            retry: RetryPolicy::default(),
            observer: None,
        }
    }

    /// Use an existing store instead of a fresh in-memory one.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Default retry policy.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// At most `n` attempts per isolated call.
    pub fn max_attempts(self, n: u32) -> Self {
        self.retry(RetryPolicy::attempts(n))
    }

    /// Keep retrying for `budget` per isolated call.
    pub fn retry_for(self, budget: Duration) -> Self {
        self.retry(RetryPolicy::within(budget))
    }

    /// Default observer.
    pub fn observer(mut self, observer: Arc<dyn ConflictObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Apply a parsed configuration.
    pub fn config(mut self, config: &IsolationConfig) -> Self {
        self.retry = config.retry.to_policy();
        if config.trace_attempts {
            let observer = match config.retry {
                crate::config::RetryConfig::Count { attempts } => {
                    TracingObserver::new("isolated").with_max_attempts(attempts)
                }
                _ => TracingObserver::new("isolated"),
            };
            self.observer = Some(Arc::new(observer));
        }
        self
    }

    /// Build the facade.
    pub fn build(self) -> Isolation {
        let store = self.store.unwrap_or_else(|| Arc::new(VersionedStore::new()));
        let coordinator = Arc::new(PublishCoordinator::new(Arc::clone(&store)));
        Isolation {
            store,
            coordinator,
            retry: self.retry,
            observer: self.observer.unwrap_or_else(|| Arc::new(NoopObserver)),
        }
    }
}

impl Default for IsolationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
