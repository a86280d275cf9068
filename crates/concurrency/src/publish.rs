//! Publish coordinator: conflict detection and merge
//!
//! Provides atomic publish of a scope into its parent by orchestrating:
//! 1. Validation (every recorded read still matches the parent)
//! 2. Application (tentative writes merged into the parent or the store)
//! 3. Attribution (on conflict, which tasks must be redone)
//!
//! ## Publish Sequence
//!
//! ```text
//! 1. lock own view          - no task may touch the scope meanwhile
//! 2. begin_publish()        - Open | Conflicted -> Publishing
//! 3. refuse if a conflicted task still awaits its rerun
//! 4. validate + apply       - root: one conditional batch in the store
//!                             nested: under the parent's view lock
//! 5. IF conflicts: attribute to tasks, -> Conflicted, return failure
//! 6. -> Published, clear view
//! ```
//!
//! `Publishing` is only ever observable by someone holding the scope's view
//! lock, so a child merging into this scope waits for the publish to finish
//! and never mistakes it for a closed parent.
//!
//! The coordinator never retries. Deciding whether to rerun tasks and
//! publish again belongs to the caller (see [`crate::orchestrate`]).

use crate::activation;
use crate::scope::IsolationScope;
use crate::view::{Provenance, ReadSource, View};
use isoscope_core::types::{DatumId, ScopeId, ScopeState, TaskId, Version, VersionTag};
use isoscope_core::{ScopeError, Store};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Data whose recorded reads no longer match the parent
pub type ConflictSet = BTreeSet<DatumId>;

/// Where a publish was directed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTarget {
    /// Root scope into the store
    Store,
    /// Nested scope into its parent
    Scope(ScopeId),
}

/// Outcome of one publish attempt
///
/// Produced once per attempt and never modified afterwards.
#[derive(Debug, Clone)]
pub struct PublishResult {
    source: ScopeId,
    target: PublishTarget,
    succeeded: bool,
    tasks_to_redo: Vec<TaskId>,
    conflicts: ConflictSet,
    untracked_conflicts: bool,
    applied: usize,
    store_version: Option<Version>,
}

impl PublishResult {
    fn success(source: ScopeId, target: PublishTarget, applied: usize, store_version: Option<Version>) -> Self {
        Self {
            source,
            target,
            succeeded: true,
            tasks_to_redo: Vec::new(),
            conflicts: ConflictSet::new(),
            untracked_conflicts: false,
            applied,
            store_version,
        }
    }

    fn conflicted(source: ScopeId, target: PublishTarget, view: &View, conflicts: ConflictSet) -> Self {
        let mut redo = FxHashSet::default();
        let mut untracked_conflicts = false;
        for datum in &conflicts {
            for who in view.producers_of(datum) {
                match who {
                    Provenance::Task(id) => {
                        redo.insert(id);
                    }
                    Provenance::Ambient => untracked_conflicts = true,
                }
            }
        }
        let mut tasks_to_redo: Vec<TaskId> = redo.into_iter().collect();
        tasks_to_redo.sort_by_key(|id| (view.first_execution(*id).unwrap_or(usize::MAX), *id));

        Self {
            source,
            target,
            succeeded: false,
            tasks_to_redo,
            conflicts,
            untracked_conflicts,
            applied: 0,
            store_version: None,
        }
    }

    /// Whether the writes were merged
    pub fn succeeded(&self) -> bool {
        self.succeeded
    }

    /// Tasks whose reads or writes touch a conflicting datum, in execution order
    pub fn tasks_to_redo(&self) -> &[TaskId] {
        &self.tasks_to_redo
    }

    /// Number of tasks needing replay
    pub fn redo_count(&self) -> usize {
        self.tasks_to_redo.len()
    }

    /// Data that changed in the parent since they were read
    pub fn conflicts(&self) -> &ConflictSet {
        &self.conflicts
    }

    /// Number of conflicting data
    pub fn num_conflicts(&self) -> usize {
        self.conflicts.len()
    }

    /// Whether some conflicting datum was touched outside any task
    ///
    /// Such a conflict cannot be repaired by replaying tasks.
    pub fn has_untracked_conflicts(&self) -> bool {
        self.untracked_conflicts
    }

    /// Whether rerunning [`tasks_to_redo`](Self::tasks_to_redo) can lead to success
    pub fn is_resolvable(&self) -> bool {
        self.succeeded || !self.untracked_conflicts
    }

    /// The published scope
    pub fn source(&self) -> ScopeId {
        self.source
    }

    /// Where it was published to
    pub fn target(&self) -> PublishTarget {
        self.target
    }

    /// Number of data written into the target on success
    pub fn applied_writes(&self) -> usize {
        self.applied
    }

    /// Store version assigned to the batch (root publishes with writes only)
    pub fn store_version(&self) -> Option<Version> {
        self.store_version
    }
}

/// Publish counters, summed over every scope of one coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PublishMetrics {
    /// Successful publishes
    pub published: u64,
    /// Publishes that found conflicts
    pub conflicted: u64,
    /// Success ratio (0.0 - 1.0), 0.0 before any publish
    pub success_rate: f64,
}

/// Coordinates publishes for one tree of scopes over one store
///
/// Creates root scopes and counts publishes.
///
/// # Thread Safety
///
/// Validation and application of a root publish are one indivisible step
/// inside [`Store::apply_if_current`]. Without that:
/// 1. S1 validates (store at v1)
/// 2. S2 validates (store still at v1)
/// 3. S1 applies (store now at v2)
/// 4. S2 applies using a stale validation
///
/// The store owns that step, so coordinators sharing one store stay
/// linearized. Nested publishes get the same guarantee from the parent's
/// view lock.
pub struct PublishCoordinator {
    store: Arc<dyn Store>,
    published: AtomicU64,
    conflicted: AtomicU64,
}

impl PublishCoordinator {
    /// Create a coordinator over `store`
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            published: AtomicU64::new(0),
            conflicted: AtomicU64::new(0),
        }
    }

    /// The store root scopes publish into
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Create a root scope over this coordinator's store
    pub fn create_root_scope(self: &Arc<Self>) -> IsolationScope {
        IsolationScope::root(self)
    }

    /// Snapshot of the publish counters
    pub fn metrics(&self) -> PublishMetrics {
        let published = self.published.load(Ordering::Relaxed);
        let conflicted = self.conflicted.load(Ordering::Relaxed);
        let total = published + conflicted;
        PublishMetrics {
            published,
            conflicted,
            success_rate: if total == 0 {
                0.0
            } else {
                published as f64 / total as f64
            },
        }
    }

    /// Publish `scope` into its parent
    ///
    /// # Returns
    /// - `Ok(result)` with `succeeded() == true` when every recorded read is
    ///   still current; the writes are then visible in the parent
    /// - `Ok(result)` with `succeeded() == false` on conflict; the scope is
    ///   left `Conflicted` with its view intact
    /// - `Err(ScopeError)` on structural misuse (publishing a terminal scope,
    ///   publishing twice at once, into a closed parent, or while a failed
    ///   [`IsolationScope::rerun_conflicted`] left tasks unrun)
    ///
    /// Every call re-validates every recorded read, including reads that
    /// survived an earlier conflicted attempt.
    pub fn publish(&self, scope: &IsolationScope) -> Result<PublishResult, ScopeError> {
        if !std::ptr::eq(self, Arc::as_ptr(scope.coordinator())) {
            return scope.coordinator().publish(scope);
        }

        let mut view = scope.inner.view.write();
        let prior = scope.begin_publish()?;

        let outcome = match (view.first_pending_redo(), scope.parent()) {
            (Some(task), _) => Err(ScopeError::RedoPending {
                scope: scope.id(),
                task,
            }),
            (None, None) => Ok(self.publish_to_store(scope.id(), &view)),
            (None, Some(parent)) => publish_into_scope(scope.id(), &view, parent),
        };

        match outcome {
            Err(e) => {
                scope.set_state(prior);
                Err(e)
            }
            Ok(result) if result.succeeded() => {
                scope.set_state(ScopeState::Published);
                view.reset();
                self.published.fetch_add(1, Ordering::Relaxed);
                debug!(
                    scope = %result.source(),
                    target = ?result.target(),
                    writes = result.applied_writes(),
                    "publish succeeded"
                );
                Ok(result)
            }
            Ok(result) => {
                scope.set_state(ScopeState::Conflicted);
                self.conflicted.fetch_add(1, Ordering::Relaxed);
                debug!(
                    scope = %result.source(),
                    target = ?result.target(),
                    conflicts = result.num_conflicts(),
                    redo = result.redo_count(),
                    "publish conflicted"
                );
                Ok(result)
            }
        }
    }

    fn publish_to_store(&self, source: ScopeId, view: &View) -> PublishResult {
        let mut expected = Vec::new();
        let mut conflicts = ConflictSet::new();
        for (datum, seen) in view.parent_reads() {
            match seen {
                VersionTag::Store(version) => expected.push((datum.clone(), version)),
                // a root has no parent scope to have read from
                VersionTag::Scope { .. } => {
                    conflicts.insert(datum.clone());
                }
            }
        }
        if !conflicts.is_empty() {
            return PublishResult::conflicted(source, PublishTarget::Store, view, conflicts);
        }

        let writes = view.effective_writes();
        match self.store.apply_if_current(&expected, &writes) {
            Ok(version) => PublishResult::success(source, PublishTarget::Store, writes.len(), version),
            Err(stale) => {
                trace!(scope = %source, stale = stale.len(), "store rejected batch");
                PublishResult::conflicted(source, PublishTarget::Store, view, stale.into_iter().collect())
            }
        }
    }
}

fn publish_into_scope(source: ScopeId, view: &View, parent: &IsolationScope) -> Result<PublishResult, ScopeError> {
    let target = PublishTarget::Scope(parent.id());
    let mut parent_view = parent.inner.view.write();

    if !parent.state().accepts_work() {
        return Err(ScopeError::ParentClosed {
            scope: source,
            parent: parent.id(),
        });
    }

    let conflicts: ConflictSet = view
        .parent_reads()
        .filter(|(datum, seen)| {
            let now = match parent_view.resolve_local(parent.id(), datum) {
                Some((_, tag)) => tag,
                None => parent.resolve_above(datum).1,
            };
            trace!(datum = %datum, seen = %seen, now = %now, "validate");
            *seen != now
        })
        .map(|(datum, _)| datum.clone())
        .collect();

    if !conflicts.is_empty() {
        return Ok(PublishResult::conflicted(source, target, view, conflicts));
    }

    // Entries merged into the parent belong to whichever parent task is
    // running this publish, so the parent can replay it selectively too.
    let who = activation::provenance_in(parent.id());

    for (datum, seen, value) in view.parent_reads_with_values() {
        let carried = match seen {
            VersionTag::Scope { scope, .. } if scope == parent.id() => ReadSource::Local,
            tag => ReadSource::Parent {
                tag,
                value: value.clone(),
            },
        };
        parent_view.record_read(who, datum, carried);
    }

    let writes = view.effective_writes();
    for (datum, value) in &writes {
        parent_view.record_write(who, datum, value.clone());
    }

    Ok(PublishResult::success(source, target, writes.len(), None))
}
