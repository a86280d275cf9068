//! Isolation scopes
//!
//! A scope is a node in a tree of transactional views. The root's parent is
//! the store; every other scope's parent is another scope. A scope holds an
//! owning reference to its parent and only weak references to its children,
//! so the tree never forms a cycle.
//!
//! ## Reads
//!
//! A read inside scope S resolves, in order:
//! 1. the latest tentative write of the datum in S
//! 2. the value S already read from its parent
//! 3. the parent chain, recursively, ending at the store
//!
//! and is recorded with the tag of whichever level supplied it.
//!
//! ## Lock order
//!
//! View locks are always taken descendant-first: a scope's own view, then its
//! parent's, then further ancestors. State and activation mutexes are leaves
//! and are never held while acquiring another lock.

use crate::activation::{self, ActivationSlot};
use crate::publish::{PublishCoordinator, PublishResult};
use crate::task::{Task, TaskContext};
use crate::view::{Provenance, ReadSource, View};
use isoscope_core::types::{DatumId, ScopeId, ScopeState, TaskId, VersionTag};
use isoscope_core::value::Value;
use isoscope_core::{ScopeError, WriteSet};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tracing::debug;

pub(crate) struct ScopeInner {
    pub(crate) id: ScopeId,
    pub(crate) parent: Option<IsolationScope>,
    pub(crate) coordinator: Arc<PublishCoordinator>,
    pub(crate) state: Mutex<ScopeState>,
    pub(crate) view: RwLock<View>,
    pub(crate) activation: Mutex<ActivationSlot>,
    children: Mutex<Vec<Weak<ScopeInner>>>,
}

/// Handle to one isolation scope
///
/// Cloning the handle does not create a new scope; all clones refer to the
/// same view. A handle may move between threads while the scope is inactive.
#[derive(Clone)]
pub struct IsolationScope {
    pub(crate) inner: Arc<ScopeInner>,
}

impl IsolationScope {
    fn with_parent(parent: Option<IsolationScope>, coordinator: Arc<PublishCoordinator>) -> Self {
        let scope = IsolationScope {
            inner: Arc::new(ScopeInner {
                id: ScopeId::next(),
                parent,
                coordinator,
                state: Mutex::new(ScopeState::Open),
                view: RwLock::new(View::new()),
                activation: Mutex::new(ActivationSlot::default()),
                children: Mutex::new(Vec::new()),
            }),
        };
        if let Some(parent) = &scope.inner.parent {
            let mut children = parent.inner.children.lock();
            children.retain(|c| c.strong_count() > 0);
            children.push(Arc::downgrade(&scope.inner));
        }
        scope
    }

    /// Create a root scope whose parent is the coordinator's store
    pub fn root(coordinator: &Arc<PublishCoordinator>) -> Self {
        let scope = Self::with_parent(None, Arc::clone(coordinator));
        debug!(scope = %scope.id(), "created root scope");
        scope
    }

    /// Create a child of `parent`
    ///
    /// Fails if `parent` is already published or discarded.
    pub fn nested_from(parent: &IsolationScope) -> Result<Self, ScopeError> {
        let state = parent.state();
        if state.is_terminal() {
            return Err(ScopeError::PublishAfterTerminal {
                scope: parent.id(),
                state,
            });
        }
        let scope = Self::with_parent(Some(parent.clone()), Arc::clone(&parent.inner.coordinator));
        debug!(scope = %scope.id(), parent = %parent.id(), "created nested scope");
        Ok(scope)
    }

    /// Create a child of the scope active on this thread
    pub fn nested_from_current() -> Result<Self, ScopeError> {
        let parent = Self::current().ok_or(ScopeError::NoActiveScope)?;
        Self::nested_from(&parent)
    }

    /// The scope active on this thread, if any
    pub fn current() -> Option<Self> {
        activation::current().map(|(scope, _)| scope)
    }

    /// Opaque identity of this scope
    pub fn id(&self) -> ScopeId {
        self.inner.id
    }

    /// Parent scope; `None` for a root
    pub fn parent(&self) -> Option<&IsolationScope> {
        self.inner.parent.as_ref()
    }

    /// Whether this scope publishes straight into the store
    pub fn is_root(&self) -> bool {
        self.inner.parent.is_none()
    }

    /// Number of ancestors (0 for a root)
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cursor = self.parent();
        while let Some(p) = cursor {
            depth += 1;
            cursor = p.parent();
        }
        depth
    }

    /// Current lifecycle state
    pub fn state(&self) -> ScopeState {
        *self.inner.state.lock()
    }

    /// The coordinator this scope's tree publishes through
    pub fn coordinator(&self) -> &Arc<PublishCoordinator> {
        &self.inner.coordinator
    }

    /// Live children that are neither published nor discarded, oldest first
    pub fn children(&self) -> Vec<IsolationScope> {
        let children = self.inner.children.lock();
        children
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| IsolationScope { inner })
            .filter(|c| !c.state().is_terminal())
            .collect()
    }

    /// Whether this scope is on the current thread's activation stack
    pub fn is_active_on_this_thread(&self) -> bool {
        activation::is_active_here(self.id())
    }

    /// Run `body` with this scope as the thread's current scope
    ///
    /// The previous current scope is restored on every exit path, including
    /// unwinding. Fails if the scope is active on another thread or can no
    /// longer accept work.
    pub fn activate<T>(&self, body: impl FnOnce() -> T) -> Result<T, ScopeError> {
        self.check_accepts_work()?;
        let _guard = activation::enter(self, None)?;
        Ok(body())
    }

    /// Run `task` inside this scope
    ///
    /// Everything the task reads or writes is recorded in this scope's view.
    pub fn run_task(&self, task: &Task) -> Result<(), ScopeError> {
        self.execute(task)
    }

    /// Rerun the tasks a failed publish named, in their original order
    ///
    /// All named tasks' entries are cleared before any of them reruns, so a
    /// rerun never observes another conflicted task's stale writes. Returns
    /// the number of tasks rerun.
    ///
    /// If a rerun fails, it and every task after it stay cleared and the
    /// scope refuses to publish ([`ScopeError::RedoPending`]) until they have
    /// run again, through another `rerun_conflicted` or [`run_task`](Self::run_task).
    pub fn rerun_conflicted(&self, result: &PublishResult) -> Result<usize, ScopeError> {
        let tasks = {
            let mut view = self.inner.view.write();
            self.check_accepts_work()?;
            let mut tasks = Vec::with_capacity(result.tasks_to_redo().len());
            for id in result.tasks_to_redo() {
                let task = view.task(*id).cloned().ok_or(ScopeError::UnknownTask {
                    scope: self.id(),
                    task: *id,
                })?;
                tasks.push(task);
            }
            for task in &tasks {
                view.clear(Provenance::Task(task.id()));
                view.mark_pending_redo(task.id());
            }
            tasks
        };

        for task in &tasks {
            task.advance_attempt();
            self.execute(task)?;
        }
        debug!(scope = %self.id(), count = tasks.len(), "reran conflicted tasks");
        Ok(tasks.len())
    }

    /// Try to merge this scope into its parent
    ///
    /// See [`PublishCoordinator::publish`].
    pub fn publish(&self) -> Result<PublishResult, ScopeError> {
        self.inner.coordinator.publish(self)
    }

    /// Abandon this scope without merging
    ///
    /// Idempotent: discarding a published or discarded scope does nothing.
    /// Fails only while a publish is running.
    pub fn discard(&self) -> Result<(), ScopeError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                ScopeState::Publishing => {
                    return Err(ScopeError::PublishInProgress { scope: self.id() });
                }
                ScopeState::Published | ScopeState::Discarded => return Ok(()),
                ScopeState::Open | ScopeState::Conflicted => *state = ScopeState::Discarded,
            }
        }
        self.inner.view.write().reset();
        debug!(scope = %self.id(), "discarded scope");
        Ok(())
    }

    /// Tasks run in this scope, in execution order, duplicates included
    pub fn executions(&self) -> Vec<TaskId> {
        self.inner.view.read().executions().to_vec()
    }

    /// The writes this scope would hand to its parent right now
    pub fn tentative_writes(&self) -> WriteSet {
        self.inner.view.read().effective_writes()
    }

    /// Number of recorded reads (one per reader per datum)
    pub fn read_count(&self) -> usize {
        self.inner.view.read().read_count()
    }

    /// Number of data with at least one tentative write
    pub fn write_count(&self) -> usize {
        self.inner.view.read().write_count()
    }

    pub(crate) fn check_accepts_work(&self) -> Result<(), ScopeError> {
        let state = self.state();
        if state.accepts_work() {
            Ok(())
        } else {
            Err(ScopeError::PublishAfterTerminal {
                scope: self.id(),
                state,
            })
        }
    }

    pub(crate) fn set_state(&self, state: ScopeState) {
        *self.inner.state.lock() = state;
    }

    /// Open | Conflicted -> Publishing; returns the state to restore on error
    pub(crate) fn begin_publish(&self) -> Result<ScopeState, ScopeError> {
        let mut state = self.inner.state.lock();
        match *state {
            prior @ (ScopeState::Open | ScopeState::Conflicted) => {
                *state = ScopeState::Publishing;
                Ok(prior)
            }
            ScopeState::Publishing => Err(ScopeError::PublishInProgress { scope: self.id() }),
            terminal => Err(ScopeError::PublishAfterTerminal {
                scope: self.id(),
                state: terminal,
            }),
        }
    }

    pub(crate) fn execute(&self, task: &Task) -> Result<(), ScopeError> {
        let _guard = activation::enter(self, Some(task.id()))?;
        {
            let mut view = self.inner.view.write();
            self.check_accepts_work()?;
            view.clear(Provenance::Task(task.id()));
            view.register_execution(task);
        }

        let ctx = TaskContext::new(self, task);
        if let Err(source) = task.invoke(&ctx) {
            let mut view = self.inner.view.write();
            view.clear(Provenance::Task(task.id()));
            view.unregister_last_execution(task.id());
            debug!(scope = %self.id(), task = %task.id(), error = %source, "task failed");
            return Err(ScopeError::TaskFailed {
                task: task.id(),
                name: task.name().to_string(),
                source,
            });
        }
        self.inner.view.write().complete_redo(task.id());
        Ok(())
    }

    pub(crate) fn read_as(&self, who: Provenance, datum: &DatumId) -> Result<Option<Value>, ScopeError> {
        let mut view = self.inner.view.write();
        self.check_accepts_work()?;

        if let Some(value) = view.latest_write(datum).map(|w| w.value.clone()) {
            view.record_read(who, datum, ReadSource::Local);
            return Ok(value);
        }

        let (value, tag) = match view.recorded_parent_read(datum) {
            Some(seen) => seen,
            None => self.resolve_above(datum),
        };
        view.record_read(
            who,
            datum,
            ReadSource::Parent {
                tag,
                value: value.clone(),
            },
        );
        Ok(value)
    }

    pub(crate) fn write_as(&self, who: Provenance, datum: &DatumId, value: Option<Value>) -> Result<(), ScopeError> {
        let mut view = self.inner.view.write();
        self.check_accepts_work()?;
        view.record_write(who, datum, value);
        Ok(())
    }

    /// What this scope would supply to a child reading `datum`
    pub(crate) fn resolve_through(&self, datum: &DatumId) -> (Option<Value>, VersionTag) {
        let view = self.inner.view.read();
        match view.resolve_local(self.id(), datum) {
            Some(found) => found,
            None => self.resolve_above(datum),
        }
    }

    /// What this scope's parent (or the store) would supply for `datum`
    pub(crate) fn resolve_above(&self, datum: &DatumId) -> (Option<Value>, VersionTag) {
        match &self.inner.parent {
            Some(parent) => parent.resolve_through(datum),
            None => {
                let versioned = self.inner.coordinator.store().read(datum);
                (versioned.value, VersionTag::Store(versioned.version))
            }
        }
    }
}

impl std::fmt::Debug for IsolationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationScope")
            .field("id", &self.id())
            .field("parent", &self.parent().map(|p| p.id()))
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for IsolationScope {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for IsolationScope {}
