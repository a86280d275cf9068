//! Tasks: named, re-runnable units of work
//!
//! A task captures its arguments in a closure and can run any number of
//! times. Each run first drops whatever the previous run of the same task
//! recorded in the scope, then executes against the scope's current view,
//! so a rerun sees writes made by other tasks in the meantime.

use crate::activation;
use crate::scope::IsolationScope;
use crate::view::Provenance;
use isoscope_core::types::{DatumId, ScopeId, TaskId};
use isoscope_core::value::Value;
use isoscope_core::ScopeError;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

type TaskOp = dyn Fn(&TaskContext<'_>) -> anyhow::Result<()> + Send + Sync;

struct TaskInner {
    id: TaskId,
    name: String,
    op: Box<TaskOp>,
    attempt: AtomicU32,
}

/// A re-runnable unit of work
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use isoscope_concurrency::{IsolationScope, PublishCoordinator, Task};
/// use isoscope_core::{DatumId, RecordId, Value};
/// use isoscope_storage::VersionedStore;
///
/// let coordinator = Arc::new(PublishCoordinator::new(Arc::new(VersionedStore::new())));
/// let scope = IsolationScope::root(&coordinator);
/// let stock = DatumId::new(RecordId::new(), "stock");
///
/// let restock = Task::new("restock", move |ctx| {
///     let current = ctx.read(&stock)?.and_then(|v| v.as_int()).unwrap_or(0);
///     ctx.write(&stock, current + 10)?;
///     Ok(())
/// });
///
/// scope.run_task(&restock).unwrap();
/// assert!(scope.publish().unwrap().succeeded());
/// ```
#[derive(Clone)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a task from a name and an operation
    pub fn new<F>(name: impl Into<String>, op: F) -> Self
    where
        F: Fn(&TaskContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Task {
            inner: Arc::new(TaskInner {
                id: TaskId::next(),
                name: name.into(),
                op: Box::new(op),
                attempt: AtomicU32::new(1),
            }),
        }
    }

    /// Identity used for selective replay
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Diagnostic name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current attempt number, starting at 1
    pub fn attempt(&self) -> u32 {
        self.inner.attempt.load(Ordering::Acquire)
    }

    /// The task running on this thread, if any
    pub fn current() -> Option<TaskId> {
        activation::current_task()
    }

    /// Run once in the scope active on this thread
    pub fn run(&self) -> Result<(), ScopeError> {
        let scope = IsolationScope::current().ok_or(ScopeError::NoActiveScope)?;
        scope.execute(self)
    }

    /// Bump the attempt counter and run again
    ///
    /// Entries from this task's previous run are replaced, not accumulated.
    pub fn rerun(&self) -> Result<(), ScopeError> {
        self.advance_attempt();
        self.run()
    }

    pub(crate) fn advance_attempt(&self) {
        self.inner.attempt.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn invoke(&self, ctx: &TaskContext<'_>) -> anyhow::Result<()> {
        (self.inner.op)(ctx)
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("attempt", &self.attempt())
            .finish()
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

/// Handle passed to a running task
///
/// All reads and writes go through the owning scope's view and are
/// attributed to the task.
pub struct TaskContext<'a> {
    scope: &'a IsolationScope,
    task: &'a Task,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(scope: &'a IsolationScope, task: &'a Task) -> Self {
        Self { scope, task }
    }

    fn who(&self) -> Provenance {
        Provenance::Task(self.task.id())
    }

    /// Read a datum through the scope chain
    pub fn read(&self, datum: &DatumId) -> Result<Option<Value>, ScopeError> {
        self.scope.read_as(self.who(), datum)
    }

    /// Read an integer field, treating absent or non-integer as `None`
    pub fn read_int(&self, datum: &DatumId) -> Result<Option<i64>, ScopeError> {
        Ok(self.read(datum)?.and_then(|v| v.as_int()))
    }

    /// Tentatively write a datum
    pub fn write(&self, datum: &DatumId, value: impl Into<Value>) -> Result<(), ScopeError> {
        self.scope.write_as(self.who(), datum, Some(value.into()))
    }

    /// Tentatively delete a datum
    pub fn delete(&self, datum: &DatumId) -> Result<(), ScopeError> {
        self.scope.write_as(self.who(), datum, None)
    }

    /// The running task's id
    pub fn task_id(&self) -> TaskId {
        self.task.id()
    }

    /// The running task's name
    pub fn task_name(&self) -> &str {
        self.task.name()
    }

    /// Attempt number of this run, starting at 1
    pub fn attempt(&self) -> u32 {
        self.task.attempt()
    }

    /// The scope the task runs in
    pub fn scope(&self) -> &IsolationScope {
        self.scope
    }

    /// Id of the scope the task runs in
    pub fn scope_id(&self) -> ScopeId {
        self.scope.id()
    }
}
