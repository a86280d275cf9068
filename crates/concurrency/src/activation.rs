//! Thread-local "current scope" stack
//!
//! Activating a scope pushes a frame; the returned guard pops it on drop, so
//! the previous current scope is restored on normal return, on `?` and on
//! unwinding alike. Frames also remember which task (if any) is running, so
//! reads and writes can be attributed without passing a context around.
//!
//! A scope may be active on at most one thread at a time. The same thread may
//! activate it again while it is already active (nested activation).

use crate::scope::IsolationScope;
use crate::view::Provenance;
use isoscope_core::types::{ScopeId, TaskId};
use isoscope_core::ScopeError;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::thread::ThreadId;

thread_local! {
    static FRAMES: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

struct Frame {
    scope: IsolationScope,
    task: Option<TaskId>,
}

/// Which thread currently holds a scope, and how deeply
#[derive(Debug, Default)]
pub(crate) struct ActivationSlot {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Pops the frame and releases the activation slot on drop
///
/// Not `Send`: it must drop on the thread whose stack it pushed.
pub(crate) struct ActivationGuard {
    scope: IsolationScope,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ActivationGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
        let mut slot = self.scope.inner.activation.lock();
        slot.depth = slot.depth.saturating_sub(1);
        if slot.depth == 0 {
            slot.owner = None;
        }
    }
}

/// Make `scope` current on this thread until the guard drops
pub(crate) fn enter(scope: &IsolationScope, task: Option<TaskId>) -> Result<ActivationGuard, ScopeError> {
    let me = std::thread::current().id();
    {
        let mut slot = scope.inner.activation.lock();
        match slot.owner {
            Some(owner) if owner != me => {
                return Err(ScopeError::ConcurrentActivation { scope: scope.id() });
            }
            _ => {
                slot.owner = Some(me);
                slot.depth += 1;
            }
        }
    }

    FRAMES.with(|frames| {
        frames.borrow_mut().push(Frame {
            scope: scope.clone(),
            task,
        })
    });

    Ok(ActivationGuard {
        scope: scope.clone(),
        _not_send: PhantomData,
    })
}

/// The innermost active scope and the provenance of code running in it
pub(crate) fn current() -> Option<(IsolationScope, Provenance)> {
    FRAMES.with(|frames| {
        frames.borrow().last().map(|f| {
            let who = match f.task {
                Some(id) => Provenance::Task(id),
                None => Provenance::Ambient,
            };
            (f.scope.clone(), who)
        })
    })
}

/// The innermost running task, in whatever scope
pub(crate) fn current_task() -> Option<TaskId> {
    FRAMES.with(|frames| frames.borrow().last().and_then(|f| f.task))
}

/// Provenance this thread has inside `scope`, looking through the stack
///
/// Used when a child publishes into `scope`: the merged entries belong to the
/// task of `scope` that is running on this thread, if any.
pub(crate) fn provenance_in(scope: ScopeId) -> Provenance {
    FRAMES.with(|frames| {
        frames
            .borrow()
            .iter()
            .rev()
            .find(|f| f.scope.id() == scope)
            .and_then(|f| f.task)
            .map(Provenance::Task)
            .unwrap_or(Provenance::Ambient)
    })
}

/// Whether `scope` is active anywhere on this thread's stack
pub(crate) fn is_active_here(scope: ScopeId) -> bool {
    FRAMES.with(|frames| frames.borrow().iter().any(|f| f.scope.id() == scope))
}
