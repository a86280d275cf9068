//! Error types for scopes, tasks and observers
//!
//! Conflicts are deliberately absent: a conflicted publish is an ordinary
//! outcome, not an error. Everything here is a structural misuse, surfaced
//! immediately and never retried.

use crate::types::{ScopeId, ScopeState, TaskId};
use thiserror::Error;

/// Structural errors raised by the isolation core
#[derive(Debug, Error)]
pub enum ScopeError {
    /// Nesting or data access requested with no active scope on this thread
    #[error("no active isolation scope on this thread")]
    NoActiveScope,

    /// The same scope is already active on another thread
    #[error("{scope} is already active on another thread")]
    ConcurrentActivation {
        /// The contested scope
        scope: ScopeId,
    },

    /// Publish or task run attempted on a scope that can no longer accept it
    #[error("{scope} is {state}; cannot publish or run tasks")]
    PublishAfterTerminal {
        /// The scope
        scope: ScopeId,
        /// Its current state
        state: ScopeState,
    },

    /// Discard attempted while a publish is running
    #[error("{scope} is mid-publish and cannot be discarded")]
    PublishInProgress {
        /// The scope
        scope: ScopeId,
    },

    /// A child tried to publish into a parent that is published or discarded
    #[error("parent {parent} of {scope} is closed")]
    ParentClosed {
        /// The publishing scope
        scope: ScopeId,
        /// The closed parent
        parent: ScopeId,
    },

    /// A rerun named a task this scope never ran
    #[error("{task} was never run in {scope}")]
    UnknownTask {
        /// The scope
        scope: ScopeId,
        /// The missing task
        task: TaskId,
    },

    /// Publish attempted while tasks cleared for a rerun have not rerun
    #[error("{scope} cannot publish: {task} was cleared for a rerun that did not complete")]
    RedoPending {
        /// The scope
        scope: ScopeId,
        /// Earliest-executed task still awaiting its rerun
        task: TaskId,
    },

    /// A task's operation returned an error
    #[error("task '{name}' ({task}) failed: {source}")]
    TaskFailed {
        /// Failing task
        task: TaskId,
        /// Its diagnostic name
        name: String,
        /// The task's own error
        #[source]
        source: anyhow::Error,
    },
}

impl ScopeError {
    /// The scope involved, if the error names one
    pub fn scope(&self) -> Option<ScopeId> {
        match self {
            ScopeError::ConcurrentActivation { scope }
            | ScopeError::PublishAfterTerminal { scope, .. }
            | ScopeError::PublishInProgress { scope }
            | ScopeError::ParentClosed { scope, .. }
            | ScopeError::UnknownTask { scope, .. }
            | ScopeError::RedoPending { scope, .. } => Some(*scope),
            ScopeError::NoActiveScope | ScopeError::TaskFailed { .. } => None,
        }
    }

    /// Whether this came from user task code rather than scope misuse
    pub fn is_task_failure(&self) -> bool {
        matches!(self, ScopeError::TaskFailed { .. })
    }
}

/// Failure inside a conflict observer hook
///
/// Logged and swallowed by the orchestration loop; never propagated.
#[derive(Debug, Error)]
#[error("observer hook '{hook}' failed: {message}")]
pub struct ObserverError {
    /// Which hook failed
    pub hook: &'static str,
    /// What went wrong
    pub message: String,
}

impl ObserverError {
    /// Create an observer error
    pub fn new(hook: &'static str, message: impl Into<String>) -> Self {
        Self {
            hook,
            message: message.into(),
        }
    }
}
