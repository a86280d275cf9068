//! Unified error type for isoscope.
//!
//! This module flattens the structural errors of the concurrency layer and
//! adds the outcomes only the facade can produce (give-up, bad config).

use isoscope_concurrency::GiveUpReason;
use isoscope_core::{ScopeError, ScopeId, ScopeState, TaskId};
use thiserror::Error;

/// All isoscope errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Nesting or data access with no current scope
    #[error("no active scope on this thread")]
    NoActiveScope,

    /// Scope already active on another thread
    #[error("scope {scope} is active on another thread")]
    ConcurrentActivation {
        /// The contested scope
        scope: ScopeId,
    },

    /// Work or publish attempted on a published or discarded scope
    #[error("scope {scope} is {state}")]
    ScopeClosed {
        /// The closed scope
        scope: ScopeId,
        /// Its terminal state
        state: ScopeState,
    },

    /// A publish of this scope is already running
    #[error("scope {scope} is being published")]
    PublishInProgress {
        /// The publishing scope
        scope: ScopeId,
    },

    /// The parent stopped accepting merges
    #[error("parent {parent} of scope {scope} is closed")]
    ParentClosed {
        /// The scope being published
        scope: ScopeId,
        /// Its closed parent
        parent: ScopeId,
    },

    /// A publish result named a task the scope does not know
    #[error("task {task} never ran in scope {scope}")]
    UnknownTask {
        /// The scope asked to rerun
        scope: ScopeId,
        /// The unknown task
        task: TaskId,
    },

    /// Publish refused: a failed rerun left conflicted tasks unrun
    #[error("scope {scope} cannot publish until {task} is rerun")]
    RedoPending {
        /// The refusing scope
        scope: ScopeId,
        /// Earliest task still awaiting its rerun
        task: TaskId,
    },

    /// A task's own operation failed
    #[error("task '{name}' failed: {source}")]
    TaskFailed {
        /// Task name
        name: String,
        /// The task's error
        #[source]
        source: anyhow::Error,
    },

    /// The retry loop gave up; the scope was discarded
    #[error("isolated work failed after {attempts} attempt(s) with {conflicts} conflict(s) ({reason:?})")]
    FailedTransaction {
        /// Attempts made
        attempts: u32,
        /// Conflicting data in the last attempt
        conflicts: usize,
        /// Why the loop stopped
        reason: GiveUpReason,
    },

    /// Invalid configuration
    #[error("config error: {0}")]
    Config(String),
}

/// Result type for isoscope operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// Only a give-up caused by the retry policy may succeed when run again
    /// from scratch; everything else fails the same way twice.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::FailedTransaction {
                reason: GiveUpReason::PolicyExhausted,
                ..
            }
        )
    }

    /// Check if this is a misuse of the scope API.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::NoActiveScope
                | Error::ConcurrentActivation { .. }
                | Error::ScopeClosed { .. }
                | Error::PublishInProgress { .. }
                | Error::ParentClosed { .. }
                | Error::UnknownTask { .. }
                | Error::RedoPending { .. }
        )
    }

    /// Check if the retry loop gave up.
    pub fn is_failed_transaction(&self) -> bool {
        matches!(self, Error::FailedTransaction { .. })
    }
}

impl From<ScopeError> for Error {
    fn from(e: ScopeError) -> Self {
        match e {
            ScopeError::NoActiveScope => Error::NoActiveScope,
            ScopeError::ConcurrentActivation { scope } => Error::ConcurrentActivation { scope },
            ScopeError::PublishAfterTerminal { scope, state } => Error::ScopeClosed { scope, state },
            ScopeError::PublishInProgress { scope } => Error::PublishInProgress { scope },
            ScopeError::ParentClosed { scope, parent } => Error::ParentClosed { scope, parent },
            ScopeError::UnknownTask { scope, task } => Error::UnknownTask { scope, task },
            ScopeError::RedoPending { scope, task } => Error::RedoPending { scope, task },
            ScopeError::TaskFailed { name, source, .. } => Error::TaskFailed { name, source },
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}
