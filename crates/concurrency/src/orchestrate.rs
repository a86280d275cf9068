//! The publish / rerun / retry loop
//!
//! ```text
//! attempt 1: run every task, publish
//! conflict:  on_failure, ask the policy, rerun only tasks_to_redo, publish
//! success:   on_success, done
//! ```
//!
//! Structural errors end the loop at once and are returned as `Err`. A
//! conflict the policy will not retry is a normal [`Outcome::GaveUp`].

use crate::observer::{guarded, ConflictObserver};
use crate::publish::PublishResult;
use crate::retry::RetryPolicy;
use crate::scope::IsolationScope;
use crate::task::Task;
use isoscope_core::{ObserverError, ScopeError};
use tracing::{debug, warn};

/// Why an orchestration stopped without publishing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The retry policy refused another attempt
    PolicyExhausted,
    /// Replaying tasks cannot remove the conflict (untracked access)
    Unresolvable,
}

/// Terminal result of [`orchestrate`]
#[derive(Debug, Clone)]
pub enum Outcome {
    /// The scope was published
    Published {
        /// Attempts made, the successful one included
        attempts: u32,
        /// The successful publish
        result: PublishResult,
    },
    /// The scope is left conflicted
    GaveUp {
        /// Attempts made
        attempts: u32,
        /// The last conflicted publish
        last: PublishResult,
        /// Why no further attempt was made
        reason: GiveUpReason,
    },
}

impl Outcome {
    /// Whether the scope was published
    pub fn succeeded(&self) -> bool {
        matches!(self, Outcome::Published { .. })
    }

    /// Attempts made
    pub fn attempts(&self) -> u32 {
        match self {
            Outcome::Published { attempts, .. } | Outcome::GaveUp { attempts, .. } => *attempts,
        }
    }

    /// The final publish result
    pub fn result(&self) -> &PublishResult {
        match self {
            Outcome::Published { result, .. } => result,
            Outcome::GaveUp { last, .. } => last,
        }
    }

    /// Consume into the final publish result
    pub fn into_result(self) -> PublishResult {
        match self {
            Outcome::Published { result, .. } => result,
            Outcome::GaveUp { last, .. } => last,
        }
    }
}

/// Run `tasks` in `scope` and publish, rerunning conflicted tasks until the
/// publish succeeds or `policy` stops
///
/// The first attempt always happens; `policy` is consulted only after a
/// conflict, with the number of attempts made so far. On give-up the scope
/// is left `Conflicted`; discarding it is up to the caller.
pub fn orchestrate(
    scope: &IsolationScope,
    tasks: &[Task],
    policy: &RetryPolicy,
    observer: &dyn ConflictObserver,
) -> Result<Outcome, ScopeError> {
    let mut control = policy.start();
    let mut attempt = 1u32;

    notify("before_attempt", || observer.before_attempt(attempt));
    for task in tasks {
        scope.run_task(task)?;
    }

    loop {
        let result = scope.publish()?;

        if result.succeeded() {
            notify("on_success", || observer.on_success(attempt));
            return Ok(Outcome::Published {
                attempts: attempt,
                result,
            });
        }

        notify("on_failure", || observer.on_failure(attempt, result.conflicts()));

        if !result.is_resolvable() || result.tasks_to_redo().is_empty() {
            debug!(scope = %scope.id(), attempt, "conflict cannot be resolved by replay");
            return Ok(Outcome::GaveUp {
                attempts: attempt,
                last: result,
                reason: GiveUpReason::Unresolvable,
            });
        }

        if !control.should_continue(attempt) {
            debug!(scope = %scope.id(), attempt, "retry policy exhausted");
            return Ok(Outcome::GaveUp {
                attempts: attempt,
                last: result,
                reason: GiveUpReason::PolicyExhausted,
            });
        }

        attempt += 1;
        debug!(
            scope = %scope.id(),
            attempt,
            conflicts = result.num_conflicts(),
            redo = result.redo_count(),
            "retrying"
        );
        notify("before_attempt", || observer.before_attempt(attempt));
        scope.rerun_conflicted(&result)?;
    }
}

fn notify(hook: &'static str, call: impl FnOnce() -> Result<(), ObserverError>) {
    if let Err(e) = guarded(hook, call) {
        warn!(hook, error = %e, "observer failed");
    }
}
