//! Conflict observers
//!
//! Observers are reporting hooks around each publish attempt. They never
//! influence control flow: a hook that errors or panics is logged by the
//! orchestration loop and otherwise ignored.

use crate::publish::ConflictSet;
use isoscope_core::ObserverError;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Hooks invoked by [`crate::orchestrate`] around each attempt
///
/// Attempt numbers start at 1. Every hook defaults to doing nothing.
pub trait ConflictObserver: Send + Sync {
    /// Called immediately before tasks run (or rerun) for `attempt`
    fn before_attempt(&self, _attempt: u32) -> Result<(), ObserverError> {
        Ok(())
    }

    /// Called once, when a publish succeeds
    fn on_success(&self, _attempt: u32) -> Result<(), ObserverError> {
        Ok(())
    }

    /// Called after every conflicted publish, the last one included
    fn on_failure(&self, _attempt: u32, _conflicts: &ConflictSet) -> Result<(), ObserverError> {
        Ok(())
    }
}

/// Observer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ConflictObserver for NoopObserver {}

/// Logs each attempt through `tracing`
#[derive(Debug, Clone)]
pub struct TracingObserver {
    label: String,
    max_attempts: Option<u32>,
}

impl TracingObserver {
    /// Observer whose events carry `label`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            max_attempts: None,
        }
    }

    /// Report attempts as "n of max"
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = Some(max);
        self
    }
}

impl ConflictObserver for TracingObserver {
    fn before_attempt(&self, attempt: u32) -> Result<(), ObserverError> {
        match self.max_attempts {
            Some(max) => debug!(label = %self.label, attempt, max, "try {attempt} of {max}"),
            None => debug!(label = %self.label, attempt, "try {attempt}"),
        }
        Ok(())
    }

    fn on_success(&self, attempt: u32) -> Result<(), ObserverError> {
        info!(label = %self.label, attempt, "published");
        Ok(())
    }

    fn on_failure(&self, attempt: u32, conflicts: &ConflictSet) -> Result<(), ObserverError> {
        debug!(
            label = %self.label,
            attempt,
            conflicts = conflicts.len(),
            "conflicted"
        );
        Ok(())
    }
}

/// Thread-safe outcome counters
#[derive(Debug, Default)]
pub struct ConflictStats {
    first_try: AtomicU64,
    after_retry: AtomicU64,
    failed_attempts: AtomicU64,
    conflicting_data: AtomicU64,
}

/// Point-in-time copy of [`ConflictStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictStatsSnapshot {
    /// Publishes that succeeded on attempt 1
    pub first_try: u64,
    /// Publishes that succeeded on a later attempt
    pub after_retry: u64,
    /// Conflicted attempts
    pub failed_attempts: u64,
    /// Conflicting data summed over all conflicted attempts
    pub conflicting_data: u64,
}

impl ConflictStatsSnapshot {
    /// Total successful publishes
    pub fn successes(&self) -> u64 {
        self.first_try + self.after_retry
    }
}

impl ConflictStats {
    /// Fresh counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all counters
    pub fn snapshot(&self) -> ConflictStatsSnapshot {
        ConflictStatsSnapshot {
            first_try: self.first_try.load(Ordering::Relaxed),
            after_retry: self.after_retry.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            conflicting_data: self.conflicting_data.load(Ordering::Relaxed),
        }
    }
}

impl ConflictObserver for ConflictStats {
    fn on_success(&self, attempt: u32) -> Result<(), ObserverError> {
        let counter = if attempt <= 1 {
            &self.first_try
        } else {
            &self.after_retry
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_failure(&self, _attempt: u32, conflicts: &ConflictSet) -> Result<(), ObserverError> {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        self.conflicting_data
            .fetch_add(conflicts.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Fans every hook out to several observers
///
/// All members are called even if an earlier one errors or panics; the
/// first failure is returned, a panic as an [`ObserverError`].
#[derive(Default, Clone)]
pub struct ObserverSet {
    members: Vec<Arc<dyn ConflictObserver>>,
}

impl ObserverSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member
    pub fn with(mut self, observer: Arc<dyn ConflictObserver>) -> Self {
        self.members.push(observer);
        self
    }

    /// Add a member in place
    pub fn push(&mut self, observer: Arc<dyn ConflictObserver>) {
        self.members.push(observer);
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether there are no members
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    fn each(
        &self,
        hook: &'static str,
        mut call: impl FnMut(&dyn ConflictObserver) -> Result<(), ObserverError>,
    ) -> Result<(), ObserverError> {
        let mut first_err = None;
        for member in &self.members {
            if let Err(e) = guarded(hook, || call(member.as_ref())) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ObserverSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverSet")
            .field("members", &self.members.len())
            .finish()
    }
}

impl ConflictObserver for ObserverSet {
    fn before_attempt(&self, attempt: u32) -> Result<(), ObserverError> {
        self.each("before_attempt", |o| o.before_attempt(attempt))
    }

    fn on_success(&self, attempt: u32) -> Result<(), ObserverError> {
        self.each("on_success", |o| o.on_success(attempt))
    }

    fn on_failure(&self, attempt: u32, conflicts: &ConflictSet) -> Result<(), ObserverError> {
        self.each("on_failure", |o| o.on_failure(attempt, conflicts))
    }
}

/// Run one hook, turning a panic into an [`ObserverError`]
pub(crate) fn guarded(
    hook: &'static str,
    call: impl FnOnce() -> Result<(), ObserverError>,
) -> Result<(), ObserverError> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic".to_string());
            Err(ObserverError::new(hook, format!("panicked: {message}")))
        }
    }
}
