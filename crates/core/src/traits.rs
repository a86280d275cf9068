//! The store capability
//!
//! The concurrency layer never owns field storage. It reads committed state
//! and applies published batches through [`Store`], so any engine that can
//! answer "what is the value and version of this datum" and "apply this
//! batch atomically" can sit under a tree of isolation scopes.

use crate::types::{DatumId, Version, Versioned};
use crate::value::Value;
use std::collections::BTreeMap;

/// A batch of writes; `None` deletes the datum
pub type WriteSet = BTreeMap<DatumId, Option<Value>>;

/// Versioned storage consumed by root scopes
///
/// Tentative (scoped) writes never reach the store directly; they live in
/// scope views until a root scope publishes them through
/// [`Store::apply_if_current`].
///
/// # Thread Safety
///
/// Implementations are shared across every root scope and must be safe to
/// call from any thread. `apply_all` must be atomic with respect to `read`
/// and `current_version`. `apply_if_current` must additionally be atomic with
/// respect to every other apply, so that several coordinators may share one
/// store without losing updates.
pub trait Store: Send + Sync {
    /// Read the committed value and its version
    ///
    /// A missing datum returns [`Versioned::absent`].
    fn read(&self, datum: &DatumId) -> Versioned;

    /// Current version of a datum, used for conflict comparison
    fn current_version(&self, datum: &DatumId) -> Version;

    /// Apply every write in one indivisible step
    ///
    /// Returns the version assigned to the batch.
    fn apply_all(&self, writes: &WriteSet) -> Version;

    /// Validate `expected` and apply `writes` in one indivisible step
    ///
    /// Every datum in `expected` must still carry the listed version. If any
    /// does not, nothing is applied and every stale datum is returned.
    /// An empty `writes` is validated but allocates no version.
    fn apply_if_current(&self, expected: &[(DatumId, Version)], writes: &WriteSet)
        -> Result<Option<Version>, Vec<DatumId>>;
}
