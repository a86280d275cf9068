//! Core identifiers and version types
//!
//! This module defines the fundamental types used throughout the system:
//! - [`RecordId`]: Unique identifier for a record in the shared object graph
//! - [`DatumId`]: One field of one record, the unit of conflict detection
//! - [`ScopeId`] / [`TaskId`]: Process-unique handles for scopes and tasks
//! - [`Version`] / [`VersionTag`]: What a read observed, for later validation

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Unique identifier for a record
///
/// Records are the nodes of the shared object graph; each record owns a set
/// of named fields.
///
/// # Examples
///
/// ```
/// use isoscope_core::types::RecordId;
///
/// let a = RecordId::new();
/// let b = RecordId::new();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(Uuid);

impl RecordId {
    /// Create a new random RecordId using UUID v4
    pub fn new() -> Self {
        RecordId(Uuid::new_v4())
    }

    /// Create RecordId from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        RecordId(Uuid::from_bytes(bytes))
    }

    /// Get raw bytes representation
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of a single field value
///
/// Ordered by record, then field name, so conflict sets print and iterate
/// deterministically.
///
/// # Examples
///
/// ```
/// use isoscope_core::types::{DatumId, RecordId};
///
/// let widget = RecordId::new();
/// let stock = DatumId::new(widget, "stock");
/// assert_eq!(stock.field(), "stock");
/// assert_eq!(stock.record(), widget);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatumId {
    record: RecordId,
    field: String,
}

impl DatumId {
    /// Create a datum address
    pub fn new(record: RecordId, field: impl Into<String>) -> Self {
        Self {
            record,
            field: field.into(),
        }
    }

    /// The owning record
    pub fn record(&self) -> RecordId {
        self.record
    }

    /// The field name within the record
    pub fn field(&self) -> &str {
        &self.field
    }
}

impl std::fmt::Display for DatumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.record, self.field)
    }
}

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque handle identifying one isolation scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Allocate the next process-unique scope id
    pub fn next() -> Self {
        ScopeId(NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value (diagnostics only)
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Opaque handle identifying one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocate the next process-unique task id
    pub fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value (diagnostics only)
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Store-level version of a datum
///
/// Version 0 means "never written". Every batch applied to a store allocates
/// one new version shared by all datums in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// Version of a datum that was never written
    pub const ZERO: Version = Version(0);

    /// Next version in sequence
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Which level of the scope chain supplied a value, and at what version
///
/// A read is valid at publish time iff the parent would still supply the
/// same tag for the datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionTag {
    /// Value came from the store
    Store(Version),
    /// Value came from a tentative write held by an ancestor scope
    Scope {
        /// Scope holding the write
        scope: ScopeId,
        /// That scope's local write sequence number
        seq: u64,
    },
}

impl std::fmt::Display for VersionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionTag::Store(v) => write!(f, "store@{}", v),
            VersionTag::Scope { scope, seq } => write!(f, "{}@{}", scope, seq),
        }
    }
}

/// A value together with the version it was read at
///
/// `value == None` means the datum is absent (never written, or deleted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned {
    /// The value, if present
    pub value: Option<Value>,
    /// Store version of the datum
    pub version: Version,
}

impl Versioned {
    /// An absent datum at version 0
    pub fn absent() -> Self {
        Self {
            value: None,
            version: Version::ZERO,
        }
    }
}

/// Lifecycle of an isolation scope
///
/// ```text
/// Open -> Publishing -> Published
///              |
///              v
///         Conflicted -> Publishing ...
/// Open | Conflicted -> Discarded
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScopeState {
    /// Accepting tasks
    Open,
    /// A publish attempt is running
    Publishing,
    /// Merged into the parent (terminal)
    Published,
    /// Last publish failed; awaiting selective rerun
    Conflicted,
    /// Abandoned without merging (terminal)
    Discarded,
}

impl ScopeState {
    /// Published or discarded
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScopeState::Published | ScopeState::Discarded)
    }

    /// Whether tasks may run and publishes may start
    pub fn accepts_work(&self) -> bool {
        matches!(self, ScopeState::Open | ScopeState::Conflicted)
    }
}

impl std::fmt::Display for ScopeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScopeState::Open => "open",
            ScopeState::Publishing => "publishing",
            ScopeState::Published => "published",
            ScopeState::Conflicted => "conflicted",
            ScopeState::Discarded => "discarded",
        };
        f.write_str(s)
    }
}
