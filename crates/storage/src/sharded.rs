//! Sharded versioned storage
//!
//! DashMap keyed by record, FxHashMap of fields within.
//! Reads never touch a shard other than the datum's own record.
//!
//! # Design
//!
//! - DashMap: 16-way sharded by default
//! - FxHashMap: O(1) field lookups, fast non-crypto hash
//! - Per-RecordId: writers to different records never contend on a shard
//! - Apply gate: batches take the gate exclusively, reads take it shared,
//!   so no reader ever observes half of a batch

use dashmap::DashMap;
use isoscope_core::types::{DatumId, RecordId, Version, Versioned};
use isoscope_core::value::Value;
use isoscope_core::{Store, WriteSet};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// One stored field
///
/// Deleted fields keep a tombstone (`value == None`) so their version keeps
/// moving forward; a create-then-delete never looks unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCell {
    /// Current value, `None` if deleted
    pub value: Option<Value>,
    /// Version of the batch that last wrote this cell
    pub version: Version,
    /// Unix timestamp (seconds) of that batch
    pub timestamp: i64,
}

/// Per-record shard containing the record's fields
#[derive(Debug, Default)]
pub struct Shard {
    pub(crate) fields: FxHashMap<String, StoredCell>,
}

impl Shard {
    /// Create a new empty shard
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fields, tombstones included
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if shard is empty
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Versioned store sharded by record
///
/// # Thread Safety
///
/// All operations are thread-safe. `apply_all` is atomic with respect to
/// `read` and `current_version`; `apply_if_current` validates and applies
/// under the same exclusive gate.
///
/// # Example
///
/// ```
/// use isoscope_core::{DatumId, RecordId, Store, Value, WriteSet};
/// use isoscope_storage::VersionedStore;
///
/// let store = VersionedStore::new();
/// let stock = DatumId::new(RecordId::new(), "stock");
///
/// let mut batch = WriteSet::new();
/// batch.insert(stock.clone(), Some(Value::Int(100)));
/// let version = store.apply_all(&batch);
///
/// assert_eq!(store.read(&stock).value, Some(Value::Int(100)));
/// assert_eq!(store.current_version(&stock), version);
/// ```
pub struct VersionedStore {
    shards: DashMap<RecordId, Shard>,
    version: AtomicU64,
    apply_gate: RwLock<()>,
}

impl VersionedStore {
    /// Create new empty store
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
            version: AtomicU64::new(0),
            apply_gate: RwLock::new(()),
        }
    }

    /// Create with expected number of records
    pub fn with_capacity(num_records: usize) -> Self {
        Self {
            shards: DashMap::with_capacity(num_records),
            version: AtomicU64::new(0),
            apply_gate: RwLock::new(()),
        }
    }

    /// Latest batch version
    #[inline]
    pub fn version(&self) -> Version {
        Version(self.version.load(Ordering::Acquire))
    }

    /// Number of records with at least one stored field
    pub fn record_count(&self) -> usize {
        self.shards.len()
    }

    /// Total stored cells across all records, tombstones included
    pub fn total_entries(&self) -> usize {
        let _gate = self.apply_gate.read();
        self.shards.iter().map(|entry| entry.value().len()).sum()
    }

    /// Full cell for a datum, tombstones included
    pub fn cell(&self, datum: &DatumId) -> Option<StoredCell> {
        let _gate = self.apply_gate.read();
        self.cell_ungated(datum)
    }

    /// Live (non-deleted) fields of a record, sorted by field name
    pub fn list_record(&self, record: &RecordId) -> Vec<(String, Versioned)> {
        let _gate = self.apply_gate.read();
        self.shards
            .get(record)
            .map(|shard| {
                let mut results: Vec<_> = shard
                    .fields
                    .iter()
                    .filter(|(_, cell)| cell.value.is_some())
                    .map(|(field, cell)| {
                        (
                            field.clone(),
                            Versioned {
                                value: cell.value.clone(),
                                version: cell.version,
                            },
                        )
                    })
                    .collect();
                results.sort_by(|(a, _), (b, _)| a.cmp(b));
                results
            })
            .unwrap_or_default()
    }

    #[inline]
    fn version_ungated(&self, datum: &DatumId) -> Version {
        self.shards
            .get(&datum.record())
            .and_then(|shard| shard.fields.get(datum.field()).map(|c| c.version))
            .unwrap_or(Version::ZERO)
    }

    /// Caller holds the apply gate exclusively
    fn apply_gated(&self, writes: &WriteSet) -> Version {
        let version = Version(self.version.fetch_add(1, Ordering::AcqRel) + 1);
        let timestamp = chrono::Utc::now().timestamp();

        for (datum, value) in writes {
            self.shards
                .entry(datum.record())
                .or_insert_with(Shard::new)
                .fields
                .insert(
                    datum.field().to_string(),
                    StoredCell {
                        value: value.clone(),
                        version,
                        timestamp,
                    },
                );
        }

        tracing::trace!(version = version.0, writes = writes.len(), "applied batch");
        version
    }

    #[inline]
    fn cell_ungated(&self, datum: &DatumId) -> Option<StoredCell> {
        self.shards
            .get(&datum.record())
            .and_then(|shard| shard.fields.get(datum.field()).cloned())
    }
}

impl Store for VersionedStore {
    fn read(&self, datum: &DatumId) -> Versioned {
        match self.cell(datum) {
            Some(cell) => Versioned {
                value: cell.value,
                version: cell.version,
            },
            None => Versioned::absent(),
        }
    }

    fn current_version(&self, datum: &DatumId) -> Version {
        let _gate = self.apply_gate.read();
        self.version_ungated(datum)
    }

    fn apply_all(&self, writes: &WriteSet) -> Version {
        let _gate = self.apply_gate.write();
        self.apply_gated(writes)
    }

    fn apply_if_current(
        &self,
        expected: &[(DatumId, Version)],
        writes: &WriteSet,
    ) -> Result<Option<Version>, Vec<DatumId>> {
        let _gate = self.apply_gate.write();

        let stale: Vec<DatumId> = expected
            .iter()
            .filter(|(datum, seen)| self.version_ungated(datum) != *seen)
            .map(|(datum, _)| datum.clone())
            .collect();
        if !stale.is_empty() {
            tracing::trace!(stale = stale.len(), "rejected batch");
            return Err(stale);
        }

        if writes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(self.apply_gated(writes)))
        }
    }
}

impl Default for VersionedStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for VersionedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore")
            .field("record_count", &self.record_count())
            .field("version", &self.version())
            .field("total_entries", &self.total_entries())
            .finish()
    }
}
