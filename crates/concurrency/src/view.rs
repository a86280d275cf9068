//! Private view of one isolation scope
//!
//! The view is a log of reads and tentative writes keyed by datum, where
//! every entry remembers which task produced it. Clearing one task's
//! entries leaves every other task's entries in place, which is what makes
//! selective replay possible.
//!
//! ## Entry rules
//!
//! - A reader keeps only its first read of a datum.
//! - A writer keeps only its latest write of a datum.
//! - The effective value of a datum is the write with the highest sequence
//!   number, whoever wrote it.
//! - Reads satisfied by a local write are recorded as `Local`; they carry no
//!   tag and are never validated, but they still tie the reader to the datum
//!   for conflict attribution.

use crate::task::Task;
use isoscope_core::types::{DatumId, ScopeId, TaskId, VersionTag};
use isoscope_core::value::Value;
use isoscope_core::WriteSet;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// Who produced a view entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Provenance {
    /// A task run inside the scope
    Task(TaskId),
    /// Code running in an activated scope outside any task
    Ambient,
}

/// Where a recorded read got its value
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ReadSource {
    /// Supplied by the parent chain; validated at publish
    Parent {
        tag: VersionTag,
        value: Option<Value>,
    },
    /// Supplied by a write already in this scope
    Local,
}

#[derive(Debug, Clone)]
pub(crate) struct ReadEntry {
    pub(crate) reader: Provenance,
    pub(crate) source: ReadSource,
}

#[derive(Debug, Clone)]
pub(crate) struct WriteEntry {
    pub(crate) writer: Provenance,
    pub(crate) seq: u64,
    pub(crate) value: Option<Value>,
}

#[derive(Default)]
pub(crate) struct View {
    reads: FxHashMap<DatumId, SmallVec<[ReadEntry; 2]>>,
    writes: FxHashMap<DatumId, SmallVec<[WriteEntry; 2]>>,
    touched: FxHashMap<Provenance, FxHashSet<DatumId>>,
    tasks: FxHashMap<TaskId, Task>,
    executions: Vec<TaskId>,
    pending_redo: FxHashSet<TaskId>,
    next_seq: u64,
}

impl View {
    pub(crate) fn new() -> Self {
        Self {
            next_seq: 1,
            ..Self::default()
        }
    }

    /// Latest local write of a datum, if any
    pub(crate) fn latest_write(&self, datum: &DatumId) -> Option<&WriteEntry> {
        self.writes
            .get(datum)
            .and_then(|entries| entries.iter().max_by_key(|w| w.seq))
    }

    /// First parent-sourced read of a datum, if any
    pub(crate) fn recorded_parent_read(&self, datum: &DatumId) -> Option<(Option<Value>, VersionTag)> {
        self.reads.get(datum).and_then(|entries| {
            entries.iter().find_map(|r| match &r.source {
                ReadSource::Parent { tag, value } => Some((value.clone(), *tag)),
                ReadSource::Local => None,
            })
        })
    }

    /// What this scope would supply to a child reading `datum` right now
    ///
    /// `None` means the scope holds nothing for the datum and the request
    /// must go further up the chain.
    pub(crate) fn resolve_local(&self, owner: ScopeId, datum: &DatumId) -> Option<(Option<Value>, VersionTag)> {
        if let Some(w) = self.latest_write(datum) {
            return Some((
                w.value.clone(),
                VersionTag::Scope {
                    scope: owner,
                    seq: w.seq,
                },
            ));
        }
        self.recorded_parent_read(datum)
    }

    pub(crate) fn record_read(&mut self, reader: Provenance, datum: &DatumId, source: ReadSource) {
        let entries = self.reads.entry(datum.clone()).or_default();
        if entries.iter().any(|r| r.reader == reader) {
            return;
        }
        entries.push(ReadEntry { reader, source });
        self.touched.entry(reader).or_default().insert(datum.clone());
    }

    /// Record a tentative write and return its sequence number
    pub(crate) fn record_write(&mut self, writer: Provenance, datum: &DatumId, value: Option<Value>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        let entries = self.writes.entry(datum.clone()).or_default();
        match entries.iter_mut().find(|w| w.writer == writer) {
            Some(existing) => {
                existing.seq = seq;
                existing.value = value;
            }
            None => entries.push(WriteEntry { writer, seq, value }),
        }
        self.touched.entry(writer).or_default().insert(datum.clone());
        seq
    }

    /// Remove every entry produced by `who`
    pub(crate) fn clear(&mut self, who: Provenance) {
        let Some(data) = self.touched.remove(&who) else {
            return;
        };
        for datum in data {
            if let Some(entries) = self.reads.get_mut(&datum) {
                entries.retain(|r| r.reader != who);
                if entries.is_empty() {
                    self.reads.remove(&datum);
                }
            }
            if let Some(entries) = self.writes.get_mut(&datum) {
                entries.retain(|w| w.writer != who);
                if entries.is_empty() {
                    self.writes.remove(&datum);
                }
            }
        }
    }

    /// Every parent-sourced read: (datum, tag observed)
    pub(crate) fn parent_reads(&self) -> impl Iterator<Item = (&DatumId, VersionTag)> + '_ {
        self.reads.iter().flat_map(|(datum, entries)| {
            entries.iter().filter_map(move |r| match &r.source {
                ReadSource::Parent { tag, .. } => Some((datum, *tag)),
                ReadSource::Local => None,
            })
        })
    }

    /// Every parent-sourced read with its observed value
    pub(crate) fn parent_reads_with_values(
        &self,
    ) -> impl Iterator<Item = (&DatumId, VersionTag, &Option<Value>)> + '_ {
        self.reads.iter().flat_map(|(datum, entries)| {
            entries.iter().filter_map(move |r| match &r.source {
                ReadSource::Parent { tag, value } => Some((datum, *tag, value)),
                ReadSource::Local => None,
            })
        })
    }

    /// The batch this scope would hand to its parent
    pub(crate) fn effective_writes(&self) -> WriteSet {
        self.writes
            .iter()
            .filter_map(|(datum, entries)| {
                entries
                    .iter()
                    .max_by_key(|w| w.seq)
                    .map(|w| (datum.clone(), w.value.clone()))
            })
            .collect()
    }

    /// Everyone with a read or write entry on `datum`
    pub(crate) fn producers_of(&self, datum: &DatumId) -> FxHashSet<Provenance> {
        let readers = self.reads.get(datum).into_iter().flatten().map(|r| r.reader);
        let writers = self.writes.get(datum).into_iter().flatten().map(|w| w.writer);
        readers.chain(writers).collect()
    }

    pub(crate) fn register_execution(&mut self, task: &Task) {
        self.tasks.entry(task.id()).or_insert_with(|| task.clone());
        self.executions.push(task.id());
    }

    /// Undo the most recent `register_execution` of a failed run
    pub(crate) fn unregister_last_execution(&mut self, task: TaskId) {
        if let Some(pos) = self.executions.iter().rposition(|t| *t == task) {
            self.executions.remove(pos);
        }
        if !self.executions.contains(&task) {
            self.tasks.remove(&task);
        }
    }

    pub(crate) fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Execution log, duplicates included
    pub(crate) fn executions(&self) -> &[TaskId] {
        &self.executions
    }

    /// Position of a task's first execution
    pub(crate) fn first_execution(&self, id: TaskId) -> Option<usize> {
        self.executions.iter().position(|t| *t == id)
    }

    /// Cleared for a rerun that has not completed yet
    pub(crate) fn mark_pending_redo(&mut self, id: TaskId) {
        self.pending_redo.insert(id);
    }

    pub(crate) fn complete_redo(&mut self, id: TaskId) {
        self.pending_redo.remove(&id);
    }

    /// Earliest-executed task still awaiting its rerun
    pub(crate) fn first_pending_redo(&self) -> Option<TaskId> {
        self.pending_redo
            .iter()
            .copied()
            .min_by_key(|id| (self.first_execution(*id).unwrap_or(usize::MAX), *id))
    }

    pub(crate) fn read_count(&self) -> usize {
        self.reads.values().map(|e| e.len()).sum()
    }

    pub(crate) fn write_count(&self) -> usize {
        self.writes.len()
    }

    pub(crate) fn reset(&mut self) {
        self.reads.clear();
        self.writes.clear();
        self.touched.clear();
        self.tasks.clear();
        self.executions.clear();
        self.pending_redo.clear();
    }
}
