//! Public types for the isoscope API.
//!
//! This module re-exports types from internal crates with a clean public interface.

// Identifiers
pub use isoscope_core::{DatumId, RecordId, ScopeId, TaskId};

// Values and versions
pub use isoscope_core::{Value, Version, VersionTag, Versioned};

// Lifecycle
pub use isoscope_core::ScopeState;

// Store capability
pub use isoscope_core::{ObserverError, Store, WriteSet};
