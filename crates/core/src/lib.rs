//! Core types for isoscope
//!
//! This crate defines the vocabulary shared by every layer:
//! - [`types`]: identifiers ([`RecordId`], [`DatumId`], [`ScopeId`], [`TaskId`]),
//!   versions and the scope lifecycle
//! - [`value`]: the [`Value`] model stored in fields
//! - [`traits`]: the [`Store`] capability consumed by the concurrency layer
//! - [`error`]: structural errors raised by scopes and tasks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;
pub mod value;

pub use error::{ObserverError, ScopeError};
pub use traits::{Store, WriteSet};
pub use types::{DatumId, RecordId, ScopeId, ScopeState, TaskId, Version, VersionTag, Versioned};
pub use value::Value;
