//! Storage layer for isoscope
//!
//! This crate provides [`VersionedStore`], an in-memory implementation of
//! the [`isoscope_core::Store`] capability:
//! - Per-record sharding (DashMap + FxHashMap)
//! - One global version per applied batch
//! - Tombstones for deletes
//! - Atomic batch application

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sharded;

pub use sharded::{Shard, StoredCell, VersionedStore};
