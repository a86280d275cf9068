//! Convenient imports for isoscope.
//!
//! ```
//! use isoscope::prelude::*;
//!
//! let iso = Isolation::new();
//! let scope = iso.root_scope();
//! assert_eq!(scope.state(), ScopeState::Open);
//! ```

// Main entry point
pub use crate::isolation::{Isolation, IsolationBuilder};

// Error handling
pub use crate::error::{Error, Result};

// Scopes and tasks
pub use isoscope_concurrency::{IsolationScope, PublishResult, Task, TaskContext};

// Retry and observation
pub use isoscope_concurrency::{ConflictObserver, ConflictStats, NoopObserver, RetryPolicy, TracingObserver};

// Core types
pub use crate::types::{DatumId, RecordId, ScopeState, Value, Versioned};
