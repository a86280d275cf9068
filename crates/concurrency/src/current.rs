//! Data access through the thread's current scope
//!
//! These functions resolve against whatever scope is innermost on this
//! thread's activation stack. Inside a task they are attributed to the task;
//! in a plain [`IsolationScope::activate`] body they are untracked.
//!
//! [`IsolationScope::activate`]: crate::IsolationScope::activate

use crate::activation;
use isoscope_core::types::DatumId;
use isoscope_core::value::Value;
use isoscope_core::ScopeError;

/// Read a datum through the current scope
pub fn read(datum: &DatumId) -> Result<Option<Value>, ScopeError> {
    let (scope, who) = activation::current().ok_or(ScopeError::NoActiveScope)?;
    scope.read_as(who, datum)
}

/// Tentatively write a datum in the current scope
pub fn write(datum: &DatumId, value: impl Into<Value>) -> Result<(), ScopeError> {
    let (scope, who) = activation::current().ok_or(ScopeError::NoActiveScope)?;
    scope.write_as(who, datum, Some(value.into()))
}

/// Tentatively delete a datum in the current scope
pub fn delete(datum: &DatumId) -> Result<(), ScopeError> {
    let (scope, who) = activation::current().ok_or(ScopeError::NoActiveScope)?;
    scope.write_as(who, datum, None)
}
