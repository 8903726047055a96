//! Host-side error types.
//!
//! `HostError` is returned by [`GuestApi`](crate::GuestApi) when a
//! re-entrant call into the guest cannot be completed. Native functions
//! turn it into a thrown error value with [`HostError::to_thrown`].
//!
//! The helpers below build the error objects native functions throw.

use thiserror::Error;

use crate::object::HostObject;
use crate::value::HostValue;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// The guest has exited; no further calls are possible.
    #[error("Go program has already exited")]
    Exited,
    /// The guest has not been started yet.
    #[error("Go program has not been started")]
    NotStarted,
    /// A previous pending call has not been picked up by the guest.
    #[error("a pending call is already outstanding")]
    CallOutstanding,
    /// The guest resumed but left the pending call unconsumed.
    #[error("pending call was not consumed by the guest")]
    CallNotConsumed,
    /// The guest was aborted while handling the call.
    #[error("guest aborted: {0}")]
    Aborted(String),
}

impl HostError {
    /// The value a native function throws for this error.
    pub fn to_thrown(&self) -> HostValue {
        error_value("Error", self.to_string())
    }
}

/// A new error object with the given `name` and `message`.
pub fn error_value(name: &str, message: impl Into<String>) -> HostValue {
    HostObject::error(name, message).into()
}

pub fn type_error(message: impl Into<String>) -> HostValue {
    error_value("TypeError", message)
}

/// The error the stub filesystem and process report for unsupported calls.
pub fn enosys(op: &str) -> HostValue {
    let err = HostObject::error("Error", format!("{op}: not implemented"));
    err.set("code", "ENOSYS".into());
    err.into()
}
