//! The seam between native host functions and the running guest.
//!
//! Native functions receive a `&mut dyn GuestApi` so they can call back
//! into the guest (function wrappers created by `_makeFuncWrapper`) and
//! emit output without knowing anything about Wasmtime.

use crate::error::HostError;
use crate::types::PendingCall;
use crate::value::HostValue;

/// Guest-side operations available to native functions.
pub trait GuestApi {
    /// Deliver `call` to the guest, resume it, and return the result the
    /// guest stored on the pending event.
    fn dispatch(&mut self, call: PendingCall) -> Result<HostValue, HostError>;

    /// Emit bytes the guest wrote to `fd` (1 = stdout, 2 = stderr).
    fn write_output(&mut self, fd: i64, bytes: &[u8]);
}

/// A guest that is not running. Dispatch fails with `NotStarted`; output
/// is dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGuest;

impl GuestApi for NoGuest {
    fn dispatch(&mut self, _call: PendingCall) -> Result<HostValue, HostError> {
        Err(HostError::NotStarted)
    }

    fn write_output(&mut self, _fd: i64, _bytes: &[u8]) {}
}
