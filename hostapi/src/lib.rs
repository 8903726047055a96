//! `gobridge-hostapi` - the host value model for the gobridge runtime.
//!
//! A guest compiled for `GOOS=js GOARCH=wasm` expects to talk to a
//! JavaScript host. This crate provides the host side of that conversation
//! without a JavaScript engine:
//!
//! - `HostValue` / `HostObject` - values the guest holds handles to
//! - `GuestApi` - how native functions call back into the guest
//! - `PendingCall` - one host→guest call in flight
//! - `globals` - the bootstrap environment (`fs`, `process`, `crypto`, ...)
//! - `json` - conversion to and from `serde_json::Value`
//! - `HostError` - failures of re-entrant guest calls
//!
//! Nothing here depends on Wasmtime; the sandbox crate wires it up.

pub mod error;
pub mod globals;
pub mod json;
pub mod object;
pub mod traits;
pub mod types;
pub mod value;

// Re-export commonly used types at the crate root.
pub use error::{enosys, error_value, type_error, HostError};
pub use globals::{install_globals, new_global};
pub use object::{call, construct, instance_of, HostObject, Invocation, ObjectClass, ObjectKind};
pub use traits::{GuestApi, NoGuest};
pub use types::PendingCall;
pub use value::{HostValue, Symbol, TypeFlag, ValueKey};
