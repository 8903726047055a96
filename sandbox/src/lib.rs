//! `gobridge-sandbox` - Wasmtime host for Go `GOOS=js GOARCH=wasm` binaries.
//!
//! This crate runs a Go js/wasm module without a JavaScript engine. It
//! provides every import the Go runtime and `syscall/js` expect:
//!
//! - **Memory:** bounds-checked access, stale-view detection on growth
//! - **Values:** NaN-boxed handles into a reference-counted table
//! - **Trampolines:** property access, calls and construction of host values
//! - **Timers:** deferred wake-ups drained by an event loop
//! - **Lifecycle:** run, suspend/resume, re-entrant calls, exit
//! - **Import whitelisting:** only `gojs`/`go` imports, no WASI
//!
//! The primary entry points are [`initialize`] and [`invoke`]; [`Runtime`]
//! gives finer control.

pub mod abi;
pub mod boxed;
pub mod bridge;
pub mod config;
pub mod error;
pub mod host_impl;
pub mod linker;
pub mod memory;
pub mod refs;
pub mod runtime;
pub mod timers;
pub mod validation;
pub mod wrapper;

pub use config::RuntimeConfig;
pub use error::{BridgeError, RuntimeError};
pub use host_impl::Phase;
pub use runtime::Runtime;
pub use wrapper::{initialize, initialize_with, invoke, Handle, InstantiationError, ResultPayload};

pub use gobridge_hostapi as hostapi;
