//! Runtime error types.

use gobridge_hostapi::HostError;

/// Top-level error type for the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Wasmtime engine or store error.
    #[error("wasmtime error: {0}")]
    Wasmtime(#[from] anyhow::Error),

    /// The bytes could not be compiled or instantiated.
    #[error("instantiation failed: {0}")]
    Instantiation(String),

    /// Module validation failed (missing exports, bad imports, etc.).
    #[error("validation error: {0}")]
    Validation(String),

    /// The guest violated the host ABI. Fatal for the instance.
    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Go program has already exited")]
    AlreadyExited,

    #[error("Go program has not been started")]
    NotStarted,

    #[error("Go program has already been started")]
    AlreadyStarted,

    #[error("total length of command line and environment variables exceeds limit")]
    ArgsTooLarge,

    /// WASM guest trapped.
    #[error("guest trapped: {0}")]
    GuestTrapped(String),

    /// Fuel exhausted during execution.
    #[error("fuel exhausted (instruction limit)")]
    FuelExhausted,

    /// A fired timeout was never acknowledged by the guest.
    #[error("timeout {0} was never acknowledged by the guest")]
    MissedTimeout(i32),

    /// The instance was aborted by an earlier fatal error.
    #[error("runtime aborted: {0}")]
    Aborted(String),
}

impl RuntimeError {
    /// The error a native function reports when a guest re-entry fails.
    pub fn into_host_error(self) -> HostError {
        match self {
            Self::AlreadyExited => HostError::Exited,
            Self::NotStarted => HostError::NotStarted,
            Self::Aborted(reason) => HostError::Aborted(reason),
            other => HostError::Aborted(other.to_string()),
        }
    }
}

/// A violation of the memory or value ABI by the guest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("memory access out of bounds: {len} bytes at {addr:#x}")]
    OutOfBounds { addr: usize, len: usize },

    #[error("unknown value handle {0}")]
    UnknownHandle(u32),

    #[error("stale memory view: view covers {view} bytes, memory has {actual}")]
    StaleView { view: usize, actual: usize },

    /// The reference table or exports were released by exit or abort.
    #[error("runtime state has been released")]
    Released,
}
