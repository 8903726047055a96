//! The two-call surface for request handlers: `initialize` once, then
//! `invoke` per request.
//!
//! `invoke` never fails outright. Anything that goes wrong becomes a
//! `ResultPayload::Failure` carrying a message.

use gobridge_hostapi::json::to_json;
use gobridge_hostapi::HostValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::host_impl::Phase;
use crate::runtime::Runtime;

/// A started guest ready to serve calls.
pub struct Handle {
    runtime: Runtime,
    entry_point: String,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to initialize WASM module: {0}")]
pub struct InstantiationError(#[from] pub RuntimeError);

/// What `invoke` hands back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultPayload {
    Failure { error: String },
    Success(serde_json::Value),
}

/// Instantiate and start a guest with the default configuration.
pub fn initialize(wasm_bytes: &[u8]) -> Result<Handle, InstantiationError> {
    initialize_with(wasm_bytes, RuntimeConfig::default())
}

/// Instantiate a guest, run it until it suspends, and drain any timers it
/// scheduled during startup.
pub fn initialize_with(
    wasm_bytes: &[u8],
    config: RuntimeConfig,
) -> Result<Handle, InstantiationError> {
    let entry_point = config.entry_point.clone();
    let mut runtime = Runtime::new(wasm_bytes, config)?;
    let phase = runtime.run()?;
    if let Phase::Exited(code) = phase {
        warn!(code, "guest exited during initialization");
    }
    runtime.run_event_loop()?;
    debug!(digest = %runtime.module_digest().to_hex(), %entry_point, "guest initialized");
    Ok(Handle {
        runtime,
        entry_point,
    })
}

/// Call the handle's entry point with `payload`.
pub fn invoke(handle: &mut Handle, payload: &str) -> ResultPayload {
    handle.invoke(payload)
}

impl Handle {
    pub fn invoke(&mut self, payload: &str) -> ResultPayload {
        let name = self.entry_point.clone();
        self.invoke_export(&name, vec![HostValue::from(payload)])
    }

    /// Call the global function `name` and convert its result to JSON.
    pub fn invoke_export(&mut self, name: &str, args: Vec<HostValue>) -> ResultPayload {
        match self.try_invoke(name, args) {
            Ok(value) => ResultPayload::Success(to_json(&value)),
            Err(message) => {
                warn!(%name, %message, "invoke failed");
                ResultPayload::Failure {
                    error: format!("failed to invoke {name}: {message}"),
                }
            }
        }
    }

    fn try_invoke(&mut self, name: &str, args: Vec<HostValue>) -> Result<HostValue, String> {
        match self.runtime.phase() {
            Phase::Exited(_) => return Err(RuntimeError::AlreadyExited.to_string()),
            Phase::Aborted(reason) => return Err(RuntimeError::Aborted(reason).to_string()),
            _ => {}
        }
        let callee = self.runtime.global().get(name);
        let result = self
            .runtime
            .call(&callee, HostValue::Undefined, args)
            .map_err(|thrown| thrown.to_display_string())?;
        self.runtime.run_event_loop().map_err(|e| e.to_string())?;
        Ok(result)
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }
}
