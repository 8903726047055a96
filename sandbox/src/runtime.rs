//! Runtime - Wasmtime engine, module loading, and the guest lifecycle.
//!
//! The `Runtime` struct is the main entry point. It loads a Go js/wasm
//! module, validates its ABI, instantiates it against the host imports and
//! drives it through `run`, `resume` and the timer event loop.
//!
//! The guest suspends by returning from `run` or `resume`. Host→guest
//! calls publish a pending event on the runtime object and call `resume`;
//! this may happen re-entrantly from inside an import.

use std::collections::BTreeMap;
use std::path::Path;
use std::thread;
use std::time::Instant;

use gobridge_hostapi::{GuestApi, HostError, HostObject, HostValue, PendingCall};
use tracing::{debug, warn};
use wasmtime::{AsContextMut, Config, Engine, Linker, Module, Store, Trap};

use crate::abi::{ARGV_BASE, MIN_DATA_ADDR};
use crate::config::RuntimeConfig;
use crate::error::{BridgeError, RuntimeError};
use crate::host_impl::{GuestExports, Phase, RuntimeContext};
use crate::linker::register_imports;
use crate::memory;
use crate::validation::validate_module;

/// One instantiated guest module.
pub struct Runtime {
    store: Store<RuntimeContext>,
    digest: blake3::Hash,
    config: RuntimeConfig,
}

impl Runtime {
    /// Compile, validate and instantiate `wasm_bytes` (binary or text).
    pub fn new(wasm_bytes: &[u8], config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let engine = create_engine(&config)?;
        let module = Module::new(&engine, wasm_bytes)
            .map_err(|e| RuntimeError::Instantiation(format!("{e:#}")))?;
        Self::instantiate(&engine, &module, blake3::hash(wasm_bytes), config)
    }

    /// Load from a `.wasm` file path.
    pub fn from_file(path: &Path, config: RuntimeConfig) -> Result<Self, RuntimeError> {
        let bytes = std::fs::read(path).map_err(|e| {
            RuntimeError::Instantiation(format!("reading {}: {e}", path.display()))
        })?;
        Self::new(&bytes, config)
    }

    fn instantiate(
        engine: &Engine,
        module: &Module,
        digest: blake3::Hash,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        validate_module(module)?;

        let mut store = Store::new(engine, RuntimeContext::new(&config));
        store.limiter(|ctx| &mut ctx.limits);
        if let Some(fuel) = config.fuel_limit {
            store.set_fuel(fuel)?;
        }

        let mut linker = Linker::new(engine);
        register_imports(&mut linker)?;
        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| RuntimeError::Instantiation(format!("{e:#}")))?;
        let exports = GuestExports::resolve(&instance, &mut store)?;
        store.data_mut().attach(exports);

        debug!(digest = %digest.to_hex(), "guest module instantiated");
        Ok(Self {
            store,
            digest,
            config,
        })
    }

    /// Write argv/env into guest memory and call the `run` export.
    ///
    /// Returns once the guest exits or suspends waiting for events.
    pub fn run(&mut self) -> Result<Phase, RuntimeError> {
        match self.store.data().phase() {
            Phase::Unstarted => {}
            Phase::Exited(_) => return Err(RuntimeError::AlreadyExited),
            Phase::Aborted(reason) => return Err(RuntimeError::Aborted(reason.clone())),
            Phase::Running | Phase::Suspended => return Err(RuntimeError::AlreadyStarted),
        }

        let exports = self.store.data().exports()?.clone();
        let (argc, argv) = {
            let (mem, ctx) = exports.memory.data_and_store_mut(&mut self.store);
            let args = write_process_args(mem, &self.config.argv, &self.config.env)?;
            ctx.start(mem.len());
            args
        };

        debug!(argc, argv, "starting guest");
        let mut cx = self.store.as_context_mut();
        cx.data_mut().enter();
        let result = exports.run.call(&mut cx, (argc, argv));
        cx.data_mut().leave();
        settle(&mut cx, result)?;
        Ok(self.phase())
    }

    /// Re-enter the guest through its `resume` export.
    pub fn resume(&mut self) -> Result<Phase, RuntimeError> {
        resume_guest(&mut self.store)?;
        Ok(self.phase())
    }

    /// Fire due timeouts in deadline order until none remain or the guest
    /// stops running, sleeping on the calling thread in between.
    pub fn run_event_loop(&mut self) -> Result<Phase, RuntimeError> {
        while self.phase() == Phase::Suspended {
            let Some((id, deadline)) = self.store.data().timers.next_due() else {
                break;
            };
            let now = Instant::now();
            if deadline > now {
                thread::sleep(deadline - now);
            }
            self.fire_timeout(id)?;
        }
        Ok(self.phase())
    }

    /// Resume the guest for timeout `id`, re-delivering while the guest
    /// has not acknowledged it.
    fn fire_timeout(&mut self, id: i32) -> Result<(), RuntimeError> {
        debug!(id, "timeout fired");
        resume_guest(&mut self.store)?;
        let mut retries = 0;
        while self.store.data().timers.contains(id) {
            if retries >= self.config.missed_timeout_retries {
                let err = RuntimeError::MissedTimeout(id);
                self.store.data_mut().abort(err.to_string());
                return Err(err);
            }
            warn!(id, "scheduleTimeoutEvent: missed timeout event");
            retries += 1;
            resume_guest(&mut self.store)?;
        }
        Ok(())
    }

    /// Call `callee` with the guest available for re-entry.
    ///
    /// `Err` carries the thrown value.
    pub fn call(
        &mut self,
        callee: &HostValue,
        this: HostValue,
        args: Vec<HostValue>,
    ) -> Result<HostValue, HostValue> {
        let mut guest = StoreGuest::new(&mut self.store);
        gobridge_hostapi::call(&mut guest, callee, this, args)
    }

    /// The global object (handle 5).
    pub fn global(&self) -> HostObject {
        self.store.data().global().clone()
    }

    pub fn phase(&self) -> Phase {
        self.store.data().phase().clone()
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.store.data().phase() {
            Phase::Exited(code) => Some(*code),
            _ => None,
        }
    }

    /// Replace the exit handler. The default logs a warning for non-zero
    /// codes.
    pub fn on_exit(&mut self, handler: impl FnMut(i32) + 'static) {
        self.store.data_mut().set_exit_handler(Box::new(handler));
    }

    /// The guest's linear memory. Fails once the instance is released.
    pub fn memory(&self) -> Result<&[u8], RuntimeError> {
        let memory = self.store.data().exports()?.memory;
        Ok(memory.data(&self.store))
    }

    /// Captured stdout, when `capture_output` is set.
    pub fn stdout(&self) -> &[u8] {
        self.store.data().stdout()
    }

    pub fn stderr(&self) -> &[u8] {
        self.store.data().stderr()
    }

    /// Occupied reference table slots, `None` before `run` and after exit.
    pub fn live_handles(&self) -> Option<usize> {
        self.store.data().refs().map(|refs| refs.live_handles())
    }

    pub fn pending_timeouts(&self) -> usize {
        self.store.data().timers.len()
    }

    /// BLAKE3 digest of the module bytes.
    pub fn module_digest(&self) -> &blake3::Hash {
        &self.digest
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

/// A `GuestApi` backed by the store, for native functions that need to
/// re-enter the guest.
pub(crate) struct StoreGuest<S> {
    store: S,
}

impl<S: AsContextMut<Data = RuntimeContext>> StoreGuest<S> {
    pub(crate) fn new(store: S) -> Self {
        Self { store }
    }
}

impl<S: AsContextMut<Data = RuntimeContext>> GuestApi for StoreGuest<S> {
    fn dispatch(&mut self, call: PendingCall) -> Result<HostValue, HostError> {
        dispatch(&mut self.store, call)
    }

    fn write_output(&mut self, fd: i64, bytes: &[u8]) {
        self.store.as_context_mut().data_mut().write_output(fd, bytes);
    }
}

/// Deliver `call` to the guest and return the result it stored.
fn dispatch(
    mut store: impl AsContextMut<Data = RuntimeContext>,
    call: PendingCall,
) -> Result<HostValue, HostError> {
    let mut cx = store.as_context_mut();
    let event = cx.data_mut().begin_call(call)?;
    resume_guest(&mut cx).map_err(RuntimeError::into_host_error)?;
    cx.data_mut().finish_call(&event)
}

/// Call the `resume` export.
pub(crate) fn resume_guest(
    mut store: impl AsContextMut<Data = RuntimeContext>,
) -> Result<(), RuntimeError> {
    let mut cx = store.as_context_mut();
    cx.data().check_runnable()?;
    let resume = cx.data().exports()?.resume.clone();
    cx.data_mut().enter();
    let result = resume.call(&mut cx, ());
    cx.data_mut().leave();
    settle(&mut cx, result)
}

/// Turn the outcome of a guest call into the runtime's view of it.
///
/// A trap after `wasmExit` is the guest unwinding and is not an error.
/// Any other trap aborts the instance.
fn settle(
    mut store: impl AsContextMut<Data = RuntimeContext>,
    result: anyhow::Result<()>,
) -> Result<(), RuntimeError> {
    let Err(trap) = result else {
        return Ok(());
    };
    let mut cx = store.as_context_mut();
    if let Phase::Exited(code) = cx.data().phase() {
        debug!(code, "guest unwound after exit");
        return Ok(());
    }
    let err = classify_trap(trap);
    cx.data_mut().abort(err.to_string());
    Err(err)
}

fn classify_trap(err: anyhow::Error) -> RuntimeError {
    if let Some(bridge) = err.downcast_ref::<BridgeError>() {
        return RuntimeError::Bridge(bridge.clone());
    }
    if let Some(Trap::OutOfFuel) = err.downcast_ref::<Trap>() {
        return RuntimeError::FuelExhausted;
    }
    match err.downcast::<RuntimeError>() {
        Ok(runtime) => runtime,
        Err(other) => RuntimeError::GuestTrapped(format!("{other:#}")),
    }
}

/// Create a Wasmtime engine for Go guests.
fn create_engine(config: &RuntimeConfig) -> Result<Engine, RuntimeError> {
    let mut wasm_config = Config::new();

    if config.fuel_limit.is_some() {
        wasm_config.consume_fuel(true);
    }

    // Boxed references are NaN payloads; canonicalization would erase the
    // handle ids.
    wasm_config.cranelift_nan_canonicalization(false);
    wasm_config.wasm_threads(false);
    wasm_config.wasm_multi_memory(false);

    Ok(Engine::new(&wasm_config)?)
}

/// Lay out argv and env at `ARGV_BASE`: the NUL-terminated strings, each
/// 8-byte aligned, then an array of 8-byte pointer words holding argv, a
/// terminator, env `key=value` entries sorted by key and a terminator.
///
/// Returns `(argc, argv)` for the `run` export.
pub(crate) fn write_process_args(
    mem: &mut [u8],
    argv: &[String],
    env: &BTreeMap<String, String>,
) -> Result<(i32, i32), RuntimeError> {
    struct Writer<'a> {
        mem: &'a mut [u8],
        offset: usize,
    }

    impl Writer<'_> {
        fn put(&mut self, data: &[u8], pad_to: usize) -> Result<usize, RuntimeError> {
            let start = self.offset;
            let end = (start + data.len()).next_multiple_of(pad_to);
            if end >= MIN_DATA_ADDR {
                return Err(RuntimeError::ArgsTooLarge);
            }
            memory::write_bytes(self.mem, start, data)?;
            self.offset = end;
            Ok(start)
        }

        fn put_str(&mut self, s: &str) -> Result<u32, RuntimeError> {
            let mut bytes = Vec::with_capacity(s.len() + 1);
            bytes.extend_from_slice(s.as_bytes());
            bytes.push(0);
            Ok(self.put(&bytes, 8)? as u32)
        }
    }

    let mut writer = Writer {
        mem,
        offset: ARGV_BASE,
    };

    let mut pointers = Vec::with_capacity(argv.len() + env.len() + 2);
    for arg in argv {
        pointers.push(writer.put_str(arg)?);
    }
    pointers.push(0);
    for (key, value) in env {
        pointers.push(writer.put_str(&format!("{key}={value}"))?);
    }
    pointers.push(0);

    let argv_ptr = writer.offset;
    for ptr in pointers {
        writer.put(&u64::from(ptr).to_le_bytes(), 8)?;
    }
    Ok((argv.len() as i32, argv_ptr as i32))
}
