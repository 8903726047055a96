//! Per-instance mutable state held in the Wasmtime Store.
//!
//! `RuntimeContext` combines the reference table, memory view, timers,
//! clocks and lifecycle phase into a single struct that lives inside
//! `Store<RuntimeContext>` for the lifetime of one guest instance. Every
//! import reaches it through its `Caller`.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use gobridge_hostapi::{new_global, HostError, HostObject, HostValue, PendingCall};
use tracing::{debug, error, info, warn};
use wasmtime::{AsContextMut, Instance, Memory, StoreLimits, StoreLimitsBuilder, TypedFunc};

use crate::abi::{GETSP_EXPORT, MEMORY_EXPORT, PAGE_SIZE, RESUME_EXPORT, RUN_EXPORT};
use crate::bridge::Bridge;
use crate::config::RuntimeConfig;
use crate::error::{BridgeError, RuntimeError};
use crate::memory::MemoryView;
use crate::refs::ReferenceTable;
use crate::timers::TimerRegistry;

/// Lifecycle of a guest instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Unstarted,
    /// Guest code is executing.
    Running,
    /// Control is with the host: the guest returned from `run` or
    /// `resume`, or is blocked in a call to a host function value.
    Suspended,
    Exited(i32),
    /// A fatal ABI violation or trap ended the instance.
    Aborted(String),
}

/// The guest exports the host calls into.
#[derive(Clone)]
pub struct GuestExports {
    pub memory: Memory,
    pub run: TypedFunc<(i32, i32), ()>,
    pub resume: TypedFunc<(), ()>,
    pub getsp: TypedFunc<(), i32>,
}

impl GuestExports {
    pub fn resolve(
        instance: &Instance,
        mut store: impl AsContextMut,
    ) -> Result<Self, RuntimeError> {
        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or_else(|| RuntimeError::Validation(format!("no '{MEMORY_EXPORT}' export")))?;
        Ok(Self {
            memory,
            run: instance.get_typed_func(&mut store, RUN_EXPORT)?,
            resume: instance.get_typed_func(&mut store, RESUME_EXPORT)?,
            getsp: instance.get_typed_func(&mut store, GETSP_EXPORT)?,
        })
    }
}

/// Wall-clock origin fixed at startup plus monotonic elapsed time.
struct Clock {
    origin_ns: i64,
    started: Instant,
}

impl Clock {
    fn new() -> Self {
        let origin_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Self {
            origin_ns,
            started: Instant::now(),
        }
    }

    fn nanotime(&self) -> i64 {
        self.origin_ns + self.started.elapsed().as_nanos() as i64
    }
}

/// Per-instance state held in the Wasmtime `Store`.
pub struct RuntimeContext {
    phase: Phase,
    exports: Option<GuestExports>,
    refs: Option<ReferenceTable>,
    view: MemoryView,
    pub(crate) timers: TimerRegistry,
    global: HostObject,
    runtime_object: HostObject,
    clock: Clock,
    capture_output: bool,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_handler: Box<dyn FnMut(i32)>,
    pub(crate) limits: StoreLimits,
}

/// The object behind handle 6: `_pendingEvent` and `_makeFuncWrapper`.
fn new_runtime_object() -> HostObject {
    let runtime = HostObject::ordinary();
    runtime.set("_pendingEvent", HostValue::Null);
    runtime.set(
        "_makeFuncWrapper",
        HostObject::function("_makeFuncWrapper", |_, inv| {
            let id = inv.arg(0).as_number().unwrap_or(0.0) as u32;
            let wrapper = HostObject::function("wrapper", move |guest, inv| {
                guest
                    .dispatch(PendingCall {
                        id,
                        this: inv.this,
                        args: inv.args,
                    })
                    .map_err(|e| e.to_thrown())
            });
            Ok(wrapper.into())
        })
        .into(),
    );
    runtime
}

impl RuntimeContext {
    pub fn new(config: &RuntimeConfig) -> Self {
        let max_bytes = u64::from(config.max_memory_pages) * PAGE_SIZE;
        Self {
            phase: Phase::Unstarted,
            exports: None,
            refs: None,
            view: MemoryView::default(),
            timers: TimerRegistry::new(),
            global: new_global(),
            runtime_object: new_runtime_object(),
            clock: Clock::new(),
            capture_output: config.capture_output,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_handler: Box::new(|code| {
                if code != 0 {
                    warn!(code, "exit code");
                }
            }),
            limits: StoreLimitsBuilder::new()
                .memory_size(usize::try_from(max_bytes).unwrap_or(usize::MAX))
                .trap_on_grow_failure(true)
                .build(),
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn global(&self) -> &HostObject {
        &self.global
    }

    pub fn runtime_object(&self) -> &HostObject {
        &self.runtime_object
    }

    pub fn attach(&mut self, exports: GuestExports) {
        self.exports = Some(exports);
    }

    pub fn exports(&self) -> Result<&GuestExports, BridgeError> {
        self.exports.as_ref().ok_or(BridgeError::Released)
    }

    pub fn refs(&self) -> Option<&ReferenceTable> {
        self.refs.as_ref()
    }

    /// Set up the reference table and memory view ahead of `run`.
    pub fn start(&mut self, mem_len: usize) {
        self.refs = Some(ReferenceTable::new(
            self.global.clone(),
            self.runtime_object.clone(),
        ));
        self.view = MemoryView::acquire(mem_len);
    }

    /// Bounds-checked memory, failing if the view has gone stale.
    pub fn checked_memory<'a>(&self, mem: &'a mut [u8]) -> Result<&'a mut [u8], BridgeError> {
        self.view.bind(mem)
    }

    pub fn bridge<'a>(&'a mut self, mem: &'a mut [u8]) -> Result<Bridge<'a>, BridgeError> {
        let mem = self.view.bind(mem)?;
        let refs = self.refs.as_mut().ok_or(BridgeError::Released)?;
        Ok(Bridge::new(mem, refs))
    }

    pub fn reset_view(&mut self, mem_len: usize) {
        debug!(bytes = mem_len, "memory view refreshed");
        self.view = MemoryView::acquire(mem_len);
    }

    // ── Lifecycle ──

    pub fn set_exit_handler(&mut self, handler: Box<dyn FnMut(i32)>) {
        self.exit_handler = handler;
    }

    /// Guest called `wasmExit`.
    pub fn exit(&mut self, code: i32) {
        info!(code, "guest exited");
        self.phase = Phase::Exited(code);
        self.release();
        (self.exit_handler)(code);
    }

    /// End the instance after a fatal error. The first reason wins.
    pub fn abort(&mut self, reason: String) {
        if matches!(self.phase, Phase::Exited(_) | Phase::Aborted(_)) {
            return;
        }
        error!(%reason, "aborting guest");
        self.phase = Phase::Aborted(reason);
        self.release();
    }

    fn release(&mut self) {
        self.refs = None;
        self.exports = None;
        self.timers.clear_all();
        self.runtime_object.set("_pendingEvent", HostValue::Null);
    }

    /// Fail unless the guest can be entered.
    pub fn check_runnable(&self) -> Result<(), RuntimeError> {
        match &self.phase {
            Phase::Unstarted => Err(RuntimeError::NotStarted),
            Phase::Exited(_) => Err(RuntimeError::AlreadyExited),
            Phase::Aborted(reason) => Err(RuntimeError::Aborted(reason.clone())),
            Phase::Running | Phase::Suspended => Ok(()),
        }
    }

    pub fn check_aborted(&self) -> Result<(), RuntimeError> {
        match &self.phase {
            Phase::Aborted(reason) => Err(RuntimeError::Aborted(reason.clone())),
            _ => Ok(()),
        }
    }

    pub fn enter(&mut self) {
        self.phase = Phase::Running;
    }

    /// The guest handed control back, from either `run`/`resume` or a
    /// nested `resume` inside a host function.
    pub fn leave(&mut self) {
        if self.phase == Phase::Running {
            self.phase = Phase::Suspended;
        }
    }

    /// `valueCall`, `valueInvoke` and `valueNew` hand control to a host
    /// function for the duration of the call.
    pub fn begin_host_call(&mut self) {
        self.leave();
    }

    pub fn end_host_call(&mut self) {
        if self.phase == Phase::Suspended {
            self.phase = Phase::Running;
        }
    }

    // ── Host→guest calls ──

    /// Publish `call` as the pending event.
    pub fn begin_call(&mut self, call: PendingCall) -> Result<HostObject, HostError> {
        self.check_runnable().map_err(RuntimeError::into_host_error)?;
        if !matches!(self.runtime_object.get("_pendingEvent"), HostValue::Null) {
            return Err(HostError::CallOutstanding);
        }
        debug!(id = call.id, "dispatching call into guest");
        let event = call.into_event();
        self.runtime_object
            .set("_pendingEvent", event.clone().into());
        Ok(event)
    }

    /// Collect the result of `event` after the guest has been resumed.
    pub fn finish_call(&mut self, event: &HostObject) -> Result<HostValue, HostError> {
        if let HostValue::Object(pending) = self.runtime_object.get("_pendingEvent") {
            if pending.ptr_eq(event) {
                self.runtime_object.set("_pendingEvent", HostValue::Null);
                return Err(HostError::CallNotConsumed);
            }
        }
        Ok(event.get("result"))
    }

    // ── Timers & clocks ──

    pub fn schedule_timeout(&mut self, delay_ms: i64) -> i32 {
        let id = self.timers.schedule(Instant::now(), delay_ms);
        debug!(id, delay_ms, "timeout scheduled");
        id
    }

    pub fn clear_timeout(&mut self, id: i32) {
        if self.timers.clear(id) {
            debug!(id, "timeout cleared");
        }
    }

    pub fn nanotime(&self) -> i64 {
        self.clock.nanotime()
    }

    /// Seconds and nanoseconds since the Unix epoch.
    pub fn walltime(&self) -> (i64, i32) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        (now.as_secs() as i64, now.subsec_nanos() as i32)
    }

    // ── Output ──

    pub fn write_output(&mut self, fd: i64, bytes: &[u8]) {
        let text = String::from_utf8_lossy(bytes);
        let line = text.trim_end_matches('\n');
        match fd {
            1 => {
                info!(target: "gobridge::stdout", "{line}");
                if self.capture_output {
                    self.stdout.extend_from_slice(bytes);
                }
            }
            2 => {
                error!(target: "gobridge::stderr", "{line}");
                if self.capture_output {
                    self.stderr.extend_from_slice(bytes);
                }
            }
            _ => debug!(fd, "dropping write to unknown descriptor"),
        }
    }

    pub fn stdout(&self) -> &[u8] {
        &self.stdout
    }

    pub fn stderr(&self) -> &[u8] {
        &self.stderr
    }
}
