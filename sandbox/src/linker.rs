//! Host function registration via Wasmtime linker.
//!
//! Registers every import of the Go js/wasm ABI under both the `gojs` and
//! `go` module names. Each import receives the guest stack pointer `sp`;
//! arguments and results live at fixed offsets from it. Each function:
//! 1. Reaches the `RuntimeContext` and guest memory through the Caller
//! 2. Decodes its operands through the bridge
//! 3. Performs the operation
//! 4. Encodes results back at their `sp` offsets
//!
//! ABI violations return an error, which traps the guest and aborts the
//! instance. Values thrown by host functions never trap: property access
//! logs them, the call family reports them with `ok = 0`.

use gobridge_hostapi::{call, construct, instance_of, HostObject, HostValue};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};
use wasmtime::{Caller, Linker};

use crate::abi::IMPORT_MODULES;
use crate::bridge::Bridge;
use crate::error::{BridgeError, RuntimeError};
use crate::host_impl::RuntimeContext;
use crate::memory;
use crate::runtime::StoreGuest;

type Import = fn(Caller<'_, RuntimeContext>, i32) -> anyhow::Result<()>;

/// Every `sp`-taking import, by name.
const IMPORTS: &[(&str, Import)] = &[
    ("runtime.wasmExit", wasm_exit),
    ("runtime.wasmWrite", wasm_write),
    ("runtime.resetMemoryDataView", reset_memory_data_view),
    ("runtime.nanotime1", nanotime1),
    ("runtime.walltime", walltime),
    ("runtime.scheduleTimeoutEvent", schedule_timeout_event),
    ("runtime.clearTimeoutEvent", clear_timeout_event),
    ("runtime.getRandomData", get_random_data),
    ("syscall/js.finalizeRef", finalize_ref),
    ("syscall/js.stringVal", string_val),
    ("syscall/js.valueGet", value_get),
    ("syscall/js.valueSet", value_set),
    ("syscall/js.valueDelete", value_delete),
    ("syscall/js.valueIndex", value_index),
    ("syscall/js.valueSetIndex", value_set_index),
    ("syscall/js.valueCall", value_call),
    ("syscall/js.valueInvoke", value_invoke),
    ("syscall/js.valueNew", value_new),
    ("syscall/js.valueLength", value_length),
    ("syscall/js.valuePrepareString", value_prepare_string),
    ("syscall/js.valueLoadString", value_load_string),
    ("syscall/js.valueInstanceOf", value_instance_of),
    ("syscall/js.copyBytesToGo", copy_bytes_to_go),
    ("syscall/js.copyBytesToJS", copy_bytes_to_js),
];

const DEBUG_IMPORT: &str = "debug";

/// Whether `name` is an import this host provides.
pub fn is_known_import(name: &str) -> bool {
    name == DEBUG_IMPORT || IMPORTS.iter().any(|(known, _)| *known == name)
}

/// Register all imports with the linker.
pub fn register_imports(linker: &mut Linker<RuntimeContext>) -> Result<(), RuntimeError> {
    for module in IMPORT_MODULES {
        for &(name, import) in IMPORTS {
            linker.func_wrap(module, name, import)?;
        }
        linker.func_wrap(module, DEBUG_IMPORT, debug_value)?;
    }
    Ok(())
}

/// The guest stack pointer as an unsigned address.
fn stack(sp: i32) -> usize {
    sp as u32 as usize
}

/// Run `f` against view-checked guest memory and the context.
fn with_memory<R>(
    caller: &mut Caller<'_, RuntimeContext>,
    f: impl FnOnce(&mut [u8], &mut RuntimeContext) -> Result<R, BridgeError>,
) -> anyhow::Result<R> {
    let memory = caller.data().exports()?.memory;
    let (mem, ctx) = memory.data_and_store_mut(caller);
    let mem = ctx.checked_memory(mem)?;
    Ok(f(mem, ctx)?)
}

/// Run `f` against the bridge.
fn with_bridge<R>(
    caller: &mut Caller<'_, RuntimeContext>,
    f: impl FnOnce(&mut Bridge<'_>) -> Result<R, BridgeError>,
) -> anyhow::Result<R> {
    let memory = caller.data().exports()?.memory;
    let (mem, ctx) = memory.data_and_store_mut(caller);
    let mut bridge = ctx.bridge(mem)?;
    Ok(f(&mut bridge)?)
}

/// The stack pointer after a call that may have re-entered the guest.
fn refresh_sp(caller: &mut Caller<'_, RuntimeContext>) -> anyhow::Result<usize> {
    caller.data().check_aborted()?;
    let getsp = caller.data().exports()?.getsp.clone();
    Ok(stack(getsp.call(&mut *caller, ())?))
}

// ── runtime ──

/// `wasmExit(code)`: end the instance with `code`.
fn wasm_exit(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    let code = with_memory(&mut caller, |mem, _| memory::read_i32(mem, sp + 8))?;
    caller.data_mut().exit(code);
    Ok(())
}

/// `wasmWrite(fd, p, n)`: forward guest output to stdout or stderr.
fn wasm_write(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_memory(&mut caller, |mem, ctx| {
        // fd, then a (ptr, len) pair with a 32-bit length
        let fd = memory::read_i64(mem, sp + 8)?;
        let ptr = memory::to_addr(memory::read_i64(mem, sp + 16)?)?;
        let len = memory::read_i32(mem, sp + 24)? as u32 as usize;
        ctx.write_output(fd, memory::read_bytes(mem, ptr, len)?);
        Ok(())
    })
}

/// `resetMemoryDataView()`: the guest acknowledges a memory growth.
fn reset_memory_data_view(mut caller: Caller<'_, RuntimeContext>, _sp: i32) -> anyhow::Result<()> {
    let memory = caller.data().exports()?.memory;
    let len = memory.data_size(&caller);
    caller.data_mut().reset_view(len);
    Ok(())
}

fn nanotime1(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_memory(&mut caller, |mem, ctx| {
        memory::write_i64(mem, sp + 8, ctx.nanotime())
    })
}

fn walltime(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_memory(&mut caller, |mem, ctx| {
        let (sec, nsec) = ctx.walltime();
        memory::write_i64(mem, sp + 8, sec)?;
        memory::write_i32(mem, sp + 16, nsec)
    })
}

fn schedule_timeout_event(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_memory(&mut caller, |mem, ctx| {
        let delay = memory::read_i64(mem, sp + 8)?;
        // Validate output pointer before registering the timer
        memory::read_bytes(mem, sp + 16, 4)?;
        let id = ctx.schedule_timeout(delay);
        memory::write_i32(mem, sp + 16, id)
    })
}

fn clear_timeout_event(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_memory(&mut caller, |mem, ctx| {
        ctx.clear_timeout(memory::read_i32(mem, sp + 8)?);
        Ok(())
    })
}

fn get_random_data(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        OsRng.fill_bytes(bridge.load_slice_mut(sp + 8)?);
        Ok(())
    })
}

// ── syscall/js: values and properties ──

/// `finalizeRef(v)`: drop one guest reference to a handle.
fn finalize_ref(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        // Only the low word of the boxed value carries the id
        let id = bridge.read_u32(sp + 8)?;
        bridge.refs().release(id)
    })
}

fn string_val(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let s = bridge.load_string(sp + 8)?;
        bridge.store_value(sp + 24, &HostValue::from(s))
    })
}

fn value_get(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let target = bridge.load_value(sp + 8)?;
        let key = bridge.load_string(sp + 16)?;
        // A thrown value is handed to the guest as the result
        let result = target.get(&key).unwrap_or_else(|thrown| {
            warn!(%key, error = %thrown.to_display_string(), "valueGet threw");
            thrown
        });
        bridge.store_value(sp + 32, &result)
    })
}

fn value_set(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let target = bridge.load_value(sp + 8)?;
        let key = bridge.load_string(sp + 16)?;
        let value = bridge.load_value(sp + 32)?;
        if let Err(thrown) = target.set(&key, value) {
            warn!(%key, error = %thrown.to_display_string(), "valueSet threw");
        }
        Ok(())
    })
}

fn value_delete(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let target = bridge.load_value(sp + 8)?;
        let key = bridge.load_string(sp + 16)?;
        if let Err(thrown) = target.delete(&key) {
            warn!(%key, error = %thrown.to_display_string(), "valueDelete threw");
        }
        Ok(())
    })
}

fn value_index(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let target = bridge.load_value(sp + 8)?;
        let index = bridge.read_i64(sp + 16)?;
        let result = target.get_index(index).unwrap_or_else(|thrown| {
            warn!(index, error = %thrown.to_display_string(), "valueIndex threw");
            thrown
        });
        bridge.store_value(sp + 24, &result)
    })
}

fn value_set_index(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let target = bridge.load_value(sp + 8)?;
        let index = bridge.read_i64(sp + 16)?;
        let value = bridge.load_value(sp + 24)?;
        if let Err(thrown) = target.set_index(index, value) {
            warn!(index, error = %thrown.to_display_string(), "valueSetIndex threw");
        }
        Ok(())
    })
}

// ── syscall/js: calls ──

/// Store a call outcome at `result_at`, with the ok flag at `ok_at`.
fn store_outcome(
    caller: &mut Caller<'_, RuntimeContext>,
    outcome: Result<HostValue, HostValue>,
    result_offset: usize,
    ok_offset: usize,
) -> anyhow::Result<()> {
    let sp = refresh_sp(caller)?;
    with_bridge(caller, |bridge| {
        let (value, ok) = match outcome {
            Ok(value) => (value, true),
            Err(thrown) => {
                debug!(error = %thrown.to_display_string(), "host call threw");
                (thrown, false)
            }
        };
        bridge.store_value(sp + result_offset, &value)?;
        bridge.write_bool(sp + ok_offset, ok)
    })
}

/// `valueCall(v, m, args)`: call method `m` of `v` with `v` as receiver.
fn value_call(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    let (target, name, args) = with_bridge(&mut caller, |bridge| {
        Ok((
            bridge.load_value(sp + 8)?,
            bridge.load_string(sp + 16)?,
            bridge.load_slice_of_values(sp + 32)?,
        ))
    })?;
    // The callee may re-enter the guest and move its stack
    caller.data_mut().begin_host_call();
    let outcome = target.get(&name).and_then(|method| {
        let mut guest = StoreGuest::new(&mut caller);
        call(&mut guest, &method, target.clone(), args)
    });
    caller.data_mut().end_host_call();
    store_outcome(&mut caller, outcome, 56, 64)
}

/// `valueInvoke(v, args)`: call `v` itself with an undefined receiver.
fn value_invoke(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    let (target, args) = with_bridge(&mut caller, |bridge| {
        Ok((
            bridge.load_value(sp + 8)?,
            bridge.load_slice_of_values(sp + 16)?,
        ))
    })?;
    caller.data_mut().begin_host_call();
    let mut guest = StoreGuest::new(&mut caller);
    let outcome = call(&mut guest, &target, HostValue::Undefined, args);
    caller.data_mut().end_host_call();
    store_outcome(&mut caller, outcome, 40, 48)
}

/// `valueNew(v, args)`: `new v(...args)`.
fn value_new(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    let (target, args) = with_bridge(&mut caller, |bridge| {
        Ok((
            bridge.load_value(sp + 8)?,
            bridge.load_slice_of_values(sp + 16)?,
        ))
    })?;
    caller.data_mut().begin_host_call();
    let mut guest = StoreGuest::new(&mut caller);
    let outcome = construct(&mut guest, &target, args);
    caller.data_mut().end_host_call();
    store_outcome(&mut caller, outcome, 40, 48)
}

// ── syscall/js: strings, bytes, instanceof ──

fn value_length(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let target = bridge.load_value(sp + 8)?;
        let len = target.length().unwrap_or_else(|thrown| {
            warn!(error = %thrown.to_display_string(), "valueLength threw");
            0
        });
        bridge.write_i64(sp + 16, len)
    })
}

fn value_prepare_string(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        // Hand back the UTF-8 bytes as an opaque value plus their length
        let text = bridge.load_value(sp + 8)?.to_display_string().into_bytes();
        let len = text.len() as i64;
        bridge.store_value(sp + 16, &HostObject::bytes(text).into())?;
        bridge.write_i64(sp + 24, len)
    })
}

fn value_load_string(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let source = bridge.load_value(sp + 8)?;
        let dst = bridge.load_slice_mut(sp + 16)?;
        let copied = source.as_object().and_then(|obj| {
            obj.with_bytes(|src| {
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
            })
        });
        if copied.is_none() {
            warn!("valueLoadString: source is not a prepared string");
        }
        Ok(())
    })
}

fn value_instance_of(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let value = bridge.load_value(sp + 8)?;
        let target = bridge.load_value(sp + 16)?;
        let result = instance_of(&value, &target).unwrap_or_else(|thrown| {
            warn!(error = %thrown.to_display_string(), "valueInstanceOf threw");
            false
        });
        bridge.write_bool(sp + 24, result)
    })
}

/// `copyBytesToGo(dst, src)`: copy out of a `Uint8Array`.
fn copy_bytes_to_go(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        // Copy min(len(dst), src.length); ok = 0 when src is not byte-backed
        let source = bridge.load_value(sp + 32)?;
        let dst = bridge.load_slice_mut(sp + 8)?;
        let copied = source.as_object().and_then(|obj| {
            obj.with_bytes(|src| {
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
                n
            })
        });
        match copied {
            Some(n) => {
                bridge.write_i64(sp + 40, n as i64)?;
                bridge.write_bool(sp + 48, true)
            }
            None => bridge.write_bool(sp + 48, false),
        }
    })
}

/// `copyBytesToJS(dst, src)`: copy into a `Uint8Array`.
fn copy_bytes_to_js(mut caller: Caller<'_, RuntimeContext>, sp: i32) -> anyhow::Result<()> {
    let sp = stack(sp);
    with_bridge(&mut caller, |bridge| {
        let target = bridge.load_value(sp + 8)?;
        let src = bridge.load_slice(sp + 16)?;
        let copied = target.as_object().and_then(|obj| {
            obj.with_bytes_mut(|dst| {
                let n = src.len().min(dst.len());
                dst[..n].copy_from_slice(&src[..n]);
                n
            })
        });
        match copied {
            Some(n) => {
                bridge.write_i64(sp + 40, n as i64)?;
                bridge.write_bool(sp + 48, true)
            }
            None => bridge.write_bool(sp + 48, false),
        }
    })
}

fn debug_value(_caller: Caller<'_, RuntimeContext>, value: i32) {
    debug!(value, "guest debug");
}
