//! Shared test helpers for integration tests.
//!
//! Hand-written WAT guests that speak the Go js/wasm ABI the way the Go
//! runtime does: every import takes `sp`, operands and results sit at
//! fixed offsets above it, and values travel as boxed 8-byte words.
//!
//! Layout used by every guest:
//! - `sp` is fixed at 1024, so `sp+8` is 1032 and so on
//! - constant strings and argument arrays live at 256..400
//! - guest-private scratch words live at 512..1000

#![allow(dead_code)]

use gobridge_sandbox::{Runtime, RuntimeConfig};

/// Imports, memory, `getsp`, constants and small wrappers around the
/// `syscall/js` imports. Guests append their `run` and `resume`.
const PRELUDE: &str = r#"
    (import "gojs" "runtime.wasmExit" (func $wasmExit (param i32)))
    (import "gojs" "runtime.wasmWrite" (func $wasmWrite (param i32)))
    (import "gojs" "runtime.resetMemoryDataView" (func $resetMemoryDataView (param i32)))
    (import "gojs" "runtime.scheduleTimeoutEvent" (func $scheduleTimeoutEvent (param i32)))
    (import "gojs" "runtime.clearTimeoutEvent" (func $clearTimeoutEvent (param i32)))
    (import "gojs" "syscall/js.finalizeRef" (func $finalizeRef (param i32)))
    (import "gojs" "syscall/js.stringVal" (func $stringVal (param i32)))
    (import "gojs" "syscall/js.valueGet" (func $valueGet (param i32)))
    (import "gojs" "syscall/js.valueSet" (func $valueSet (param i32)))
    (import "gojs" "syscall/js.valueIndex" (func $valueIndex (param i32)))
    (import "gojs" "syscall/js.valueCall" (func $valueCall (param i32)))
    (import "gojs" "runtime.nanotime1" (func $nanotime1 (param i32)))
    (import "gojs" "runtime.walltime" (func $walltime (param i32)))
    (import "gojs" "runtime.getRandomData" (func $getRandomData (param i32)))
    (import "gojs" "syscall/js.valueDelete" (func $valueDelete (param i32)))
    (import "gojs" "syscall/js.valueSetIndex" (func $valueSetIndex (param i32)))
    (import "gojs" "syscall/js.valueInvoke" (func $valueInvoke (param i32)))
    (import "gojs" "syscall/js.valueNew" (func $valueNew (param i32)))
    (import "gojs" "syscall/js.valueLength" (func $valueLength (param i32)))
    (import "gojs" "syscall/js.valuePrepareString" (func $valuePrepareString (param i32)))
    (import "gojs" "syscall/js.valueLoadString" (func $valueLoadString (param i32)))
    (import "gojs" "syscall/js.valueInstanceOf" (func $valueInstanceOf (param i32)))
    (import "gojs" "syscall/js.copyBytesToGo" (func $copyBytesToGo (param i32)))
    (import "gojs" "syscall/js.copyBytesToJS" (func $copyBytesToJS (param i32)))

    (memory (export "mem") 1)
    (global $sp (mut i32) (i32.const 1024))
    (func (export "getsp") (result i32) (global.get $sp))

    ;; Boxed references to predefined handles.
    (global $null i64 (i64.const 0x7FF8000000000002))
    (global $true i64 (i64.const 0x7FF8000000000003))
    (global $false i64 (i64.const 0x7FF8000000000004))
    (global $global i64 (i64.const 0x7FF8000100000005))
    (global $runtime i64 (i64.const 0x7FF8000100000006))

    (data (i32.const 256) "_makeFuncWrapper")
    (data (i32.const 272) "processReader")
    (data (i32.const 288) "_pendingEvent")
    (data (i32.const 304) "args")
    (data (i32.const 308) "result")
    (data (i32.const 320) "\00\00\00\00\00\00\f0\3f")
    (data (i32.const 328) "\00\00\00\00\00\00\00\40\00\00\00\00\00\00\08\40")
    (data (i32.const 344) "hostFn")
    (data (i32.const 352) "ok")
    (data (i32.const 360) "hi\n")
    (data (i32.const 368) "fetch")
    (data (i32.const 384) "https://example.com")
    (data (i32.const 432) "Uint8Array")
    (data (i32.const 444) "abcd")
    (data (i32.const 448) "\00\00\00\00\00\00\10\40")
    (data (i32.const 456) "Array")

    ;; A new string value from guest bytes.
    (func $string (param $ptr i32) (param $len i32) (result i64)
        (i64.store (i32.const 1032) (i64.extend_i32_u (local.get $ptr)))
        (i64.store (i32.const 1040) (i64.extend_i32_u (local.get $len)))
        (call $stringVal (global.get $sp))
        (i64.load (i32.const 1048)))

    ;; target[key]
    (func $get (param $target i64) (param $key i32) (param $len i32) (result i64)
        (i64.store (i32.const 1032) (local.get $target))
        (i64.store (i32.const 1040) (i64.extend_i32_u (local.get $key)))
        (i64.store (i32.const 1048) (i64.extend_i32_u (local.get $len)))
        (call $valueGet (global.get $sp))
        (i64.load (i32.const 1056)))

    ;; target[key] = value
    (func $set (param $target i64) (param $key i32) (param $len i32) (param $value i64)
        (i64.store (i32.const 1032) (local.get $target))
        (i64.store (i32.const 1040) (i64.extend_i32_u (local.get $key)))
        (i64.store (i32.const 1048) (i64.extend_i32_u (local.get $len)))
        (i64.store (i32.const 1056) (local.get $value))
        (call $valueSet (global.get $sp)))

    ;; target[i]
    (func $index (param $target i64) (param $i i64) (result i64)
        (i64.store (i32.const 1032) (local.get $target))
        (i64.store (i32.const 1040) (local.get $i))
        (call $valueIndex (global.get $sp))
        (i64.load (i32.const 1048)))

    ;; target[name](...args). The ok flag is left at sp+64.
    (func $call (param $target i64) (param $name i32) (param $len i32)
                (param $args i32) (param $argc i32) (result i64)
        (i64.store (i32.const 1032) (local.get $target))
        (i64.store (i32.const 1040) (i64.extend_i32_u (local.get $name)))
        (i64.store (i32.const 1048) (i64.extend_i32_u (local.get $len)))
        (i64.store (i32.const 1056) (i64.extend_i32_u (local.get $args)))
        (i64.store (i32.const 1064) (i64.extend_i32_u (local.get $argc)))
        (i64.store (i32.const 1072) (i64.extend_i32_u (local.get $argc)))
        (call $valueCall (global.get $sp))
        (i64.load (i32.const 1080)))

    ;; globalThis.processReader = runtime._makeFuncWrapper(1)
    (func $register
        (call $set (global.get $global) (i32.const 272) (i32.const 13)
            (call $call (global.get $runtime) (i32.const 256) (i32.const 16)
                (i32.const 320) (i32.const 1))))

    ;; new target(...args)
    (func $new (param $target i64) (param $args i32) (param $argc i32) (result i64)
        (i64.store (i32.const 1032) (local.get $target))
        (i64.store (i32.const 1040) (i64.extend_i32_u (local.get $args)))
        (i64.store (i32.const 1048) (i64.extend_i32_u (local.get $argc)))
        (i64.store (i32.const 1056) (i64.extend_i32_u (local.get $argc)))
        (call $valueNew (global.get $sp))
        (i64.load (i32.const 1064)))

    ;; Take the pending event, or null if there is none.
    (func $take_event (result i64)
        (local $event i64)
        (local.set $event (call $get (global.get $runtime) (i32.const 288) (i32.const 13)))
        (if (i64.ne (local.get $event) (global.get $null))
            (then
                (call $set (global.get $runtime) (i32.const 288) (i32.const 13)
                    (global.get $null))))
        (local.get $event))
"#;

fn guest(body: &str) -> String {
    format!("(module {PRELUDE} {body})")
}

/// Registers `processReader` and answers every call with its first
/// argument.
pub fn echo_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (call $register))
        (func (export "resume")
            (local $event i64)
            (local.set $event (call $take_event))
            (if (i64.eq (local.get $event) (global.get $null)) (then (return)))
            (call $set (local.get $event) (i32.const 308) (i32.const 6)
                (call $index
                    (call $get (local.get $event) (i32.const 304) (i32.const 4))
                    (i64.const 0))))
        "#,
    )
}

/// Registers `processReader`; every call answers with
/// `globalThis.fetch("https://example.com")`.
pub fn fetch_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (call $register))
        (func (export "resume")
            (local $event i64)
            (local.set $event (call $take_event))
            (if (i64.eq (local.get $event) (global.get $null)) (then (return)))
            (i64.store (i32.const 536) (call $string (i32.const 384) (i32.const 19)))
            (call $set (local.get $event) (i32.const 308) (i32.const 6)
                (call $call (global.get $global) (i32.const 368) (i32.const 5)
                    (i32.const 536) (i32.const 1))))
        "#,
    )
}

/// Registers `processReader` but never picks up pending events.
pub fn unresponsive_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (call $register))
        (func (export "resume"))
        "#,
    )
}

/// Writes "hi\n" to stdout, exits with code 1 and traps while unwinding.
pub fn exit_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (i64.store (i32.const 1032) (i64.const 1))
            (i64.store (i32.const 1040) (i64.const 360))
            (i32.store (i32.const 1048) (i32.const 3))
            (call $wasmWrite (global.get $sp))
            (i32.store (i32.const 1032) (i32.const 1))
            (call $wasmExit (global.get $sp))
            unreachable)
        (func (export "resume"))
        "#,
    )
}

/// Calls `globalThis.hostFn(2, 3)` and stores the outcome in
/// `globalThis.result` and `globalThis.ok`.
pub fn host_call_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (local $ok i64)
            (call $set (global.get $global) (i32.const 308) (i32.const 6)
                (call $call (global.get $global) (i32.const 344) (i32.const 6)
                    (i32.const 328) (i32.const 2)))
            (local.set $ok
                (select (global.get $true) (global.get $false)
                    (i32.load8_u (i32.const 1088))))
            (call $set (global.get $global) (i32.const 352) (i32.const 2) (local.get $ok)))
        (func (export "resume"))
        "#,
    )
}

/// Schedules two 10 ms timeouts and cancels the first. Each resume
/// bumps the counter at 600 and acknowledges the second.
///
/// Scratch: 600 resume count, 608 first id, 612 second id.
pub fn timer_guest() -> String {
    guest(
        r#"
        (func $schedule (param $ms i64) (result i32)
            (i64.store (i32.const 1032) (local.get $ms))
            (call $scheduleTimeoutEvent (global.get $sp))
            (i32.load (i32.const 1040)))
        (func $clear (param $id i32)
            (i32.store (i32.const 1032) (local.get $id))
            (call $clearTimeoutEvent (global.get $sp)))
        (func (export "run") (param i32 i32)
            (i32.store (i32.const 608) (call $schedule (i64.const 10)))
            (i32.store (i32.const 612) (call $schedule (i64.const 10)))
            (call $clear (i32.load (i32.const 608))))
        (func (export "resume")
            (i32.store (i32.const 600) (i32.add (i32.load (i32.const 600)) (i32.const 1)))
            (call $clear (i32.load (i32.const 612))))
        "#,
    )
}

/// Schedules one timeout and never acknowledges it.
pub fn forgetful_timer_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (i64.store (i32.const 1032) (i64.const 1))
            (call $scheduleTimeoutEvent (global.get $sp)))
        (func (export "resume")
            (i32.store (i32.const 600) (i32.add (i32.load (i32.const 600)) (i32.const 1))))
        "#,
    )
}

/// Releases a handle that was never handed out.
pub fn bad_finalize_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (i32.store (i32.const 1032) (i32.const 999))
            (call $finalizeRef (global.get $sp)))
        (func (export "resume"))
        "#,
    )
}

/// Grows memory by one page, optionally refreshes the view, then sets
/// `globalThis.ok = true`.
pub fn growth_guest(reset: bool) -> String {
    let refresh = if reset {
        "(call $resetMemoryDataView (global.get $sp))"
    } else {
        ""
    };
    guest(&format!(
        r#"
        (func (export "run") (param i32 i32)
            (drop (memory.grow (i32.const 1)))
            {refresh}
            (call $set (global.get $global) (i32.const 352) (i32.const 2) (global.get $true)))
        (func (export "resume"))
        "#
    ))
}

/// Spins forever in `run`.
pub fn spinning_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (loop $spin (br $spin)))
        (func (export "resume"))
        "#,
    )
}

/// Moves bytes both ways through a `Uint8Array`.
///
/// Scratch: 640 new ok, 644/648 copyBytesToJS n/ok, 652 length,
/// 656 instanceof, 660..664 bytes copied back, 664/668 copyBytesToGo
/// n/ok, 672 ok when copying from a non-byte value.
pub fn bytes_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (local $ctor i64)
            (local $arr i64)
            (local.set $ctor (call $get (global.get $global) (i32.const 432) (i32.const 10)))
            (local.set $arr (call $new (local.get $ctor) (i32.const 448) (i32.const 1)))
            (i32.store (i32.const 640) (i32.load8_u (i32.const 1072)))

            ;; copyBytesToJS(arr, "abcd")
            (i64.store (i32.const 1032) (local.get $arr))
            (i64.store (i32.const 1040) (i64.const 444))
            (i64.store (i32.const 1048) (i64.const 4))
            (i64.store (i32.const 1056) (i64.const 4))
            (call $copyBytesToJS (global.get $sp))
            (i32.store (i32.const 644) (i32.wrap_i64 (i64.load (i32.const 1064))))
            (i32.store (i32.const 648) (i32.load8_u (i32.const 1072)))

            (i64.store (i32.const 1032) (local.get $arr))
            (call $valueLength (global.get $sp))
            (i32.store (i32.const 652) (i32.wrap_i64 (i64.load (i32.const 1040))))

            (i64.store (i32.const 1032) (local.get $arr))
            (i64.store (i32.const 1040) (local.get $ctor))
            (call $valueInstanceOf (global.get $sp))
            (i32.store (i32.const 656) (i32.load8_u (i32.const 1048)))

            ;; copyBytesToGo(mem[660..664], arr)
            (i64.store (i32.const 1032) (i64.const 660))
            (i64.store (i32.const 1040) (i64.const 4))
            (i64.store (i32.const 1048) (i64.const 4))
            (i64.store (i32.const 1056) (local.get $arr))
            (call $copyBytesToGo (global.get $sp))
            (i32.store (i32.const 664) (i32.wrap_i64 (i64.load (i32.const 1064))))
            (i32.store (i32.const 668) (i32.load8_u (i32.const 1072)))

            (i64.store (i32.const 1056) (global.get $global))
            (call $copyBytesToGo (global.get $sp))
            (i32.store (i32.const 672) (i32.load8_u (i32.const 1072))))
        (func (export "resume"))
        "#,
    )
}

/// Prepares "https://example.com" and loads it into 680..699.
///
/// Scratch: 676 prepared length.
pub fn string_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (i64.store (i32.const 1032) (call $string (i32.const 384) (i32.const 19)))
            (call $valuePrepareString (global.get $sp))
            (i32.store (i32.const 676) (i32.wrap_i64 (i64.load (i32.const 1048))))
            (i64.store (i32.const 1032) (i64.load (i32.const 1040)))
            (i64.store (i32.const 1040) (i64.const 680))
            (i64.store (i32.const 1048) (i64.const 19))
            (i64.store (i32.const 1056) (i64.const 19))
            (call $valueLoadString (global.get $sp)))
        (func (export "resume"))
        "#,
    )
}

/// Invokes `globalThis.hostFn(2, 3)` as a bare function and stores the
/// outcome in `globalThis.result` and `globalThis.ok`.
pub fn invoke_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (i64.store (i32.const 1032)
                (call $get (global.get $global) (i32.const 344) (i32.const 6)))
            (i64.store (i32.const 1040) (i64.const 328))
            (i64.store (i32.const 1048) (i64.const 2))
            (i64.store (i32.const 1056) (i64.const 2))
            (call $valueInvoke (global.get $sp))
            (call $set (global.get $global) (i32.const 352) (i32.const 2)
                (select (global.get $true) (global.get $false)
                    (i32.load8_u (i32.const 1072))))
            (call $set (global.get $global) (i32.const 308) (i32.const 6)
                (i64.load (i32.const 1064))))
        (func (export "resume"))
        "#,
    )
}

/// Builds `globalThis.result = new Array()` with `result[index] = 1`,
/// then deletes `globalThis.ok`.
pub fn props_guest(index: i64) -> String {
    guest(&format!(
        r#"
        (func (export "run") (param i32 i32)
            (local $arr i64)
            (local.set $arr
                (call $new
                    (call $get (global.get $global) (i32.const 456) (i32.const 5))
                    (i32.const 0) (i32.const 0)))
            (i64.store (i32.const 1032) (local.get $arr))
            (i64.store (i32.const 1040) (i64.const {index}))
            (i64.store (i32.const 1048) (i64.load (i32.const 320)))
            (call $valueSetIndex (global.get $sp))
            (call $set (global.get $global) (i32.const 308) (i32.const 6) (local.get $arr))

            (i64.store (i32.const 1032) (global.get $global))
            (i64.store (i32.const 1040) (i64.const 352))
            (i64.store (i32.const 1048) (i64.const 2))
            (call $valueDelete (global.get $sp)))
        (func (export "resume"))
        "#
    ))
}

/// Makes a string, releases it, then makes another.
///
/// Scratch: 700 first id, 704 second id.
pub fn finalize_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (local $first i64)
            (local.set $first (call $string (i32.const 360) (i32.const 3)))
            (i32.store (i32.const 700) (i32.wrap_i64 (local.get $first)))
            (i64.store (i32.const 1032) (local.get $first))
            (call $finalizeRef (global.get $sp))
            (i32.store (i32.const 704)
                (i32.wrap_i64 (call $string (i32.const 352) (i32.const 2)))))
        (func (export "resume"))
        "#,
    )
}

/// Fills 768..832 with random bytes and samples the clocks.
///
/// Scratch: 832/840 two nanotime readings, 848 wall seconds,
/// 856 wall nanoseconds.
pub fn clock_guest() -> String {
    guest(
        r#"
        (func (export "run") (param i32 i32)
            (i64.store (i32.const 1032) (i64.const 768))
            (i64.store (i32.const 1040) (i64.const 64))
            (i64.store (i32.const 1048) (i64.const 64))
            (call $getRandomData (global.get $sp))

            (call $nanotime1 (global.get $sp))
            (i64.store (i32.const 832) (i64.load (i32.const 1032)))
            (call $nanotime1 (global.get $sp))
            (i64.store (i32.const 840) (i64.load (i32.const 1032)))

            (call $walltime (global.get $sp))
            (i64.store (i32.const 848) (i64.load (i32.const 1032)))
            (i32.store (i32.const 856) (i32.load (i32.const 1040))))
        (func (export "resume"))
        "#,
    )
}

/// Same exports as every other guest, plus a WASI import.
pub fn wasi_guest() -> String {
    r#"
    (module
        (import "wasi_snapshot_preview1" "proc_exit" (func (param i32)))
        (memory (export "mem") 1)
        (func (export "run") (param i32 i32))
        (func (export "resume"))
        (func (export "getsp") (result i32) i32.const 1024))
    "#
    .to_string()
}

// ── Runtime Loaders ──

pub fn load(wat: &str) -> Runtime {
    load_with_config(wat, RuntimeConfig::default())
}

pub fn load_with_config(wat: &str, config: RuntimeConfig) -> Runtime {
    Runtime::new(wat.as_bytes(), config).expect("failed to load guest")
}

/// `len` bytes at `addr` of the guest's memory.
pub fn read_bytes(runtime: &Runtime, addr: usize, len: usize) -> Vec<u8> {
    let mem = runtime.memory().expect("memory released");
    mem[addr..addr + len].to_vec()
}

pub fn read_u64(runtime: &Runtime, addr: usize) -> u64 {
    u64::from_le_bytes(read_bytes(runtime, addr, 8).try_into().unwrap())
}

/// Little-endian u32 at `addr` of the guest's memory.
pub fn read_u32(runtime: &Runtime, addr: usize) -> u32 {
    let mem = runtime.memory().expect("memory released");
    u32::from_le_bytes(mem[addr..addr + 4].try_into().unwrap())
}
