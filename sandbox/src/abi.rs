//! Constants of the Go js/wasm host ABI.

/// High word of every boxed reference: a quiet NaN.
pub const NAN_HEAD: u32 = 0x7FF8_0000;

/// Start of the argv/env block written before `run`.
pub const ARGV_BASE: usize = 4096;

/// First address of the guest's static data. The argv/env block must end
/// below it.
pub const MIN_DATA_ADDR: usize = 4096 + 8192;

/// Import module names: `gojs` for current toolchains, `go` for older ones.
pub const IMPORT_MODULES: [&str; 2] = ["gojs", "go"];

pub const MEMORY_EXPORT: &str = "mem";
pub const RUN_EXPORT: &str = "run";
pub const RESUME_EXPORT: &str = "resume";
pub const GETSP_EXPORT: &str = "getsp";

/// Bytes per Wasm page.
pub const PAGE_SIZE: u64 = 65536;

// Predefined reference table slots.
pub const NAN_ID: u32 = 0;
pub const ZERO_ID: u32 = 1;
pub const NULL_ID: u32 = 2;
pub const TRUE_ID: u32 = 3;
pub const FALSE_ID: u32 = 4;
pub const GLOBAL_ID: u32 = 5;
pub const RUNTIME_ID: u32 = 6;
