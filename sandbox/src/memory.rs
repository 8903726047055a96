//! Bounds-checked access to the guest's linear memory.
//!
//! All functions validate the address range against the current memory
//! size before touching it. Out-of-bounds access is an ABI violation and
//! returns `BridgeError::OutOfBounds`.
//!
//! Integers are little-endian. 64-bit integers are a low `u32` word
//! followed by a sign-extended high `i32` word.

use crate::error::BridgeError;

/// Validate that `[addr, addr+len)` is within memory bounds.
fn range(mem_len: usize, addr: usize, len: usize) -> Result<std::ops::Range<usize>, BridgeError> {
    let end = addr
        .checked_add(len)
        .ok_or(BridgeError::OutOfBounds { addr, len })?;
    if end > mem_len {
        return Err(BridgeError::OutOfBounds { addr, len });
    }
    Ok(addr..end)
}

/// Convert a guest-supplied 64-bit address or length to `usize`.
pub fn to_addr(value: i64) -> Result<usize, BridgeError> {
    usize::try_from(value).map_err(|_| BridgeError::OutOfBounds {
        addr: value as usize,
        len: 0,
    })
}

/// Borrow `len` bytes of guest memory at `addr`.
pub fn read_bytes(mem: &[u8], addr: usize, len: usize) -> Result<&[u8], BridgeError> {
    let r = range(mem.len(), addr, len)?;
    Ok(&mem[r])
}

/// Mutably borrow `len` bytes of guest memory at `addr`.
pub fn bytes_mut(mem: &mut [u8], addr: usize, len: usize) -> Result<&mut [u8], BridgeError> {
    let r = range(mem.len(), addr, len)?;
    Ok(&mut mem[r])
}

/// Write `data` bytes to guest memory at `addr`.
pub fn write_bytes(mem: &mut [u8], addr: usize, data: &[u8]) -> Result<(), BridgeError> {
    bytes_mut(mem, addr, data.len())?.copy_from_slice(data);
    Ok(())
}

/// Read `N` bytes at `addr` into an owned array.
fn read_array<const N: usize>(mem: &[u8], addr: usize) -> Result<[u8; N], BridgeError> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_bytes(mem, addr, N)?);
    Ok(out)
}

/// Write one byte, e.g. an `ok` flag, at `addr`.
pub fn write_u8(mem: &mut [u8], addr: usize, value: u8) -> Result<(), BridgeError> {
    write_bytes(mem, addr, &[value])
}

/// Read a u32 value (little-endian) from guest memory at `addr`.
pub fn read_u32(mem: &[u8], addr: usize) -> Result<u32, BridgeError> {
    Ok(u32::from_le_bytes(read_array(mem, addr)?))
}

/// Write a u32 value (little-endian) to guest memory at `addr`.
pub fn write_u32(mem: &mut [u8], addr: usize, value: u32) -> Result<(), BridgeError> {
    write_bytes(mem, addr, &value.to_le_bytes())
}

/// Read an i32 value (little-endian) from guest memory at `addr`.
pub fn read_i32(mem: &[u8], addr: usize) -> Result<i32, BridgeError> {
    Ok(i32::from_le_bytes(read_array(mem, addr)?))
}

/// Write an i32 value (little-endian) to guest memory at `addr`.
pub fn write_i32(mem: &mut [u8], addr: usize, value: i32) -> Result<(), BridgeError> {
    write_bytes(mem, addr, &value.to_le_bytes())
}

/// Read an i64 as written by the Go runtime: low word, then high word.
pub fn read_i64(mem: &[u8], addr: usize) -> Result<i64, BridgeError> {
    let low = read_u32(mem, addr)?;
    let high = read_i32(mem, addr + 4)?;
    Ok((i64::from(high) << 32) | i64::from(low))
}

/// Write an i64 as a low word and a high word.
pub fn write_i64(mem: &mut [u8], addr: usize, value: i64) -> Result<(), BridgeError> {
    // Check the whole word first so a failed write leaves memory untouched
    range(mem.len(), addr, 8)?;
    write_u32(mem, addr, value as u32)?;
    write_i32(mem, addr + 4, (value >> 32) as i32)
}

/// Read a raw 8-byte word, e.g. a boxed value.
pub fn read_u64(mem: &[u8], addr: usize) -> Result<u64, BridgeError> {
    Ok(u64::from_le_bytes(read_array(mem, addr)?))
}

/// Write a raw 8-byte word.
pub fn write_u64(mem: &mut [u8], addr: usize, value: u64) -> Result<(), BridgeError> {
    write_bytes(mem, addr, &value.to_le_bytes())
}

/// The memory length the host last observed.
///
/// Growing memory invalidates the view until the guest calls
/// `resetMemoryDataView`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryView {
    len: usize,
}

impl MemoryView {
    pub fn acquire(mem_len: usize) -> Self {
        Self { len: mem_len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bind the view to the live memory, failing if it has gone stale.
    pub fn bind<'a>(&self, mem: &'a mut [u8]) -> Result<&'a mut [u8], BridgeError> {
        if mem.len() != self.len {
            return Err(BridgeError::StaleView {
                view: self.len,
                actual: mem.len(),
            });
        }
        Ok(mem)
    }
}
