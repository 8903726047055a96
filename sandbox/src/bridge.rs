//! Encode/decode primitives between guest memory and host values.
//!
//! A `Bridge` pairs a bounds-checked view of linear memory with the
//! reference table. It lives only for the duration of one import call.

use gobridge_hostapi::HostValue;

use crate::abi::NAN_ID;
use crate::boxed::BoxedValue;
use crate::error::BridgeError;
use crate::memory;
use crate::refs::ReferenceTable;

pub struct Bridge<'a> {
    mem: &'a mut [u8],
    refs: &'a mut ReferenceTable,
}

impl<'a> Bridge<'a> {
    pub fn new(mem: &'a mut [u8], refs: &'a mut ReferenceTable) -> Self {
        Self { mem, refs }
    }

    pub fn refs(&mut self) -> &mut ReferenceTable {
        self.refs
    }

    pub fn read_i32(&self, addr: usize) -> Result<i32, BridgeError> {
        memory::read_i32(self.mem, addr)
    }

    pub fn read_u32(&self, addr: usize) -> Result<u32, BridgeError> {
        memory::read_u32(self.mem, addr)
    }

    pub fn read_i64(&self, addr: usize) -> Result<i64, BridgeError> {
        memory::read_i64(self.mem, addr)
    }

    pub fn write_i64(&mut self, addr: usize, value: i64) -> Result<(), BridgeError> {
        memory::write_i64(self.mem, addr, value)
    }

    pub fn write_bool(&mut self, addr: usize, value: bool) -> Result<(), BridgeError> {
        memory::write_u8(self.mem, addr, u8::from(value))
    }

    /// Decode the boxed value at `addr`.
    pub fn load_value(&self, addr: usize) -> Result<HostValue, BridgeError> {
        match BoxedValue::decode(memory::read_u64(self.mem, addr)?) {
            BoxedValue::Undefined => Ok(HostValue::Undefined),
            BoxedValue::Number(n) => Ok(HostValue::Number(n)),
            BoxedValue::Ref { id, .. } => self.refs.get(id).cloned(),
        }
    }

    /// Box `value` at `addr`, taking a guest reference if it needs a handle.
    pub fn store_value(&mut self, addr: usize, value: &HostValue) -> Result<(), BridgeError> {
        memory::read_bytes(self.mem, addr, 8)?;
        let boxed = match value {
            HostValue::Undefined => BoxedValue::Undefined,
            HostValue::Number(n) if n.is_nan() => BoxedValue::Ref { id: NAN_ID, tag: 0 },
            HostValue::Number(n) if *n != 0.0 => BoxedValue::Number(*n),
            _ => match value.identity_key() {
                Some(key) => BoxedValue::Ref {
                    id: self.refs.acquire(key, value),
                    tag: value.type_flag() as u32,
                },
                None => BoxedValue::Undefined,
            },
        };
        memory::write_u64(self.mem, addr, boxed.encode())
    }

    fn slice_range(&self, addr: usize) -> Result<(usize, usize), BridgeError> {
        let ptr = memory::to_addr(self.read_i64(addr)?)?;
        let len = memory::to_addr(self.read_i64(addr + 8)?)?;
        Ok((ptr, len))
    }

    /// The `(ptr, len)` pair at `addr` as a borrowed byte slice.
    pub fn load_slice(&self, addr: usize) -> Result<&[u8], BridgeError> {
        let (ptr, len) = self.slice_range(addr)?;
        memory::read_bytes(self.mem, ptr, len)
    }

    pub fn load_slice_mut(&mut self, addr: usize) -> Result<&mut [u8], BridgeError> {
        let (ptr, len) = self.slice_range(addr)?;
        memory::bytes_mut(self.mem, ptr, len)
    }

    /// The `(ptr, len)` pair at `addr` as a sequence of boxed values.
    pub fn load_slice_of_values(&self, addr: usize) -> Result<Vec<HostValue>, BridgeError> {
        let (ptr, len) = self.slice_range(addr)?;
        let bytes = len.checked_mul(8).ok_or(BridgeError::OutOfBounds { addr: ptr, len })?;
        memory::read_bytes(self.mem, ptr, bytes)?;
        (0..len).map(|i| self.load_value(ptr + i * 8)).collect()
    }

    /// The `(ptr, len)` pair at `addr` decoded as UTF-8.
    ///
    /// Invalid sequences are replaced with U+FFFD.
    pub fn load_string(&self, addr: usize) -> Result<String, BridgeError> {
        Ok(String::from_utf8_lossy(self.load_slice(addr)?).into_owned())
    }
}
