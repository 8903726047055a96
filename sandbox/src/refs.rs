//! The reference table: host values the guest holds numeric handles to.
//!
//! Slots 0..=6 are predefined and never released. Every other handle
//! carries a count of the references the guest holds; it is incremented
//! on every store and decremented by `finalizeRef`. At zero the slot is
//! cleared, the reverse mapping removed and the id pushed on a LIFO free
//! list for reuse.

use std::collections::HashMap;

use gobridge_hostapi::{HostObject, HostValue, ValueKey};
use tracing::trace;

use crate::error::BridgeError;

/// Number of references the guest holds to a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefCount {
    /// Predefined slots.
    Immortal,
    Live(u32),
}

#[derive(Debug)]
struct Slot {
    value: HostValue,
    key: Option<ValueKey>,
    count: RefCount,
}

#[derive(Debug)]
pub struct ReferenceTable {
    slots: Vec<Option<Slot>>,
    ids: HashMap<ValueKey, u32>,
    free: Vec<u32>,
}

impl ReferenceTable {
    /// A table holding only the predefined values, in slot order.
    pub fn new(global: HostObject, runtime: HostObject) -> Self {
        let predefined = [
            HostValue::Number(f64::NAN),
            HostValue::Number(0.0),
            HostValue::Null,
            HostValue::Bool(true),
            HostValue::Bool(false),
            HostValue::Object(global),
            HostValue::Object(runtime),
        ];
        let mut table = Self {
            slots: Vec::with_capacity(predefined.len()),
            ids: HashMap::new(),
            free: Vec::new(),
        };
        for value in predefined {
            let key = value.identity_key();
            if let Some(key) = &key {
                table.ids.insert(key.clone(), table.slots.len() as u32);
            }
            table.slots.push(Some(Slot {
                value,
                key,
                count: RefCount::Immortal,
            }));
        }
        table
    }

    /// The handle for `value`, allocating one if needed, with its count
    /// incremented.
    pub fn acquire(&mut self, key: ValueKey, value: &HostValue) -> u32 {
        if let Some(&id) = self.ids.get(&key) {
            if let Some(Some(slot)) = self.slots.get_mut(id as usize) {
                if let RefCount::Live(n) = &mut slot.count {
                    *n += 1;
                }
            }
            return id;
        }

        let id = self.free.pop().unwrap_or(self.slots.len() as u32);
        let slot = Slot {
            value: value.clone(),
            key: Some(key.clone()),
            count: RefCount::Live(1),
        };
        match self.slots.get_mut(id as usize) {
            Some(entry) => *entry = Some(slot),
            None => self.slots.push(Some(slot)),
        }
        self.ids.insert(key, id);
        trace!(id, "allocated handle");
        id
    }

    pub fn get(&self, id: u32) -> Result<&HostValue, BridgeError> {
        match self.slots.get(id as usize) {
            Some(Some(slot)) => Ok(&slot.value),
            _ => Err(BridgeError::UnknownHandle(id)),
        }
    }

    /// Drop one guest reference to `id`.
    pub fn release(&mut self, id: u32) -> Result<(), BridgeError> {
        let entry = self
            .slots
            .get_mut(id as usize)
            .ok_or(BridgeError::UnknownHandle(id))?;
        let slot = entry.as_mut().ok_or(BridgeError::UnknownHandle(id))?;
        match &mut slot.count {
            RefCount::Immortal => return Ok(()),
            RefCount::Live(n) => {
                *n -= 1;
                if *n > 0 {
                    return Ok(());
                }
            }
        }
        if let Some(key) = entry.take().and_then(|slot| slot.key) {
            self.ids.remove(&key);
        }
        self.free.push(id);
        trace!(id, "released handle");
        Ok(())
    }

    pub fn ref_count(&self, id: u32) -> Option<RefCount> {
        match self.slots.get(id as usize) {
            Some(Some(slot)) => Some(slot.count),
            _ => None,
        }
    }

    /// Number of occupied slots, predefined ones included.
    pub fn live_handles(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
