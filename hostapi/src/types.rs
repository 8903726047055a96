//! Data exchanged between the host and the guest runtime.

use crate::object::HostObject;
use crate::value::HostValue;

/// One in-flight host→guest call into a guest-registered function.
#[derive(Debug, Clone)]
pub struct PendingCall {
    /// The id passed to `_makeFuncWrapper` when the guest created the
    /// wrapper.
    pub id: u32,
    pub this: HostValue,
    pub args: Vec<HostValue>,
}

impl PendingCall {
    /// The event object the guest reads from `_pendingEvent`.
    ///
    /// The guest writes its return value to the `result` property.
    pub fn into_event(self) -> HostObject {
        let event = HostObject::ordinary();
        event.set("id", HostValue::Number(f64::from(self.id)));
        event.set("this", self.this);
        event.set("args", HostObject::array(self.args).into());
        event
    }
}
