//! Host objects and native functions.
//!
//! A `HostObject` is a shared, mutable object with an optional prototype
//! link. Identity matters: the reference table deduplicates objects by
//! pointer, and `instanceof` walks prototype links by pointer.
//!
//! Native functions never hold a `RefCell` borrow while they run, so a
//! callee may freely read and write the object it was called on.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::error::type_error;
use crate::traits::GuestApi;
use crate::value::HostValue;

/// Signature of a native function body.
///
/// `Ok` is the return value, `Err` is the thrown value.
pub type NativeFn = dyn Fn(&mut dyn GuestApi, Invocation) -> Result<HostValue, HostValue>;

/// Receiver and arguments of one native function call.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub this: HostValue,
    pub args: Vec<HostValue>,
    /// Set when invoked through `new`.
    pub construct: bool,
}

impl Invocation {
    /// Argument `index`, or undefined when missing.
    pub fn arg(&self, index: usize) -> HostValue {
        self.args.get(index).cloned().unwrap_or_default()
    }
}

pub struct NativeFunction {
    name: String,
    body: Rc<NativeFn>,
    constructible: bool,
}

/// Internal slot of an object.
pub enum ObjectKind {
    Ordinary,
    Array(Vec<HostValue>),
    Bytes(Vec<u8>),
    Function(NativeFunction),
    Error,
}

/// Data-free discriminant of [`ObjectKind`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClass {
    Ordinary,
    Array,
    Bytes,
    Function,
    Error,
}

pub struct Object {
    kind: ObjectKind,
    proto: Option<HostObject>,
    properties: BTreeMap<String, HostValue>,
}

/// Shared handle to an [`Object`].
#[derive(Clone)]
pub struct HostObject(Rc<RefCell<Object>>);

impl HostObject {
    pub fn new(kind: ObjectKind, proto: Option<HostObject>) -> Self {
        Self(Rc::new(RefCell::new(Object {
            kind,
            proto,
            properties: BTreeMap::new(),
        })))
    }

    pub fn ordinary() -> Self {
        Self::new(ObjectKind::Ordinary, None)
    }

    pub fn array(items: Vec<HostValue>) -> Self {
        Self::new(ObjectKind::Array(items), None)
    }

    pub fn bytes(data: Vec<u8>) -> Self {
        Self::new(ObjectKind::Bytes(data), None)
    }

    /// An error object with `name` and `message` properties.
    pub fn error(name: &str, message: impl Into<String>) -> Self {
        let obj = Self::new(ObjectKind::Error, None);
        obj.set("name", HostValue::from(name));
        obj.set("message", HostValue::from(message.into()));
        obj
    }

    /// A plain (non-constructible) native function.
    pub fn function<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut dyn GuestApi, Invocation) -> Result<HostValue, HostValue> + 'static,
    {
        Self::new(
            ObjectKind::Function(NativeFunction {
                name: name.to_owned(),
                body: Rc::new(body),
                constructible: false,
            }),
            None,
        )
    }

    /// A constructible native function with a fresh `prototype` object.
    pub fn constructor<F>(name: &str, body: F) -> Self
    where
        F: Fn(&mut dyn GuestApi, Invocation) -> Result<HostValue, HostValue> + 'static,
    {
        let ctor = Self::new(
            ObjectKind::Function(NativeFunction {
                name: name.to_owned(),
                body: Rc::new(body),
                constructible: true,
            }),
            None,
        );
        ctor.set("prototype", HostObject::ordinary().into());
        ctor
    }

    pub fn ptr_eq(&self, other: &HostObject) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Pointer identity, stable for as long as this object is alive.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn class(&self) -> ObjectClass {
        match self.0.borrow().kind {
            ObjectKind::Ordinary => ObjectClass::Ordinary,
            ObjectKind::Array(_) => ObjectClass::Array,
            ObjectKind::Bytes(_) => ObjectClass::Bytes,
            ObjectKind::Function(_) => ObjectClass::Function,
            ObjectKind::Error => ObjectClass::Error,
        }
    }

    pub fn is_callable(&self) -> bool {
        self.class() == ObjectClass::Function
    }

    pub fn proto(&self) -> Option<HostObject> {
        self.0.borrow().proto.clone()
    }

    /// The `prototype` property as an object, if any.
    pub fn prototype(&self) -> Option<HostObject> {
        match self.get("prototype") {
            HostValue::Object(proto) => Some(proto),
            _ => None,
        }
    }

    pub fn function_name(&self) -> Option<String> {
        match &self.0.borrow().kind {
            ObjectKind::Function(f) => Some(f.name.clone()),
            _ => None,
        }
    }

    fn native(&self) -> Option<(Rc<NativeFn>, bool)> {
        match &self.0.borrow().kind {
            ObjectKind::Function(f) => Some((f.body.clone(), f.constructible)),
            _ => None,
        }
    }

    pub fn array_items(&self) -> Option<Vec<HostValue>> {
        match &self.0.borrow().kind {
            ObjectKind::Array(items) => Some(items.clone()),
            _ => None,
        }
    }

    pub fn with_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        match &self.0.borrow().kind {
            ObjectKind::Bytes(data) => Some(f(data)),
            _ => None,
        }
    }

    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        match &mut self.0.borrow_mut().kind {
            ObjectKind::Bytes(data) => Some(f(data)),
            _ => None,
        }
    }

    /// Own property names, in key order.
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().properties.keys().cloned().collect()
    }

    // ── Property access ──

    /// Read a property, falling back along the prototype chain.
    pub fn get(&self, key: &str) -> HostValue {
        let proto = {
            let obj = self.0.borrow();
            if let Some(value) = kind_property(&obj.kind, key) {
                return value;
            }
            if let Some(value) = obj.properties.get(key) {
                return value.clone();
            }
            obj.proto.clone()
        };
        proto.map(|p| p.get(key)).unwrap_or_default()
    }

    pub fn set(&self, key: &str, value: HostValue) {
        let mut guard = self.0.borrow_mut();
        let obj = &mut *guard;
        match (&mut obj.kind, array_index(key)) {
            (ObjectKind::Array(items), Some(index)) if is_dense_store(items.len(), index) => {
                store_item(items, index, value)
            }
            (ObjectKind::Bytes(data), Some(index)) => {
                if let Some(slot) = data.get_mut(index) {
                    *slot = to_uint8(&value);
                }
            }
            _ => {
                obj.properties.insert(key.to_owned(), value);
            }
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.0.borrow_mut().properties.remove(key);
        true
    }

    pub fn get_index(&self, index: i64) -> HostValue {
        if let Ok(i) = usize::try_from(index) {
            let obj = self.0.borrow();
            match &obj.kind {
                ObjectKind::Array(items) => {
                    if let Some(item) = items.get(i) {
                        return item.clone();
                    }
                }
                ObjectKind::Bytes(data) => {
                    return data
                        .get(i)
                        .map(|b| HostValue::Number(f64::from(*b)))
                        .unwrap_or_default()
                }
                _ => {}
            }
        }
        self.get(&index.to_string())
    }

    pub fn set_index(&self, index: i64, value: HostValue) {
        self.set(&index.to_string(), value)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostObject({:?}@{:#x})", self.class(), self.identity())
    }
}

fn kind_property(kind: &ObjectKind, key: &str) -> Option<HostValue> {
    match (kind, key) {
        (ObjectKind::Array(items), "length") => Some(HostValue::Number(items.len() as f64)),
        (ObjectKind::Bytes(data), "length" | "byteLength") => {
            Some(HostValue::Number(data.len() as f64))
        }
        (ObjectKind::Function(f), "name") => Some(HostValue::from(f.name.as_str())),
        (ObjectKind::Array(items), _) => array_index(key).and_then(|i| items.get(i).cloned()),
        (ObjectKind::Bytes(data), _) => array_index(key)
            .map(|i| data.get(i).map(|b| HostValue::Number(f64::from(*b))).unwrap_or_default()),
        _ => None,
    }
}

/// Largest length `Array(n)` and `Uint8Array(n)` allocate up front.
pub const MAX_DENSE_LENGTH: usize = 1 << 24;

/// How far past the end a store may extend an array's dense storage.
/// Indices further out, or past `MAX_DENSE_LENGTH`, land in the property
/// map.
const MAX_ARRAY_GAP: usize = 1 << 20;

/// `key` as an array index: canonical decimal, below 2^32 - 1.
///
/// "01", "+1" and "4294967295" stay plain property names.
pub fn array_index(key: &str) -> Option<usize> {
    let canonical = !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && (key == "0" || !key.starts_with('0'));
    if !canonical || key.len() > 10 {
        return None;
    }
    key.parse::<u64>()
        .ok()
        .filter(|&i| i < u64::from(u32::MAX))
        .and_then(|i| usize::try_from(i).ok())
}

fn is_dense_store(len: usize, index: usize) -> bool {
    index < MAX_DENSE_LENGTH && index <= len + MAX_ARRAY_GAP
}

fn store_item(items: &mut Vec<HostValue>, index: usize, value: HostValue) {
    if index >= items.len() {
        items.resize(index + 1, HostValue::Undefined);
    }
    items[index] = value;
}

/// Modular conversion to a byte, as typed-array stores do.
pub fn to_uint8(value: &HostValue) -> u8 {
    match value {
        HostValue::Number(n) if n.is_finite() => (n.trunc() as i64).rem_euclid(256) as u8,
        HostValue::Bool(true) => 1,
        _ => 0,
    }
}

// ── Calls ──

/// Call `callee` with the given receiver and arguments.
pub fn call(
    guest: &mut dyn GuestApi,
    callee: &HostValue,
    this: HostValue,
    args: Vec<HostValue>,
) -> Result<HostValue, HostValue> {
    let (body, _) = callee
        .as_object()
        .and_then(HostObject::native)
        .ok_or_else(|| type_error(format!("{} is not a function", callee.typeof_name())))?;
    body(
        guest,
        Invocation {
            this,
            args,
            construct: false,
        },
    )
}

/// Construct a new object with `target` as the constructor.
///
/// The receiver is a fresh ordinary object whose prototype is
/// `target.prototype`; an object returned by the body replaces it.
pub fn construct(
    guest: &mut dyn GuestApi,
    target: &HostValue,
    args: Vec<HostValue>,
) -> Result<HostValue, HostValue> {
    let ctor = target
        .as_object()
        .ok_or_else(|| type_error(format!("{} is not a constructor", target.typeof_name())))?;
    let body = match ctor.native() {
        Some((body, true)) => body,
        _ => {
            let name = ctor.function_name().unwrap_or_else(|| "value".into());
            return Err(type_error(format!("{name} is not a constructor")));
        }
    };
    let this = HostObject::new(ObjectKind::Ordinary, ctor.prototype());
    let result = body(
        guest,
        Invocation {
            this: this.clone().into(),
            args,
            construct: true,
        },
    )?;
    Ok(match result {
        HostValue::Object(obj) => obj.into(),
        _ => this.into(),
    })
}

/// `value instanceof target`.
///
/// Throws a `TypeError` when `target` is not callable.
pub fn instance_of(value: &HostValue, target: &HostValue) -> Result<bool, HostValue> {
    let ctor = target
        .as_object()
        .filter(|obj| obj.is_callable())
        .ok_or_else(|| type_error("right-hand side of 'instanceof' is not callable"))?;
    let Some(prototype) = ctor.prototype() else {
        return Ok(false);
    };
    let mut current = value.as_object().and_then(HostObject::proto);
    while let Some(proto) = current {
        if proto.ptr_eq(&prototype) {
            return Ok(true);
        }
        current = proto.proto();
    }
    Ok(false)
}
