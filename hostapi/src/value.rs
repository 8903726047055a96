//! Host values - the closed set of values that can cross the guest boundary.
//!
//! `HostValue` is what the guest's numeric handles point at. Primitive
//! variants are plain data; `Object` is a shared, identity-compared
//! reference (see [`HostObject`]).

use std::fmt;
use std::rc::Rc;

use crate::error::type_error;
use crate::object::{HostObject, ObjectClass};

/// A unique symbol. Two symbols are equal only if they are the same symbol.
#[derive(Clone)]
pub struct Symbol(Rc<Option<String>>);

impl Symbol {
    /// Create a fresh symbol with an optional description.
    pub fn new(description: Option<&str>) -> Self {
        Self(Rc::new(description.map(str::to_owned)))
    }

    pub fn description(&self) -> Option<&str> {
        self.0.as_deref()
    }

    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.description().unwrap_or(""))
    }
}

/// A value living on the host side of the boundary.
#[derive(Clone, Debug, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Symbol(Symbol),
    Object(HostObject),
}

/// Type tag carried in the high word of a boxed reference.
///
/// Values: `None` = 0, `Object` = 1, `String` = 2, `Symbol` = 3,
/// `Function` = 4.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TypeFlag {
    None = 0,
    Object = 1,
    String = 2,
    Symbol = 3,
    Function = 4,
}

/// Key under which a value is deduplicated in the reference table.
///
/// Objects and symbols are keyed by identity, strings by content.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKey {
    Zero,
    Null,
    Bool(bool),
    String(Rc<str>),
    Symbol(usize),
    Object(usize),
}

impl HostValue {
    pub fn string(s: impl Into<Rc<str>>) -> Self {
        Self::String(s.into())
    }

    /// The wire type tag for this value.
    pub fn type_flag(&self) -> TypeFlag {
        match self {
            Self::Undefined | Self::Null | Self::Bool(_) | Self::Number(_) => TypeFlag::None,
            Self::String(_) => TypeFlag::String,
            Self::Symbol(_) => TypeFlag::Symbol,
            Self::Object(obj) if obj.is_callable() => TypeFlag::Function,
            Self::Object(_) => TypeFlag::Object,
        }
    }

    /// Reference-table key, or `None` for values that are never stored
    /// there (undefined and non-zero numbers, including NaN).
    pub fn identity_key(&self) -> Option<ValueKey> {
        match self {
            Self::Undefined => None,
            Self::Number(n) if *n == 0.0 => Some(ValueKey::Zero),
            Self::Number(_) => None,
            Self::Null => Some(ValueKey::Null),
            Self::Bool(b) => Some(ValueKey::Bool(*b)),
            Self::String(s) => Some(ValueKey::String(s.clone())),
            Self::Symbol(sym) => Some(ValueKey::Symbol(sym.identity())),
            Self::Object(obj) => Some(ValueKey::Object(obj.identity())),
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn typeof_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(obj) if obj.is_callable() => "function",
            Self::Object(_) => "object",
        }
    }

    /// Strict equality: primitives by value, objects and symbols by identity.
    pub fn strict_equals(&self, other: &HostValue) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// String conversion as performed by `String(value)`.
    pub fn to_display_string(&self) -> String {
        display(self, 0)
    }

    // ── Property access ──

    /// Read a property. Throws a `TypeError` on undefined and null.
    pub fn get(&self, key: &str) -> Result<HostValue, HostValue> {
        match self {
            Self::Undefined | Self::Null => Err(type_error(format!(
                "cannot read properties of {} (reading '{}')",
                self.to_display_string(),
                key
            ))),
            Self::String(s) if key == "length" => Ok(Self::Number(utf16_len(s) as f64)),
            Self::Object(obj) => Ok(obj.get(key)),
            _ => Ok(Self::Undefined),
        }
    }

    /// Write a property. Writes to primitives are silently dropped.
    pub fn set(&self, key: &str, value: HostValue) -> Result<(), HostValue> {
        match self {
            Self::Undefined | Self::Null => Err(type_error(format!(
                "cannot set properties of {} (setting '{}')",
                self.to_display_string(),
                key
            ))),
            Self::Object(obj) => {
                obj.set(key, value);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn delete(&self, key: &str) -> Result<bool, HostValue> {
        match self {
            Self::Undefined | Self::Null => Err(type_error(format!(
                "cannot convert {} to object",
                self.to_display_string()
            ))),
            Self::Object(obj) => Ok(obj.delete(key)),
            _ => Ok(true),
        }
    }

    pub fn get_index(&self, index: i64) -> Result<HostValue, HostValue> {
        match self {
            Self::String(s) => Ok(usize::try_from(index)
                .ok()
                .and_then(|i| s.encode_utf16().nth(i))
                .map(|unit| Self::string(String::from_utf16_lossy(&[unit])))
                .unwrap_or_default()),
            Self::Object(obj) => Ok(obj.get_index(index)),
            _ => self.get(&index.to_string()),
        }
    }

    pub fn set_index(&self, index: i64, value: HostValue) -> Result<(), HostValue> {
        match self {
            Self::Object(obj) => {
                obj.set_index(index, value);
                Ok(())
            }
            _ => self.set(&index.to_string(), value),
        }
    }

    /// Integer value of the `length` property, 0 when absent or not numeric.
    pub fn length(&self) -> Result<i64, HostValue> {
        let len = self.get("length")?;
        Ok(match len {
            Self::Number(n) if n.is_finite() => n.trunc() as i64,
            _ => 0,
        })
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::string(s)
    }
}

impl From<HostObject> for HostValue {
    fn from(obj: HostObject) -> Self {
        Self::Object(obj)
    }
}

/// Number of UTF-16 code units, which is what `length` reports for strings.
pub fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

/// Format a number the way the platform's `Number#toString` does.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        return "NaN".into();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.into();
    }
    if n == 0.0 {
        return "0".into();
    }
    if (1e-6..1e21).contains(&n.abs()) {
        return format!("{n}");
    }
    let s = format!("{n:e}");
    match s.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        _ => s,
    }
}

const MAX_DISPLAY_DEPTH: usize = 16;

fn display(value: &HostValue, depth: usize) -> String {
    match value {
        HostValue::Undefined => "undefined".into(),
        HostValue::Null => "null".into(),
        HostValue::Bool(b) => b.to_string(),
        HostValue::Number(n) => format_number(*n),
        HostValue::String(s) => s.to_string(),
        HostValue::Symbol(sym) => format!("Symbol({})", sym.description().unwrap_or("")),
        HostValue::Object(obj) => display_object(obj, depth),
    }
}

fn display_object(obj: &HostObject, depth: usize) -> String {
    if depth >= MAX_DISPLAY_DEPTH {
        return String::new();
    }
    match obj.class() {
        ObjectClass::Array => obj
            .array_items()
            .unwrap_or_default()
            .iter()
            .map(|item| match item {
                HostValue::Undefined | HostValue::Null => String::new(),
                other => display(other, depth + 1),
            })
            .collect::<Vec<_>>()
            .join(","),
        ObjectClass::Bytes => obj
            .with_bytes(|b| b.iter().map(u8::to_string).collect::<Vec<_>>().join(","))
            .unwrap_or_default(),
        ObjectClass::Function => format!(
            "function {}() {{ [native code] }}",
            obj.function_name().unwrap_or_default()
        ),
        ObjectClass::Error => {
            let name = match obj.get("name") {
                HostValue::Undefined => "Error".to_string(),
                other => display(&other, depth + 1),
            };
            let message = match obj.get("message") {
                HostValue::Undefined => String::new(),
                other => display(&other, depth + 1),
            };
            if message.is_empty() {
                name
            } else {
                format!("{name}: {message}")
            }
        }
        ObjectClass::Ordinary => "[object Object]".into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(-42.0), "-42");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(f64::NAN), "NaN");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1e-7), "1e-7");
    }

    #[test]
    fn test_type_flags() {
        assert_eq!(HostValue::Null.type_flag(), TypeFlag::None);
        assert_eq!(HostValue::Bool(true).type_flag(), TypeFlag::None);
        assert_eq!(HostValue::from("x").type_flag(), TypeFlag::String);
        assert_eq!(HostValue::Symbol(Symbol::new(None)).type_flag(), TypeFlag::Symbol);
        assert_eq!(HostValue::from(HostObject::ordinary()).type_flag(), TypeFlag::Object);
        let f = HostObject::function("f", |_, _| Ok(HostValue::Undefined));
        assert_eq!(HostValue::from(f).type_flag(), TypeFlag::Function);
    }

    #[test]
    fn test_identity_keys() {
        assert_eq!(HostValue::Undefined.identity_key(), None);
        assert_eq!(HostValue::Number(3.5).identity_key(), None);
        assert_eq!(HostValue::Number(f64::NAN).identity_key(), None);
        assert_eq!(HostValue::Number(-0.0).identity_key(), Some(ValueKey::Zero));

        // Strings dedupe by content, objects by identity.
        assert_eq!(
            HostValue::from("abc").identity_key(),
            HostValue::from(String::from("abc")).identity_key()
        );
        let a = HostValue::from(HostObject::ordinary());
        let b = HostValue::from(HostObject::ordinary());
        assert_ne!(a.identity_key(), b.identity_key());
        assert_eq!(a.identity_key(), a.clone().identity_key());
    }

    #[test]
    fn test_get_on_nullish_throws() {
        let err = HostValue::Undefined.get("x").unwrap_err();
        assert!(err.to_display_string().starts_with("TypeError"));
        assert!(HostValue::Null.set("x", HostValue::Null).is_err());
        assert!(matches!(HostValue::Bool(true).get("x"), Ok(HostValue::Undefined)));
    }

    #[test]
    fn test_string_length_and_index() {
        let s = HostValue::from("héllo");
        assert_eq!(s.length().unwrap(), 5);
        assert_eq!(s.get_index(1).unwrap().as_str(), Some("é"));
        assert!(matches!(s.get_index(10).unwrap(), HostValue::Undefined));
    }

    #[test]
    fn test_display_strings() {
        assert_eq!(HostValue::Undefined.to_display_string(), "undefined");
        assert_eq!(HostValue::Number(7.0).to_display_string(), "7");
        let arr = HostObject::array(vec![1.0.into(), HostValue::Null, "x".into()]);
        assert_eq!(HostValue::from(arr).to_display_string(), "1,,x");
        assert_eq!(
            HostValue::from(HostObject::ordinary()).to_display_string(),
            "[object Object]"
        );
    }
}
