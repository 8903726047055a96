//! Conversion between host values and JSON.
//!
//! Follows `JSON.stringify` conventions: undefined, functions and symbols
//! are dropped from objects and become `null` inside arrays, non-finite
//! numbers become `null`.

use serde_json::{Map, Number, Value};

use crate::object::{HostObject, ObjectClass};
use crate::value::HostValue;

const MAX_DEPTH: usize = 64;

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

pub fn to_json(value: &HostValue) -> Value {
    convert(value, 0).unwrap_or(Value::Null)
}

pub fn from_json(value: &Value) -> HostValue {
    match value {
        Value::Null => HostValue::Null,
        Value::Bool(b) => HostValue::Bool(*b),
        Value::Number(n) => HostValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => HostValue::from(s.as_str()),
        Value::Array(items) => HostObject::array(items.iter().map(from_json).collect()).into(),
        Value::Object(map) => {
            let obj = HostObject::ordinary();
            for (key, item) in map {
                obj.set(key, from_json(item));
            }
            obj.into()
        }
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

/// `None` for values `JSON.stringify` omits.
fn convert(value: &HostValue, depth: usize) -> Option<Value> {
    if depth > MAX_DEPTH {
        return Some(Value::Null);
    }
    match value {
        HostValue::Undefined | HostValue::Symbol(_) => None,
        HostValue::Null => Some(Value::Null),
        HostValue::Bool(b) => Some(Value::Bool(*b)),
        HostValue::Number(n) => Some(number(*n)),
        HostValue::String(s) => Some(Value::String(s.to_string())),
        HostValue::Object(obj) => match obj.class() {
            ObjectClass::Function => None,
            ObjectClass::Array => Some(Value::Array(
                obj.array_items()
                    .unwrap_or_default()
                    .iter()
                    .map(|item| convert(item, depth + 1).unwrap_or(Value::Null))
                    .collect(),
            )),
            ObjectClass::Bytes => Some(Value::Array(
                obj.with_bytes(|b| b.iter().map(|&x| Value::from(x)).collect())
                    .unwrap_or_default(),
            )),
            ObjectClass::Ordinary | ObjectClass::Error => {
                let mut map = Map::new();
                for key in obj.keys() {
                    if let Some(item) = convert(&obj.get(&key), depth + 1) {
                        map.insert(key, item);
                    }
                }
                Some(Value::Object(map))
            }
        },
    }
}
