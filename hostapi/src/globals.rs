//! The global object the guest runtime bootstraps from.
//!
//! The Go runtime looks up a handful of globals while it initializes
//! (`Object`, `Array`, `Uint8Array`, `Date`, `fs`, `process`, `crypto`)
//! and aborts if any is missing. Filesystem and process operations have no
//! backing store here and report `ENOSYS`.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{error, info, warn};

use crate::error::{enosys, type_error};
use crate::object::{call, HostObject, Invocation, ObjectKind, MAX_DENSE_LENGTH};
use crate::traits::GuestApi;
use crate::value::HostValue;

/// Filesystem operations that only report `ENOSYS` through their callback.
const UNSUPPORTED_FS_OPS: &[&str] = &[
    "chmod", "chown", "close", "fchmod", "fchown", "fstat", "fsync", "ftruncate", "lchown", "link",
    "lstat", "mkdir", "open", "read", "readdir", "readlink", "rename", "rmdir", "stat", "symlink",
    "truncate", "unlink", "utimes",
];

const FS_CONSTANTS: &[&str] = &[
    "O_WRONLY",
    "O_RDWR",
    "O_CREAT",
    "O_TRUNC",
    "O_APPEND",
    "O_EXCL",
    "O_DIRECTORY",
];

/// A fresh global object with the standard environment installed.
pub fn new_global() -> HostObject {
    let global = HostObject::ordinary();
    install_globals(&global);
    global
}

/// Install the standard environment on `global`.
pub fn install_globals(global: &HostObject) {
    global.set("Object", object_constructor().into());
    global.set("Array", array_constructor().into());
    global.set("Uint8Array", uint8_array_constructor().into());
    global.set("Error", error_constructor().into());
    global.set("Date", date_constructor().into());
    global.set("fs", fs_module().into());
    global.set("process", process_module().into());
    global.set("crypto", crypto_module().into());
    global.set("console", console_module().into());
}

fn method<F>(target: &HostObject, name: &str, body: F)
where
    F: Fn(&mut dyn GuestApi, Invocation) -> Result<HostValue, HostValue> + 'static,
{
    target.set(name, HostObject::function(name, body).into());
}

/// Prototype of the receiver `construct` allocated, if any.
fn receiver_proto(inv: &Invocation) -> Option<HostObject> {
    if inv.construct {
        inv.this.as_object().and_then(HostObject::proto)
    } else {
        None
    }
}

fn to_fd(value: &HostValue) -> i64 {
    value.as_number().filter(|n| n.is_finite()).map_or(-1, |n| n as i64)
}

fn object_constructor() -> HostObject {
    HostObject::constructor("Object", |_, inv| match inv.arg(0) {
        HostValue::Object(obj) => Ok(obj.into()),
        _ if inv.construct => Ok(inv.this),
        _ => Ok(HostObject::ordinary().into()),
    })
}

fn array_constructor() -> HostObject {
    HostObject::constructor("Array", |_, inv| {
        let items = match inv.args.as_slice() {
            [HostValue::Number(n)] => {
                if n.fract() != 0.0 || *n < 0.0 || *n > f64::from(u32::MAX) {
                    return Err(crate::error::error_value("RangeError", "Invalid array length"));
                }
                if *n > MAX_DENSE_LENGTH as f64 {
                    return Err(crate::error::error_value("RangeError", "Array length too large"));
                }
                vec![HostValue::Undefined; *n as usize]
            }
            args => args.to_vec(),
        };
        Ok(HostObject::new(ObjectKind::Array(items), receiver_proto(&inv)).into())
    })
}

fn uint8_array_constructor() -> HostObject {
    HostObject::constructor("Uint8Array", |_, inv| {
        if !inv.construct {
            return Err(type_error("Constructor Uint8Array requires 'new'"));
        }
        let data = match inv.arg(0) {
            HostValue::Undefined => Vec::new(),
            HostValue::Number(n)
                if n.is_finite() && n >= 0.0 && n.fract() == 0.0 && n <= MAX_DENSE_LENGTH as f64 =>
            {
                vec![0; n as usize]
            }
            HostValue::Number(_) => {
                return Err(crate::error::error_value("RangeError", "Invalid typed array length"))
            }
            HostValue::Object(src) => match src.with_bytes(<[u8]>::to_vec) {
                Some(bytes) => bytes,
                None => src
                    .array_items()
                    .unwrap_or_default()
                    .iter()
                    .map(crate::object::to_uint8)
                    .collect(),
            },
            _ => Vec::new(),
        };
        Ok(HostObject::new(ObjectKind::Bytes(data), receiver_proto(&inv)).into())
    })
}

fn error_constructor() -> HostObject {
    HostObject::constructor("Error", |_, inv| {
        let err = HostObject::new(ObjectKind::Error, receiver_proto(&inv));
        err.set("name", "Error".into());
        err.set(
            "message",
            match inv.arg(0) {
                HostValue::Undefined => HostValue::from(""),
                other => other.to_display_string().into(),
            },
        );
        Ok(err.into())
    })
}

fn now_millis() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

fn date_constructor() -> HostObject {
    let date = HostObject::constructor("Date", |_, inv| {
        if inv.construct {
            Ok(inv.this)
        } else {
            Ok(HostValue::string(now_millis().to_string()))
        }
    });
    if let Some(proto) = date.prototype() {
        // Guests run in UTC.
        method(&proto, "getTimezoneOffset", |_, _| Ok(HostValue::Number(0.0)));
    }
    method(&date, "now", |_, _| Ok(HostValue::Number(now_millis())));
    date
}

fn fs_module() -> HostObject {
    let fs = HostObject::ordinary();
    let constants = HostObject::ordinary();
    for name in FS_CONSTANTS {
        constants.set(name, HostValue::Number(-1.0));
    }
    fs.set("constants", constants.into());

    method(&fs, "writeSync", |guest, inv| write_sync(guest, &inv.arg(0), &inv.arg(1)));

    method(&fs, "write", |guest, inv| {
        let callback = inv.arg(5);
        let buf = inv.arg(1);
        let whole_buffer = inv.arg(2).as_number() == Some(0.0)
            && inv.arg(3).as_number() == Some(buf.length()? as f64)
            && matches!(inv.arg(4), HostValue::Null);
        let args = if whole_buffer {
            let written = write_sync(guest, &inv.arg(0), &buf)?;
            vec![HostValue::Null, written]
        } else {
            vec![enosys("write")]
        };
        call(guest, &callback, HostValue::Undefined, args)?;
        Ok(HostValue::Undefined)
    });

    for op in UNSUPPORTED_FS_OPS {
        method(&fs, op, move |guest, inv| {
            let callback = inv.args.last().cloned().unwrap_or_default();
            call(guest, &callback, HostValue::Undefined, vec![enosys(op)])?;
            Ok(HostValue::Undefined)
        });
    }
    fs
}

fn write_sync(
    guest: &mut dyn GuestApi,
    fd: &HostValue,
    buf: &HostValue,
) -> Result<HostValue, HostValue> {
    let bytes = buf
        .as_object()
        .and_then(|obj| obj.with_bytes(<[u8]>::to_vec))
        .ok_or_else(|| type_error("writeSync: buffer must be a Uint8Array"))?;
    guest.write_output(to_fd(fd), &bytes);
    Ok(HostValue::Number(bytes.len() as f64))
}

fn process_module() -> HostObject {
    let process = HostObject::ordinary();
    process.set("pid", HostValue::Number(-1.0));
    process.set("ppid", HostValue::Number(-1.0));
    for name in ["getuid", "getgid", "geteuid", "getegid"] {
        method(&process, name, |_, _| Ok(HostValue::Number(-1.0)));
    }
    for name in ["cwd", "chdir", "umask", "getgroups"] {
        method(&process, name, move |_, _| Err(enosys(name)));
    }
    process
}

fn crypto_module() -> HostObject {
    let crypto = HostObject::ordinary();
    method(&crypto, "getRandomValues", |_, inv| {
        let target = inv.arg(0);
        target
            .as_object()
            .and_then(|obj| obj.with_bytes_mut(|buf| OsRng.fill_bytes(buf)))
            .ok_or_else(|| type_error("getRandomValues: argument must be a Uint8Array"))?;
        Ok(target)
    });
    crypto
}

fn console_module() -> HostObject {
    fn line(inv: &Invocation) -> String {
        inv.args
            .iter()
            .map(HostValue::to_display_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    let console = HostObject::ordinary();
    method(&console, "log", |_, inv| {
        info!(target: "gobridge::console", "{}", line(&inv));
        Ok(HostValue::Undefined)
    });
    method(&console, "info", |_, inv| {
        info!(target: "gobridge::console", "{}", line(&inv));
        Ok(HostValue::Undefined)
    });
    method(&console, "warn", |_, inv| {
        warn!(target: "gobridge::console", "{}", line(&inv));
        Ok(HostValue::Undefined)
    });
    method(&console, "error", |_, inv| {
        error!(target: "gobridge::console", "{}", line(&inv));
        Ok(HostValue::Undefined)
    });
    console
}
