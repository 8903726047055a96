//! WASM module validation - ABI compatibility checks.
//!
//! Validates that a compiled module looks like a Go js/wasm binary before
//! it is instantiated. Checks:
//!
//! 1. Memory export `mem` present
//! 2. `run`, `resume` and `getsp` exported with the right signatures
//! 3. Imports come only from `gojs` / `go` and name known functions
//! 4. No WASI imports (a `GOOS=wasip1` build cannot run here)

use wasmtime::{ExternType, Module, ValType};

use crate::abi::{GETSP_EXPORT, IMPORT_MODULES, MEMORY_EXPORT, RESUME_EXPORT, RUN_EXPORT};
use crate::error::RuntimeError;
use crate::linker::is_known_import;

/// Expected export: (name, i32 param count, i32 result count).
/// Every param and result of the three entry points is i32.
const REQUIRED_EXPORTS: &[(&str, usize, usize)] = &[
    (RUN_EXPORT, 2, 0),
    (RESUME_EXPORT, 0, 0),
    (GETSP_EXPORT, 0, 1),
];

/// Check if a ValType is i32.
fn is_i32(vt: &ValType) -> bool {
    matches!(vt, ValType::I32)
}

/// Validate that a module meets the Go js/wasm ABI requirements.
pub fn validate_module(module: &Module) -> Result<(), RuntimeError> {
    validate_exports(module)?;
    validate_imports(module)?;
    Ok(())
}

/// Check that `mem` and the entry points are exported with the right
/// signatures.
fn validate_exports(module: &Module) -> Result<(), RuntimeError> {
    // Check for memory export
    let has_memory = module
        .exports()
        .any(|e| e.name() == MEMORY_EXPORT && matches!(e.ty(), ExternType::Memory(_)));
    if !has_memory {
        return Err(RuntimeError::Validation(format!(
            "module must export memory '{MEMORY_EXPORT}'"
        )));
    }

    // Check required function exports
    for &(name, expected_params, expected_results) in REQUIRED_EXPORTS {
        let export = module
            .exports()
            .find(|e| e.name() == name)
            .ok_or_else(|| RuntimeError::Validation(format!("missing required export: {name}")))?;

        let ExternType::Func(func_ty) = export.ty() else {
            return Err(RuntimeError::Validation(format!(
                "export '{name}' must be a function"
            )));
        };

        // run(argc, argv), resume(), getsp() -> sp
        let params: Vec<ValType> = func_ty.params().collect();
        let results: Vec<ValType> = func_ty.results().collect();

        if params.len() != expected_params || !params.iter().all(is_i32) {
            return Err(RuntimeError::Validation(format!(
                "export '{name}' has wrong param signature: expected {expected_params} i32 params, got {} params",
                params.len()
            )));
        }
        if results.len() != expected_results || !results.iter().all(is_i32) {
            return Err(RuntimeError::Validation(format!(
                "export '{name}' has wrong result signature: expected {expected_results} i32 results, got {} results",
                results.len()
            )));
        }
    }

    Ok(())
}

/// Check that every import is a known function from `gojs` or `go`.
fn validate_imports(module: &Module) -> Result<(), RuntimeError> {
    for import in module.imports() {
        let module_name = import.module();

        // Reject WASI imports
        if module_name.starts_with("wasi") {
            return Err(RuntimeError::Validation(format!(
                "WASI import not allowed: {module_name}::{} (build with GOOS=js GOARCH=wasm)",
                import.name()
            )));
        }

        // All imports must be from gojs or go
        if !IMPORT_MODULES.contains(&module_name) {
            return Err(RuntimeError::Validation(format!(
                "import from unknown module '{module_name}' (only {IMPORT_MODULES:?} allowed): {}",
                import.name()
            )));
        }

        // Imports must be functions
        if !matches!(import.ty(), ExternType::Func(_)) {
            return Err(RuntimeError::Validation(format!(
                "non-function import not allowed: {module_name}::{}",
                import.name()
            )));
        }

        // Names must match a registered host function
        if !is_known_import(import.name()) {
            return Err(RuntimeError::Validation(format!(
                "unknown import: {module_name}::{}",
                import.name()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasmtime::Engine;

    const EXPORTS: &str = r#"
        (memory (export "mem") 1)
        (func (export "run") (param i32 i32))
        (func (export "resume"))
        (func (export "getsp") (result i32) i32.const 0)
    "#;

    fn validate(body: &str) -> Result<(), RuntimeError> {
        let engine = Engine::default();
        let module = Module::new(&engine, format!("(module {body})")).unwrap();
        validate_module(&module)
    }

    #[test]
    fn test_validate_minimal_valid_module() {
        validate(EXPORTS).unwrap();
    }

    #[test]
    fn test_accept_both_import_modules() {
        let imports = r#"
            (import "gojs" "runtime.wasmExit" (func (param i32)))
            (import "go" "syscall/js.valueGet" (func (param i32)))
            (import "gojs" "debug" (func (param i32)))
        "#;
        validate(&format!("{imports}{EXPORTS}")).unwrap();
    }

    #[test]
    fn test_reject_missing_export() {
        let wat = r#"
            (memory (export "mem") 1)
            (func (export "run") (param i32 i32))
        "#;
        let err = validate(wat).unwrap_err();
        assert!(matches!(err, RuntimeError::Validation(ref m) if m.contains("resume")));
    }

    #[test]
    fn test_reject_wrong_signature() {
        let wat = r#"
            (memory (export "mem") 1)
            (func (export "run") (param i32))
            (func (export "resume"))
            (func (export "getsp") (result i32) i32.const 0)
        "#;
        assert!(matches!(validate(wat), Err(RuntimeError::Validation(_))));
    }

    #[test]
    fn test_reject_missing_memory() {
        let wat = r#"
            (memory (export "memory") 1)
            (func (export "run") (param i32 i32))
            (func (export "resume"))
            (func (export "getsp") (result i32) i32.const 0)
        "#;
        assert!(matches!(validate(wat), Err(RuntimeError::Validation(_))));
    }

    #[test]
    fn test_reject_wasi_import() {
        let imports = r#"
            (import "wasi_snapshot_preview1" "fd_write"
                (func (param i32 i32 i32 i32) (result i32)))
        "#;
        let err = validate(&format!("{imports}{EXPORTS}")).unwrap_err();
        assert!(matches!(err, RuntimeError::Validation(ref m) if m.contains("WASI")));
    }

    #[test]
    fn test_reject_unknown_module_import() {
        let imports = r#"(import "env" "some_func" (func (result i32)))"#;
        assert!(matches!(
            validate(&format!("{imports}{EXPORTS}")),
            Err(RuntimeError::Validation(_))
        ));
    }

    #[test]
    fn test_reject_unknown_import_name() {
        let imports = r#"(import "gojs" "runtime.fork" (func (param i32)))"#;
        assert!(matches!(
            validate(&format!("{imports}{EXPORTS}")),
            Err(RuntimeError::Validation(ref m)) if m.contains("runtime.fork")
        ));
    }
}
