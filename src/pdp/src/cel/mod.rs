//! CEL expression runtime
//!
//! Policies are single CEL expressions compiled up front and executed with
//! an `input` variable (the normalized request) and a `data` variable (the
//! policy's library bindings). Execution is contained: a panic inside the
//! interpreter surfaces as an error, never unwinds into the engine.

pub mod convert;
pub mod error;

pub use convert::{cel_to_json, json_to_cel};
pub use error::{CelError, Result};

use cel_interpreter::objects::Value as CelValue;
use cel_interpreter::{Context, Program};
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Compile an expression source
pub fn compile(source: &str) -> Result<Program> {
    Program::compile(source).map_err(|e| CelError::CompilationError(format!("{:?}", e)))
}

/// Execute a compiled program with the given named variables
pub fn execute(program: &Program, variables: &[(&str, &Value)]) -> Result<CelValue> {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let mut context = Context::default();
        for (name, value) in variables {
            let _ = context.add_variable(name.to_string(), json_to_cel(value));
        }
        program
            .execute(&context)
            .map_err(|e| CelError::EvaluationError(format!("{:?}", e)))
    }));

    match outcome {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(CelError::Panicked(message))
        }
    }
}
