//! Error types for CEL operations

use thiserror::Error;

/// CEL operation errors
#[derive(Error, Debug)]
pub enum CelError {
    #[error("CEL compilation failed: {0}")]
    CompilationError(String),

    #[error("Unsafe built-in '{builtin}' referenced by '{policy}'")]
    UnsafeBuiltin { builtin: String, policy: String },

    #[error("CEL evaluation failed: {0}")]
    EvaluationError(String),

    #[error("Expression did not return boolean result")]
    NonBooleanResult,

    #[error("Expression did not return integer result")]
    NonIntegerResult,

    #[error("Evaluation cancelled")]
    Cancelled,

    #[error("Evaluation panicked: {0}")]
    Panicked(String),
}

/// Result type for CEL operations
pub type Result<T> = std::result::Result<T, CelError>;
