//! Error types for the decision engine

use crate::record::ReasonCode;
use thiserror::Error;

/// Decision engine errors
#[derive(Debug, Error)]
pub enum PdpError {
    /// Malformed or incomplete request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Identifier not resolvable at runtime
    #[error("Not found: {0}")]
    NotFound(String),

    /// Policy or mapper failed to compile
    #[error("Compilation failed: {0}")]
    Compilation(String),

    /// Policy evaluation failed
    #[error("Evaluation failed: {0}")]
    Evaluation(String),

    /// Malformed parameter (e.g. bad annotation payload)
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// A backend lookup failed in transit
    #[error("Network error: {0}")]
    Network(String),

    /// More than one candidate matched where one was required
    #[error("Ambiguous match: {0}")]
    Ambiguous(String),

    /// Bundle construction or validation error
    #[error("Bundle error: {0}")]
    Bundle(#[from] meridian_bundle::BundleError),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PdpError {
    /// Map onto the closed audit reason-code set
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            Self::NotFound(_) => ReasonCode::NotfoundError,
            Self::Compilation(_) => ReasonCode::CompilationError,
            Self::InvalidParam(_) | Self::InvalidRequest(_) => ReasonCode::InvalparamError,
            Self::Network(_) => ReasonCode::NetworkError,
            _ => ReasonCode::UnknownError,
        }
    }
}

/// Result type for decision engine operations
pub type Result<T> = std::result::Result<T, PdpError>;
