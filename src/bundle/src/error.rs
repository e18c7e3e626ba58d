//! Error types for bundle construction and validation

use thiserror::Error;

/// Bundle construction and validation errors
#[derive(Debug, Error)]
pub enum BundleError {
    /// A referenced identifier does not resolve anywhere in the registry
    #[error("Unresolved reference: {kind} '{mrn}' referenced by '{referrer}'")]
    UnresolvedReference {
        kind: &'static str,
        mrn: String,
        referrer: String,
    },

    /// More than one resource group is flagged as the default
    #[error("Multiple default resource groups: '{first}' and '{second}'")]
    MultipleDefaultResourceGroups { first: String, second: String },

    /// A selector carries a regex that does not compile
    #[error("Invalid selector regex '{pattern}' in '{owner}': {message}")]
    InvalidSelector {
        pattern: String,
        owner: String,
        message: String,
    },

    /// Two libraries required by one policy define the same binding name
    #[error("Library binding collision: '{binding}' defined by both '{first}' and '{second}' (policy '{policy}')")]
    BindingCollision {
        binding: String,
        first: String,
        second: String,
        policy: String,
    },

    /// Invalid entity definition
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
}

/// Result type for bundle operations
pub type Result<T> = std::result::Result<T, BundleError>;
