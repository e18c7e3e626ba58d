//! # Meridian Policy Bundle
//!
//! The policy-bundle data model shared by the decision engine: domain
//! models, the cross-domain registry, rich annotations with per-key merge
//! strategies, and classification levels.
//!
//! Everything here is immutable after construction. The registry validates
//! reference closure up front so the engine never discovers a dangling
//! reference at request time.

pub mod annotations;
pub mod error;
pub mod registry;
pub mod types;

pub use annotations::{AnnotationValue, MergeStrategy, RichAnnotations};
pub use error::{BundleError, Result};
pub use registry::{DomainModel, Registry};
pub use types::{
    Classification, GroupDef, Library, MapperDef, Mrn, OperationBinding, PolicySource, Resource,
    ResourceGroupDef, ResourceSelector, RoleDef, ScopeDef,
};
