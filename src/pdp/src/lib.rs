//! # Meridian Policy Decision Engine
//!
//! Answers one question: given this request, GRANT or DENY? A normalized
//! request (principal, operation, resource, context) routes through four
//! evaluation phases whose votes combine by strict conjunction, and every
//! call emits a structured access record for audit and replay.
//!
//! ## Phases
//!
//! 1. **Operation** (tri-level): the policy selected by the operation
//!    selectors returns a signed integer; negative denies, zero defers to
//!    the other phases, positive grants outright and skips them.
//! 2. **Identity**: every effective role votes, one grant suffices.
//! 3. **Resource**: the resource group's policy votes.
//! 4. **Scope**: like identity, but vacuously granted when no scopes are
//!    supplied.
//!
//! Errors on the decision path never surface as exceptions: they become
//! deny votes with reason codes on the affected policy's reference.
//!
//! ## Example
//!
//! ```no_run
//! use meridian_bundle::Registry;
//! use meridian_pdp::{AuthorizeOptions, Engine, EngineConfig, MemoryAccessLog};
//! use std::sync::Arc;
//!
//! # async fn example(registry: Arc<Registry>) -> Result<(), Box<dyn std::error::Error>> {
//! let sink = Arc::new(MemoryAccessLog::new());
//! let engine = Engine::with_registry(EngineConfig::default(), registry, sink)?;
//!
//! let (decision, record) = engine
//!     .authorize_json(
//!         r#"{"principal": {"sub": "alice", "mroles": ["mrn:iam:role:member"]},
//!             "operation": "vault:data:read",
//!             "resource": "mrn:vault:v1"}"#,
//!         AuthorizeOptions::default(),
//!     )
//!     .await?;
//!
//! if decision.is_grant() {
//!     println!("granted, {} references", record.references.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod accesslog;
pub mod backend;
pub mod cel;
pub mod config;
pub mod engine;
pub mod error;
mod phases;
pub mod policy;
pub mod porc;
pub mod record;

// Re-export commonly used types
pub use accesslog::{AccessLog, JsonlAccessLog, MemoryAccessLog};
pub use backend::{Backend, Mapper, PolicyReference, RegistryBackend};
pub use config::EngineConfig;
pub use engine::{AuthorizeOptions, Engine};
pub use error::{PdpError, Result};
pub use policy::{Fingerprint, PolicyCompiler, PolicyHandle, PolicyOutput};
pub use porc::{NormalizedPorc, Principal, RawPorc, RawPrincipal, RawResource};
pub use record::{
    AccessRecord, BundleReference, Decision, OverrideReason, Phase, ReasonCode,
};
