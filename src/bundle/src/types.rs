//! Core domain model types

use crate::annotations::RichAnnotations;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Namespaced entity identifier (e.g. "mrn:iam:role:admin")
///
/// Identifiers are opaque to the engine; equality is byte-exact.
pub type Mrn = String;

/// Data classification level attached to resources
///
/// Levels are totally ordered so policies can compare a principal's
/// clearance against a resource's classification. `Unassigned` sorts
/// below every real level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    #[default]
    Unassigned,
    Low,
    Moderate,
    High,
    Maximum,
}

impl Classification {
    fn rank(self) -> u8 {
        match self {
            Self::Unassigned => 0,
            Self::Low => 1,
            Self::Moderate => 2,
            Self::High => 3,
            Self::Maximum => 4,
        }
    }
}

impl PartialOrd for Classification {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Classification {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Source form of a policy before compilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySource {
    /// Policy identifier
    pub mrn: Mrn,

    /// Policy expression source text
    pub source: String,

    /// Libraries whose data bindings this policy depends on
    #[serde(default)]
    pub libraries: Vec<Mrn>,
}

/// A library of named data bindings shared by dependent policies
///
/// Bindings surface to policies under the `data` input variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Library {
    /// Library identifier
    pub mrn: Mrn,

    /// Named JSON values exposed to dependent policies
    #[serde(default)]
    pub bindings: serde_json::Map<String, serde_json::Value>,
}

/// Role definition: an identity binding backed by a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleDef {
    pub mrn: Mrn,

    /// Policy evaluated when this role votes in the identity phase
    pub policy: Mrn,

    #[serde(default, skip_serializing_if = "RichAnnotations::is_empty")]
    pub annotations: RichAnnotations,
}

/// Group definition: a pure role expansion with no policy of its own
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDef {
    pub mrn: Mrn,

    /// Roles the group expands to, in declaration order
    #[serde(default)]
    pub roles: Vec<Mrn>,

    #[serde(default, skip_serializing_if = "RichAnnotations::is_empty")]
    pub annotations: RichAnnotations,
}

/// Scope definition backed by a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeDef {
    pub mrn: Mrn,

    pub policy: Mrn,

    #[serde(default, skip_serializing_if = "RichAnnotations::is_empty")]
    pub annotations: RichAnnotations,
}

/// Resource group definition backed by a policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupDef {
    pub mrn: Mrn,

    pub policy: Mrn,

    /// At most one resource group per registry may be the default
    #[serde(default)]
    pub default: bool,

    #[serde(default, skip_serializing_if = "RichAnnotations::is_empty")]
    pub annotations: RichAnnotations,
}

/// A fully qualified resource
///
/// Either supplied by the caller or constructed from a bare identifier by
/// resolving resource selectors against the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Canonical resource identifier
    #[serde(rename = "id")]
    pub mrn: Mrn,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Resource group the resource belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Mrn>,

    #[serde(default)]
    pub classification: Classification,

    #[serde(default, skip_serializing_if = "RichAnnotations::is_empty")]
    pub annotations: RichAnnotations,
}

impl Resource {
    /// A bare resource known only by identifier
    pub fn bare(mrn: impl Into<Mrn>) -> Self {
        Self {
            mrn: mrn.into(),
            owner: None,
            group: None,
            classification: Classification::Unassigned,
            annotations: RichAnnotations::new(),
        }
    }
}

/// Binds operation strings to a policy via ordered regex selectors
///
/// Declaration order is significant: the first selector that matches wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationBinding {
    /// Binding identifier, recorded in audit references
    pub name: Mrn,

    /// Regex selectors matched against the operation string, in order
    pub selectors: Vec<String>,

    /// Policy evaluated for matching operations
    pub policy: Mrn,
}

/// Maps resource identifiers onto a resource group via ordered regex selectors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSelector {
    pub name: Mrn,

    /// Regex selectors matched against resource identifiers, in order
    pub selectors: Vec<String>,

    /// Resource group matching resources are assigned to
    pub group: Mrn,
}

/// Per-domain input transformation
///
/// The mapper's policy turns an arbitrary input shape into a raw request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperDef {
    pub name: Mrn,

    /// Regex selecting the inputs this mapper applies to
    pub selector: String,

    /// Transformation policy source (compiled with the unrestricted set)
    pub source: String,
}
