//! Access records: the audit output of every authorization

use crate::policy::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Final authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Decision {
    Grant,
    Deny,
}

impl Decision {
    pub fn from_grant(grant: bool) -> Self {
        if grant {
            Self::Grant
        } else {
            Self::Deny
        }
    }

    pub fn is_grant(self) -> bool {
        matches!(self, Self::Grant)
    }
}

/// Evaluation phase a reference belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    /// Operation phase (tri-level, may override)
    System,
    Identity,
    Resource,
    Scope,
}

/// Why a reference carries its decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    /// The policy evaluated to a definite boolean or integer
    PolicyOutcome,
    /// An identifier could not be resolved
    NotfoundError,
    /// A policy failed to compile (construction-time concern)
    CompilationError,
    /// A malformed parameter, e.g. bad annotation JSON
    InvalparamError,
    /// A backend lookup failed in transit
    NetworkError,
    /// Unexpected result shape, panic, or cancellation
    UnknownError,
}

/// Why the decision short-circuited in the operation phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideReason {
    /// A configured anti-lockout administrative role granted outright
    AntiLockout,
    /// The operation policy returned a positive integer
    Bypass,
    /// The request carried no authenticated principal
    JwtRequired,
    /// Reserved: deployments that gate operations on an operator role
    OperatorRequired,
}

/// One policy's contribution to the decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleReference {
    /// Entity identifier (role, scope, resource group, operation binding);
    /// empty for synthetic references
    #[serde(default)]
    pub id: String,

    /// Hash of the evaluated policy source, absent when nothing was evaluated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,

    pub phase: Phase,

    pub decision: Decision,

    pub reason_code: ReasonCode,

    /// Human-readable detail, e.g. the unresolved identifier
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Signed integer outcome, populated for operation-phase references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
}

impl BundleReference {
    pub fn new(phase: Phase, id: impl Into<String>, decision: Decision) -> Self {
        Self {
            id: id.into(),
            fingerprint: None,
            phase,
            decision,
            reason_code: ReasonCode::PolicyOutcome,
            reason: String::new(),
            value: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn with_reason(mut self, code: ReasonCode, reason: impl Into<String>) -> Self {
        self.reason_code = code;
        self.reason = reason.into();
        self
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Record metadata populated once per record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Per-record unique identifier
    pub id: String,

    /// RFC3339 wall-clock timestamp with nanosecond precision
    pub timestamp: String,

    /// Deployment environment captured at engine start
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl RecordMetadata {
    pub fn new(env: BTreeMap<String, String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now()
                .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
            env,
        }
    }
}

/// Principal identity as recorded for audit
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RecordPrincipal {
    #[serde(default)]
    pub subject: String,

    #[serde(default)]
    pub realm: String,
}

/// One audit record per authorize call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRecord {
    pub metadata: RecordMetadata,

    pub principal: RecordPrincipal,

    pub operation: String,

    /// Resource identifier
    pub resource: String,

    pub decision: Decision,

    /// True only when the operation phase short-circuited
    pub system_override: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<OverrideReason>,

    /// Per-policy contributions in canonical phase order
    pub references: Vec<BundleReference>,

    /// The final normalized request as JSON, for replay
    pub porc: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_wire_form() {
        assert_eq!(serde_json::to_string(&Decision::Grant).unwrap(), "\"GRANT\"");
        assert_eq!(serde_json::to_string(&Decision::Deny).unwrap(), "\"DENY\"");
    }

    #[test]
    fn test_reason_code_wire_form() {
        assert_eq!(
            serde_json::to_string(&ReasonCode::PolicyOutcome).unwrap(),
            "\"POLICY_OUTCOME\""
        );
        assert_eq!(
            serde_json::to_string(&ReasonCode::NotfoundError).unwrap(),
            "\"NOTFOUND_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&ReasonCode::InvalparamError).unwrap(),
            "\"INVALPARAM_ERROR\""
        );
    }

    #[test]
    fn test_override_reason_wire_form() {
        assert_eq!(
            serde_json::to_string(&OverrideReason::AntiLockout).unwrap(),
            "\"ANTI_LOCKOUT\""
        );
        assert_eq!(
            serde_json::to_string(&OverrideReason::JwtRequired).unwrap(),
            "\"JWT_REQUIRED\""
        );
    }

    #[test]
    fn test_reference_builder() {
        let reference = BundleReference::new(Phase::Identity, "mrn:iam:role:x", Decision::Deny)
            .with_reason(ReasonCode::NotfoundError, "role not found: mrn:iam:role:x");

        assert_eq!(reference.phase, Phase::Identity);
        assert_eq!(reference.reason_code, ReasonCode::NotfoundError);
        assert!(reference.fingerprint.is_none());
        assert!(reference.value.is_none());
    }

    #[test]
    fn test_metadata_unique_ids() {
        let a = RecordMetadata::new(BTreeMap::new());
        let b = RecordMetadata::new(BTreeMap::new());
        assert_ne!(a.id, b.id);
    }
}
