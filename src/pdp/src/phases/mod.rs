//! The four-phase evaluation pipeline
//!
//! Phase 1 (operation) runs first and may short-circuit the whole decision.
//! Phases 2 (identity), 3 (resource), and 4 (scope) run concurrently once
//! phase 1 declines to override. Within the identity and scope phases,
//! votes combine by OR; across phases the combination is strict AND. Every
//! evaluation error becomes a deny vote on that policy's reference, never an
//! error at the authorize boundary.

mod identity;
mod operation;
mod resource;
mod scope;

use crate::backend::Backend;
use crate::cel::CelError;
use crate::porc::NormalizedPorc;
use crate::record::{BundleReference, Decision, OverrideReason, ReasonCode};
use serde_json::Value;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use operation::OperationOutcome;

/// Consolidated result of the phase pipeline
#[derive(Debug)]
pub(crate) struct PhaseReport {
    pub decision: Decision,
    pub system_override: bool,
    pub override_reason: Option<OverrideReason>,

    /// References in canonical order: operation, identity (principal
    /// declaration order), resource, scopes (declaration order)
    pub references: Vec<BundleReference>,
}

/// Run all phases and combine their votes
pub(crate) async fn evaluate(
    backend: &dyn Backend,
    porc: &NormalizedPorc,
    input: &Value,
    anti_lockout: &HashSet<String>,
    token: &CancellationToken,
) -> PhaseReport {
    match operation::evaluate(backend, porc, input, anti_lockout, token).await {
        OperationOutcome::Override {
            grant,
            reason,
            reference,
        } => {
            debug!(operation = %porc.operation, ?reason, grant, "operation phase override");
            PhaseReport {
                decision: Decision::from_grant(grant),
                system_override: true,
                override_reason: Some(reason),
                references: vec![reference],
            }
        }
        OperationOutcome::Decided {
            grant: operation_grant,
            reference: operation_reference,
        } => {
            let ((identity_grant, identity_references), (resource_grant, resource_reference), (scope_grant, scope_references)) = tokio::join!(
                identity::evaluate(backend, porc, input, token),
                resource::evaluate(backend, porc, input, token),
                scope::evaluate(backend, porc, input, token),
            );

            let grant = operation_grant && identity_grant && resource_grant && scope_grant;
            debug!(
                operation = operation_grant,
                identity = identity_grant,
                resource = resource_grant,
                scope = scope_grant,
                grant,
                "phase votes combined"
            );

            let mut references =
                Vec::with_capacity(2 + identity_references.len() + scope_references.len());
            references.push(operation_reference);
            references.extend(identity_references);
            references.push(resource_reference);
            references.extend(scope_references);

            PhaseReport {
                decision: Decision::from_grant(grant),
                system_override: false,
                override_reason: None,
                references,
            }
        }
    }
}

/// Map an evaluation failure onto the audit reason-code set
pub(crate) fn eval_reason(error: &CelError) -> ReasonCode {
    match error {
        CelError::CompilationError(_) | CelError::UnsafeBuiltin { .. } => {
            ReasonCode::CompilationError
        }
        _ => ReasonCode::UnknownError,
    }
}
