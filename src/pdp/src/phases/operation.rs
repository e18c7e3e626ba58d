//! Phase 1: operation
//!
//! Mandatory and tri-level: the policy bound to the first matching operation
//! selector evaluates to a signed integer. Negative denies, zero grants and
//! lets the remaining phases decide, positive grants unconditionally and
//! skips them. Two anti-lockout checks run before the policy: a configured
//! administrative role always gets in, and an unauthenticated request is
//! turned away without consulting the policy at all.

use super::eval_reason;
use crate::backend::Backend;
use crate::porc::NormalizedPorc;
use crate::record::{BundleReference, Decision, OverrideReason, Phase, ReasonCode};
use serde_json::Value;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Outcome of the operation phase
#[derive(Debug)]
pub(crate) enum OperationOutcome {
    /// The decision is final; no other phase evaluates
    Override {
        grant: bool,
        reason: OverrideReason,
        reference: BundleReference,
    },

    /// An ordinary vote; phases 2-4 proceed
    Decided {
        grant: bool,
        reference: BundleReference,
    },
}

pub(crate) async fn evaluate(
    backend: &dyn Backend,
    porc: &NormalizedPorc,
    input: &Value,
    anti_lockout: &HashSet<String>,
    token: &CancellationToken,
) -> OperationOutcome {
    if let Some(admin) = porc
        .principal
        .mroles
        .iter()
        .find(|role| anti_lockout.contains(role.as_str()))
    {
        warn!(role = %admin, operation = %porc.operation, "anti-lockout role granted access");
        let reference = BundleReference::new(Phase::System, admin.clone(), Decision::Grant)
            .with_reason(
                ReasonCode::PolicyOutcome,
                format!("anti-lockout administrative role {}", admin),
            );
        return OperationOutcome::Override {
            grant: true,
            reason: OverrideReason::AntiLockout,
            reference,
        };
    }

    if porc.principal.is_anonymous() {
        let reference = match backend.get_operation(&porc.operation, token).await {
            Ok(operation) => {
                BundleReference::new(Phase::System, operation.mrn.clone(), Decision::Deny)
                    .with_fingerprint(operation.handle.fingerprint())
                    .with_reason(ReasonCode::PolicyOutcome, "authentication required")
                    .with_value(-1)
            }
            Err(e) => BundleReference::new(Phase::System, porc.operation.clone(), Decision::Deny)
                .with_reason(e.reason_code(), e.to_string()),
        };
        return OperationOutcome::Override {
            grant: false,
            reason: OverrideReason::JwtRequired,
            reference,
        };
    }

    let operation = match backend.get_operation(&porc.operation, token).await {
        Ok(operation) => operation,
        Err(e) => {
            let reference =
                BundleReference::new(Phase::System, porc.operation.clone(), Decision::Deny)
                    .with_reason(e.reason_code(), e.to_string());
            return OperationOutcome::Decided {
                grant: false,
                reference,
            };
        }
    };

    match operation.handle.evaluate_int(input, token) {
        Ok(value) if value > 0 => {
            info!(operation = %porc.operation, value, "operation policy bypass");
            let reference =
                BundleReference::new(Phase::System, operation.mrn.clone(), Decision::Grant)
                    .with_fingerprint(operation.handle.fingerprint())
                    .with_value(value);
            OperationOutcome::Override {
                grant: true,
                reason: OverrideReason::Bypass,
                reference,
            }
        }
        Ok(0) => {
            let reference =
                BundleReference::new(Phase::System, operation.mrn.clone(), Decision::Grant)
                    .with_fingerprint(operation.handle.fingerprint())
                    .with_value(0);
            OperationOutcome::Decided {
                grant: true,
                reference,
            }
        }
        Ok(value) => {
            let reference =
                BundleReference::new(Phase::System, operation.mrn.clone(), Decision::Deny)
                    .with_fingerprint(operation.handle.fingerprint())
                    .with_value(value);
            OperationOutcome::Decided {
                grant: false,
                reference,
            }
        }
        Err(e) => {
            let reference =
                BundleReference::new(Phase::System, operation.mrn.clone(), Decision::Deny)
                    .with_fingerprint(operation.handle.fingerprint())
                    .with_reason(eval_reason(&e), e.to_string());
            OperationOutcome::Decided {
                grant: false,
                reference,
            }
        }
    }
}
