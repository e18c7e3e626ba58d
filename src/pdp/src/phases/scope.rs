//! Phase 4: scope
//!
//! Optional: a request without scopes passes vacuously and records nothing.
//! With scopes present, each votes through its policy and one grant carries
//! the phase.

use super::eval_reason;
use crate::backend::Backend;
use crate::porc::NormalizedPorc;
use crate::record::{BundleReference, Decision, Phase};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub(crate) async fn evaluate(
    backend: &dyn Backend,
    porc: &NormalizedPorc,
    input: &Value,
    token: &CancellationToken,
) -> (bool, Vec<BundleReference>) {
    if porc.principal.scopes.is_empty() {
        return (true, Vec::new());
    }

    let references = futures::future::join_all(
        porc.principal
            .scopes
            .iter()
            .map(|scope| evaluate_scope(backend, scope, input, token)),
    )
    .await;

    let grant = references.iter().any(|r| r.decision == Decision::Grant);
    (grant, references)
}

async fn evaluate_scope(
    backend: &dyn Backend,
    scope: &str,
    input: &Value,
    token: &CancellationToken,
) -> BundleReference {
    match backend.get_scope(scope, token).await {
        Ok(reference) => match reference.handle.evaluate_bool(input, token) {
            Ok(granted) => {
                BundleReference::new(Phase::Scope, reference.mrn, Decision::from_grant(granted))
                    .with_fingerprint(reference.handle.fingerprint())
            }
            Err(e) => BundleReference::new(Phase::Scope, reference.mrn, Decision::Deny)
                .with_fingerprint(reference.handle.fingerprint())
                .with_reason(eval_reason(&e), e.to_string()),
        },
        Err(e) => BundleReference::new(Phase::Scope, scope.to_string(), Decision::Deny)
            .with_reason(e.reason_code(), e.to_string()),
    }
}
