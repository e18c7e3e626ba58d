//! Phase 3: resource
//!
//! A single vote from the policy of the resource's group. A resource that
//! failed to resolve during normalization, or that resolved to no group,
//! denies with the captured reason so the audit trail shows why.

use super::eval_reason;
use crate::backend::Backend;
use crate::porc::NormalizedPorc;
use crate::record::{BundleReference, Decision, Phase, ReasonCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub(crate) async fn evaluate(
    backend: &dyn Backend,
    porc: &NormalizedPorc,
    input: &Value,
    token: &CancellationToken,
) -> (bool, BundleReference) {
    if let Some((code, message)) = &porc.resource_error {
        let reference =
            BundleReference::new(Phase::Resource, porc.resource.mrn.clone(), Decision::Deny)
                .with_reason(*code, message.clone());
        return (false, reference);
    }

    let group = match &porc.resource.group {
        Some(group) => group,
        None => {
            let reference =
                BundleReference::new(Phase::Resource, porc.resource.mrn.clone(), Decision::Deny)
                    .with_reason(
                        ReasonCode::NotfoundError,
                        format!("no resource group for {}", porc.resource.mrn),
                    );
            return (false, reference);
        }
    };

    match backend.get_resource_group(group, token).await {
        Ok(reference) => match reference.handle.evaluate_bool(input, token) {
            Ok(granted) => {
                let bundle = BundleReference::new(
                    Phase::Resource,
                    reference.mrn,
                    Decision::from_grant(granted),
                )
                .with_fingerprint(reference.handle.fingerprint());
                (granted, bundle)
            }
            Err(e) => {
                let bundle = BundleReference::new(Phase::Resource, reference.mrn, Decision::Deny)
                    .with_fingerprint(reference.handle.fingerprint())
                    .with_reason(eval_reason(&e), e.to_string());
                (false, bundle)
            }
        },
        Err(e) => {
            let bundle = BundleReference::new(Phase::Resource, group.clone(), Decision::Deny)
                .with_reason(e.reason_code(), e.to_string());
            (false, bundle)
        }
    }
}
