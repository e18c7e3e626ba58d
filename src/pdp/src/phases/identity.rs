//! Phase 2: identity
//!
//! The principal's direct roles plus the one-hop expansion of its groups
//! each vote through their role policy; a single grant carries the phase.
//! Missing roles and broken group references deny with a distinct reason
//! code so operators can tell misconfiguration from refusal.

use super::eval_reason;
use crate::backend::Backend;
use crate::error::PdpError;
use crate::porc::NormalizedPorc;
use crate::record::{BundleReference, Decision, Phase, ReasonCode};
use meridian_bundle::Mrn;
use serde_json::Value;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

enum Entry {
    Role(Mrn),
    GroupMissing(Mrn, PdpError),
}

pub(crate) async fn evaluate(
    backend: &dyn Backend,
    porc: &NormalizedPorc,
    input: &Value,
    token: &CancellationToken,
) -> (bool, Vec<BundleReference>) {
    // Effective roles in principal declaration order: direct roles first,
    // then each group's roles. A role reachable twice evaluates once.
    let mut entries: Vec<Entry> = Vec::new();
    let mut seen: HashSet<Mrn> = HashSet::new();

    for role in &porc.principal.mroles {
        if seen.insert(role.clone()) {
            entries.push(Entry::Role(role.clone()));
        }
    }

    for group in &porc.principal.mgroups {
        match backend.get_group(group, token).await {
            Ok(def) => {
                for role in &def.roles {
                    if seen.insert(role.clone()) {
                        entries.push(Entry::Role(role.clone()));
                    }
                }
            }
            Err(e) => entries.push(Entry::GroupMissing(group.clone(), e)),
        }
    }

    if entries.is_empty() {
        let reference = BundleReference::new(Phase::Identity, "", Decision::Deny)
            .with_reason(ReasonCode::PolicyOutcome, "no identity bindings");
        return (false, vec![reference]);
    }

    let references = futures::future::join_all(
        entries
            .iter()
            .map(|entry| evaluate_entry(backend, entry, input, token)),
    )
    .await;

    let grant = references.iter().any(|r| r.decision == Decision::Grant);
    (grant, references)
}

async fn evaluate_entry(
    backend: &dyn Backend,
    entry: &Entry,
    input: &Value,
    token: &CancellationToken,
) -> BundleReference {
    match entry {
        Entry::Role(mrn) => match backend.get_role(mrn, token).await {
            Ok(role) => match role.handle.evaluate_bool(input, token) {
                Ok(granted) => {
                    BundleReference::new(Phase::Identity, role.mrn, Decision::from_grant(granted))
                        .with_fingerprint(role.handle.fingerprint())
                }
                Err(e) => BundleReference::new(Phase::Identity, role.mrn, Decision::Deny)
                    .with_fingerprint(role.handle.fingerprint())
                    .with_reason(eval_reason(&e), e.to_string()),
            },
            Err(e) => BundleReference::new(Phase::Identity, mrn.clone(), Decision::Deny)
                .with_reason(e.reason_code(), e.to_string()),
        },
        Entry::GroupMissing(mrn, e) => {
            BundleReference::new(Phase::Identity, mrn.clone(), Decision::Deny)
                .with_reason(e.reason_code(), e.to_string())
        }
    }
}
