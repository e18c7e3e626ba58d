//! End-to-end authorization scenarios over a full registry

use meridian_bundle::{
    AnnotationValue, DomainModel, GroupDef, OperationBinding, PolicySource, Registry,
    ResourceGroupDef, ResourceSelector, RichAnnotations, RoleDef, ScopeDef,
};
use meridian_pdp::{
    AuthorizeOptions, Decision, Engine, EngineConfig, MemoryAccessLog, OverrideReason, PdpError,
    Phase, PolicyCompiler, ReasonCode, RegistryBackend,
};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn policy(mrn: &str, source: &str) -> PolicySource {
    PolicySource {
        mrn: mrn.to_string(),
        source: source.to_string(),
        libraries: Vec::new(),
    }
}

fn annotation(key: &str, value: Value) -> RichAnnotations {
    let mut annotations = RichAnnotations::new();
    annotations.insert(key, AnnotationValue::new(value));
    annotations
}

fn registry() -> Arc<Registry> {
    let domain = DomainModel::new("iam")
        .with_policy(policy("mrn:iam:policy:operation", "0"))
        .with_policy(policy("mrn:iam:policy:bypass", "1"))
        .with_policy(policy("mrn:iam:policy:allow", "true"))
        .with_policy(policy(
            "mrn:iam:policy:clearance",
            r#"input.principal.mclearance in ["HIGH", "MAXIMUM"]"#,
        ))
        .with_role(RoleDef {
            mrn: "mrn:iam:role:admin".to_string(),
            policy: "mrn:iam:policy:allow".to_string(),
            annotations: RichAnnotations::new(),
        })
        .with_role(RoleDef {
            mrn: "mrn:iam:role:myrole".to_string(),
            policy: "mrn:iam:policy:allow".to_string(),
            annotations: RichAnnotations::new(),
        })
        .with_role(RoleDef {
            mrn: "mrn:iam:role:a".to_string(),
            policy: "mrn:iam:policy:allow".to_string(),
            annotations: annotation("env", json!("role")),
        })
        .with_group(GroupDef {
            mrn: "mrn:iam:group:g".to_string(),
            roles: vec!["mrn:iam:role:a".to_string()],
            annotations: annotation("env", json!("group")),
        })
        .with_scope(ScopeDef {
            mrn: "mrn:iam:scope:s".to_string(),
            policy: "mrn:iam:policy:allow".to_string(),
            annotations: annotation("env", json!("scope")),
        })
        .with_resource_group(ResourceGroupDef {
            mrn: "mrn:iam:resource-group:standard".to_string(),
            policy: "mrn:iam:policy:allow".to_string(),
            default: true,
            annotations: RichAnnotations::new(),
        })
        .with_resource_group(ResourceGroupDef {
            mrn: "mrn:iam:resource-group:restricted".to_string(),
            policy: "mrn:iam:policy:clearance".to_string(),
            default: false,
            annotations: RichAnnotations::new(),
        })
        .with_operation(OperationBinding {
            name: "mrn:iam:operation:public".to_string(),
            selectors: vec!["^vault:public:.*$".to_string()],
            policy: "mrn:iam:policy:bypass".to_string(),
        })
        .with_operation(OperationBinding {
            name: "mrn:iam:operation:vault".to_string(),
            selectors: vec!["^vault:.*$".to_string()],
            policy: "mrn:iam:policy:operation".to_string(),
        })
        .with_resource_selector(ResourceSelector {
            name: "mrn:iam:selector:shared".to_string(),
            selectors: vec!["^mrn:vault:shared$".to_string()],
            group: "mrn:iam:resource-group:restricted".to_string(),
        });

    Arc::new(Registry::new(vec![domain]).unwrap())
}

fn engine_with_sink() -> (Engine, Arc<MemoryAccessLog>) {
    let mut config = EngineConfig::default();
    config.anti_lockout_roles = HashSet::from(["mrn:iam:role:admin".to_string()]);

    let sink = Arc::new(MemoryAccessLog::new());
    let engine = Engine::with_registry(config, registry(), sink.clone()).unwrap();
    (engine, sink)
}

fn engine() -> Engine {
    engine_with_sink().0
}

fn phase_refs(
    record: &meridian_pdp::AccessRecord,
    phase: Phase,
) -> Vec<&meridian_pdp::BundleReference> {
    record.references.iter().filter(|r| r.phase == phase).collect()
}

#[tokio::test]
async fn anti_lockout_role_grants_with_single_system_reference() {
    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {
                    "sub": "u",
                    "mroles": ["mrn:iam:role:admin"],
                    "scopes": ["mrn:iam:scope:s"],
                },
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Grant);
    assert!(record.system_override);
    assert_eq!(record.override_reason, Some(OverrideReason::AntiLockout));
    assert_eq!(record.references.len(), 1);
    assert_eq!(record.references[0].phase, Phase::System);
    assert_eq!(record.references[0].decision, Decision::Grant);
}

#[tokio::test]
async fn anonymous_principal_denies_with_jwt_required() {
    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {},
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Deny);
    assert!(record.system_override);
    assert_eq!(record.override_reason, Some(OverrideReason::JwtRequired));
    assert_eq!(record.references.len(), 1);
    assert_eq!(record.references[0].phase, Phase::System);
    assert_eq!(record.references[0].decision, Decision::Deny);
    assert_eq!(record.references[0].reason_code, ReasonCode::PolicyOutcome);
}

#[tokio::test]
async fn unknown_scope_denies_with_notfound_reference() {
    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {
                    "sub": "u",
                    "mroles": ["mrn:iam:role:myrole"],
                    "scopes": ["bad"],
                },
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Deny);
    assert!(!record.system_override);
    assert_eq!(record.references.len(), 4);

    let system = phase_refs(&record, Phase::System);
    assert_eq!(system.len(), 1);
    assert_eq!(system[0].decision, Decision::Grant);

    let identity = phase_refs(&record, Phase::Identity);
    assert_eq!(identity.len(), 1);
    assert_eq!(identity[0].decision, Decision::Grant);

    let resource = phase_refs(&record, Phase::Resource);
    assert_eq!(resource.len(), 1);
    assert_eq!(resource[0].decision, Decision::Grant);

    let scope = phase_refs(&record, Phase::Scope);
    assert_eq!(scope.len(), 1);
    assert_eq!(scope[0].decision, Decision::Deny);
    assert_eq!(scope[0].reason_code, ReasonCode::NotfoundError);
    assert!(scope[0].reason.contains("bad"));
}

#[tokio::test]
async fn one_granting_role_carries_identity_phase() {
    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {
                    "sub": "u",
                    "mroles": ["mrn:iam:role:myrole", "mrn:iam:role:notfound"],
                },
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Grant);

    let identity = phase_refs(&record, Phase::Identity);
    assert_eq!(identity.len(), 2);
    assert_eq!(identity[0].id, "mrn:iam:role:myrole");
    assert_eq!(identity[0].decision, Decision::Grant);
    assert_eq!(identity[1].id, "mrn:iam:role:notfound");
    assert_eq!(identity[1].decision, Decision::Deny);
    assert_eq!(identity[1].reason_code, ReasonCode::NotfoundError);
    assert!(identity[1].reason.contains("mrn:iam:role:notfound"));

    assert!(phase_refs(&record, Phase::Scope).is_empty());
}

#[tokio::test]
async fn insufficient_clearance_denies_resource_phase() {
    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {
                    "sub": "u",
                    "mroles": ["mrn:iam:role:myrole"],
                    "mclearance": "LOW",
                },
                "operation": "vault:admin:create",
                "resource": "mrn:vault:shared",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Deny);

    assert_eq!(phase_refs(&record, Phase::System)[0].decision, Decision::Grant);
    assert_eq!(phase_refs(&record, Phase::Identity)[0].decision, Decision::Grant);

    let resource = phase_refs(&record, Phase::Resource);
    assert_eq!(resource.len(), 1);
    assert_eq!(resource[0].decision, Decision::Deny);
    assert_eq!(resource[0].reason_code, ReasonCode::PolicyOutcome);
    assert_eq!(resource[0].id, "mrn:iam:resource-group:restricted");
}

#[tokio::test]
async fn sufficient_clearance_grants_resource_phase() {
    let (decision, _record) = engine()
        .authorize_value(
            json!({
                "principal": {
                    "sub": "u",
                    "mroles": ["mrn:iam:role:myrole"],
                    "mclearance": "HIGH",
                },
                "operation": "vault:admin:create",
                "resource": "mrn:vault:shared",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Grant);
}

#[tokio::test]
async fn principal_annotation_wins_the_identity_chain() {
    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {
                    "sub": "u",
                    "mgroups": ["mrn:iam:group:g"],
                    "scopes": ["mrn:iam:scope:s"],
                    "mannotations": {"env": "principal"},
                },
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Grant);

    let porc: Value = serde_json::from_str(&record.porc).unwrap();
    assert_eq!(porc["principal"]["mannotations"]["env"], json!("principal"));
}

#[tokio::test]
async fn scope_annotation_wins_when_principal_sets_none() {
    let (_decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {
                    "sub": "u",
                    "mgroups": ["mrn:iam:group:g"],
                    "scopes": ["mrn:iam:scope:s"],
                },
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    let porc: Value = serde_json::from_str(&record.porc).unwrap();
    assert_eq!(porc["principal"]["mannotations"]["env"], json!("scope"));
}

#[tokio::test]
async fn positive_operation_outcome_bypasses_remaining_phases() {
    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {"sub": "u", "mroles": ["mrn:iam:role:myrole"]},
                "operation": "vault:public:read",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Grant);
    assert!(record.system_override);
    assert_eq!(record.override_reason, Some(OverrideReason::Bypass));
    assert_eq!(record.references.len(), 1);
    assert_eq!(record.references[0].value, Some(1));
}

#[tokio::test]
async fn principal_without_bindings_denies_identity_phase() {
    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {"sub": "u"},
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Deny);

    let identity = phase_refs(&record, Phase::Identity);
    assert_eq!(identity.len(), 1);
    assert_eq!(identity[0].id, "");
    assert_eq!(identity[0].reason_code, ReasonCode::PolicyOutcome);
}

#[tokio::test]
async fn unmatched_operation_denies_without_override() {
    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {"sub": "u", "mroles": ["mrn:iam:role:myrole"]},
                "operation": "ledger:query:list",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Deny);
    assert!(!record.system_override);

    let system = phase_refs(&record, Phase::System);
    assert_eq!(system.len(), 1);
    assert_eq!(system[0].reason_code, ReasonCode::NotfoundError);
}

#[tokio::test]
async fn cancelled_request_fails_closed() {
    let token = CancellationToken::new();
    token.cancel();

    let options = AuthorizeOptions {
        cancellation: Some(token),
        ..Default::default()
    };

    let (decision, record) = engine()
        .authorize_value(
            json!({
                "principal": {"sub": "u", "mroles": ["mrn:iam:role:myrole"]},
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            options,
        )
        .await
        .unwrap();

    assert_eq!(decision, Decision::Deny);
    assert!(record
        .references
        .iter()
        .all(|r| r.decision == Decision::Deny));
    assert!(record
        .references
        .iter()
        .any(|r| r.reason_code == ReasonCode::UnknownError));
}

#[tokio::test]
async fn tight_deadline_still_terminates() {
    let options = AuthorizeOptions {
        deadline: Some(Duration::from_millis(1)),
        ..Default::default()
    };

    let result = engine()
        .authorize_value(
            json!({
                "principal": {"sub": "u", "mroles": ["mrn:iam:role:myrole"]},
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            options,
        )
        .await;

    assert!(result.is_ok());
}

#[tokio::test]
async fn decisions_are_deterministic_across_runs() {
    let engine = engine();
    let request = json!({
        "principal": {
            "sub": "u",
            "mroles": ["mrn:iam:role:myrole", "mrn:iam:role:notfound"],
            "scopes": ["mrn:iam:scope:s"],
        },
        "operation": "vault:admin:create",
        "resource": "mrn:vault:v1",
    });

    let (first_decision, first) = engine
        .authorize_value(request.clone(), AuthorizeOptions::default())
        .await
        .unwrap();
    let (second_decision, second) = engine
        .authorize_value(request, AuthorizeOptions::default())
        .await
        .unwrap();

    assert_eq!(first_decision, second_decision);
    assert_eq!(first.references, second.references);
    assert_eq!(first.porc, second.porc);
    assert_ne!(first.metadata.id, second.metadata.id);
}

#[tokio::test]
async fn audit_records_reach_the_sink() {
    let (engine, sink) = engine_with_sink();

    engine
        .authorize_value(
            json!({
                "principal": {"sub": "u", "mroles": ["mrn:iam:role:myrole"]},
                "operation": "vault:admin:create",
                "resource": "mrn:vault:v1",
            }),
            AuthorizeOptions::default(),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].operation, "vault:admin:create");
    assert_eq!(records[0].resource, "mrn:vault:v1");
}

#[tokio::test]
async fn normalization_is_idempotent() {
    let backend =
        RegistryBackend::new(registry(), &PolicyCompiler::unrestricted()).unwrap();
    let token = CancellationToken::new();

    let raw: meridian_pdp::RawPorc = serde_json::from_value(json!({
        "principal": {
            "sub": "u",
            "mgroups": ["mrn:iam:group:g"],
            "scopes": ["mrn:iam:scope:s"],
            "mannotations": {"env": "principal", "tags": ["x"]},
        },
        "operation": "vault:admin:create",
        "resource": "mrn:vault:shared",
    }))
    .unwrap();

    let once = meridian_pdp::porc::normalize(&backend, raw, &token)
        .await
        .unwrap();
    let wire_once = once.wire();

    let reparsed: meridian_pdp::RawPorc = serde_json::from_value(wire_once.clone()).unwrap();
    let twice = meridian_pdp::porc::normalize(&backend, reparsed, &token)
        .await
        .unwrap();

    assert_eq!(twice.wire(), wire_once);
}

#[tokio::test]
async fn malformed_request_is_an_error_not_a_record() {
    let (engine, sink) = engine_with_sink();

    let result = engine
        .authorize_value(json!({"operation": "vault:admin:create"}), AuthorizeOptions::default())
        .await;

    assert!(matches!(result, Err(PdpError::InvalidRequest(_))));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.is_empty());
}
