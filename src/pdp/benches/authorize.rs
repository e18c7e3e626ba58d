//! Authorization hot-path benchmark

use criterion::{criterion_group, criterion_main, Criterion};
use meridian_bundle::{
    DomainModel, OperationBinding, PolicySource, Registry, ResourceGroupDef, RichAnnotations,
    RoleDef, ScopeDef,
};
use meridian_pdp::{AuthorizeOptions, Engine, EngineConfig, MemoryAccessLog};
use serde_json::json;
use std::sync::Arc;

fn policy(mrn: &str, source: &str) -> PolicySource {
    PolicySource {
        mrn: mrn.to_string(),
        source: source.to_string(),
        libraries: Vec::new(),
    }
}

fn registry() -> Arc<Registry> {
    let domain = DomainModel::new("iam")
        .with_policy(policy("mrn:iam:policy:operation", "0"))
        .with_policy(policy("mrn:iam:policy:allow", "true"))
        .with_policy(policy(
            "mrn:iam:policy:member",
            r#"input.principal.sub != """#,
        ))
        .with_role(RoleDef {
            mrn: "mrn:iam:role:member".to_string(),
            policy: "mrn:iam:policy:member".to_string(),
            annotations: RichAnnotations::new(),
        })
        .with_role(RoleDef {
            mrn: "mrn:iam:role:auditor".to_string(),
            policy: "mrn:iam:policy:allow".to_string(),
            annotations: RichAnnotations::new(),
        })
        .with_scope(ScopeDef {
            mrn: "mrn:iam:scope:read".to_string(),
            policy: "mrn:iam:policy:allow".to_string(),
            annotations: RichAnnotations::new(),
        })
        .with_resource_group(ResourceGroupDef {
            mrn: "mrn:iam:resource-group:standard".to_string(),
            policy: "mrn:iam:policy:allow".to_string(),
            default: true,
            annotations: RichAnnotations::new(),
        })
        .with_operation(OperationBinding {
            name: "mrn:iam:operation:vault".to_string(),
            selectors: vec!["^vault:.*$".to_string()],
            policy: "mrn:iam:policy:operation".to_string(),
        });

    Arc::new(Registry::new(vec![domain]).unwrap())
}

fn bench_authorize(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    let engine = {
        let _guard = runtime.enter();
        Engine::with_registry(
            EngineConfig::default(),
            registry(),
            Arc::new(MemoryAccessLog::new()),
        )
        .unwrap()
    };

    let request = json!({
        "principal": {
            "sub": "alice",
            "mroles": ["mrn:iam:role:member", "mrn:iam:role:auditor"],
            "scopes": ["mrn:iam:scope:read"],
        },
        "operation": "vault:data:read",
        "resource": "mrn:vault:v1",
    });

    let options = AuthorizeOptions {
        probe: true,
        ..Default::default()
    };

    c.bench_function("authorize_grant", |b| {
        b.to_async(&runtime).iter(|| {
            let request = request.clone();
            let options = options.clone();
            async {
                let (decision, _record) =
                    engine.authorize_value(request, options).await.unwrap();
                decision
            }
        })
    });
}

criterion_group!(benches, bench_authorize);
criterion_main!(benches);
