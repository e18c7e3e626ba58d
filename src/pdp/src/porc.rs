//! Request normalization
//!
//! A raw request arrives as JSON (or an equivalent parsed value) with a
//! principal, an operation string, a resource (bare identifier or fully
//! qualified object), and free-form context. Normalization qualifies the
//! resource through the backend, merges the annotation chains, and produces
//! the final request every policy sees. Normalizing an already normalized
//! request is a no-op.

use crate::backend::Backend;
use crate::error::{PdpError, Result};
use crate::record::ReasonCode;
use meridian_bundle::{Classification, Mrn, Resource, RichAnnotations};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Raw principal as supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPrincipal {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mrealm: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mroles: Vec<Mrn>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mgroups: Vec<Mrn>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<Mrn>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mclearance: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub mannotations: Map<String, Value>,
}

/// Raw resource: a bare identifier or a fully qualified object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawResource {
    Mrn(String),
    Qualified(RawResourceObject),
}

/// Fully qualified resource as supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawResourceObject {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Mrn>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,

    /// Plain annotations, promoted to the rich form with default strategy
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub annotations: Map<String, Value>,
}

/// Raw request accepted by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPorc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<RawPrincipal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<RawResource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

/// Normalized principal identity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Principal {
    pub sub: Option<String>,
    pub mrealm: Option<String>,
    pub mroles: Vec<Mrn>,
    pub mgroups: Vec<Mrn>,
    pub scopes: Vec<Mrn>,
    pub mclearance: Option<String>,
    pub mannotations: RichAnnotations,
}

impl Principal {
    /// An empty or absent principal is an unauthenticated request
    pub fn is_anonymous(&self) -> bool {
        self.sub.is_none()
            && self.mroles.is_empty()
            && self.mgroups.is_empty()
            && self.scopes.is_empty()
    }
}

/// The final normalized request handed to every policy
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPorc {
    pub principal: Principal,
    pub operation: String,
    pub resource: Resource,

    /// A captured resource resolution failure, converted to a deny vote by
    /// the resource phase rather than surfaced as a request error
    pub resource_error: Option<(ReasonCode, String)>,

    pub context: Value,
}

impl NormalizedPorc {
    /// The plain JSON wire form: rich annotations flatten to their values
    pub fn wire(&self) -> Value {
        let mut principal = Map::new();
        if let Some(sub) = &self.principal.sub {
            principal.insert("sub".to_string(), json!(sub));
        }
        if let Some(realm) = &self.principal.mrealm {
            principal.insert("mrealm".to_string(), json!(realm));
        }
        if !self.principal.mroles.is_empty() {
            principal.insert("mroles".to_string(), json!(self.principal.mroles));
        }
        if !self.principal.mgroups.is_empty() {
            principal.insert("mgroups".to_string(), json!(self.principal.mgroups));
        }
        if !self.principal.scopes.is_empty() {
            principal.insert("scopes".to_string(), json!(self.principal.scopes));
        }
        if let Some(clearance) = &self.principal.mclearance {
            principal.insert("mclearance".to_string(), json!(clearance));
        }
        if !self.principal.mannotations.is_empty() {
            principal.insert(
                "mannotations".to_string(),
                Value::Object(self.principal.mannotations.to_wire()),
            );
        }

        let mut resource = Map::new();
        resource.insert("id".to_string(), json!(self.resource.mrn));
        if let Some(owner) = &self.resource.owner {
            resource.insert("owner".to_string(), json!(owner));
        }
        if let Some(group) = &self.resource.group {
            resource.insert("group".to_string(), json!(group));
        }
        resource.insert(
            "classification".to_string(),
            json!(self.resource.classification),
        );
        if !self.resource.annotations.is_empty() {
            resource.insert(
                "annotations".to_string(),
                Value::Object(self.resource.annotations.to_wire()),
            );
        }

        json!({
            "principal": Value::Object(principal),
            "operation": self.operation,
            "resource": Value::Object(resource),
            "context": self.context,
        })
    }
}

/// Normalize a raw request against the backend
pub async fn normalize(
    backend: &dyn Backend,
    raw: RawPorc,
    token: &CancellationToken,
) -> Result<NormalizedPorc> {
    let operation = match raw.operation {
        Some(op) if !op.is_empty() => op,
        _ => return Err(PdpError::InvalidRequest("operation is required".to_string())),
    };

    let raw_principal = raw.principal.unwrap_or_default();

    let (resource, resource_error) = resolve_resource(backend, raw.resource, token).await?;

    let mut principal = Principal {
        sub: raw_principal.sub,
        mrealm: raw_principal.mrealm,
        mroles: raw_principal.mroles,
        mgroups: raw_principal.mgroups,
        scopes: raw_principal.scopes,
        mclearance: raw_principal.mclearance,
        mannotations: RichAnnotations::new(),
    };
    principal.mannotations =
        identity_annotations(backend, &principal, &raw_principal.mannotations, token).await;

    let resource = merge_group_annotations(backend, resource, token).await;

    debug!(
        operation = %operation,
        resource = %resource.mrn,
        anonymous = principal.is_anonymous(),
        "request normalized"
    );

    Ok(NormalizedPorc {
        principal,
        operation,
        resource,
        resource_error,
        context: raw.context.unwrap_or_else(|| json!({})),
    })
}

/// Qualify the resource, capturing lookup failures instead of failing
async fn resolve_resource(
    backend: &dyn Backend,
    raw: Option<RawResource>,
    token: &CancellationToken,
) -> Result<(Resource, Option<(ReasonCode, String)>)> {
    let raw = raw.ok_or_else(|| PdpError::InvalidRequest("resource is required".to_string()))?;

    match raw {
        RawResource::Mrn(mrn) => match backend.get_resource(&mrn, token).await {
            Ok(resource) => Ok((resource, None)),
            Err(e) => Ok((
                Resource::bare(mrn),
                Some((e.reason_code(), e.to_string())),
            )),
        },
        RawResource::Qualified(object) => {
            let mut resource = Resource {
                mrn: object.id,
                owner: object.owner,
                group: object.group,
                classification: object.classification.unwrap_or_default(),
                annotations: RichAnnotations::from_plain(&object.annotations),
            };

            if resource.group.is_none() {
                match backend.get_resource(&resource.mrn, token).await {
                    Ok(resolved) => resource.group = resolved.group,
                    Err(e) => {
                        return Ok((resource, Some((e.reason_code(), e.to_string()))));
                    }
                }
            }

            Ok((resource, None))
        }
    }
}

/// Merge resource-group annotations under the resource-level ones
async fn merge_group_annotations(
    backend: &dyn Backend,
    mut resource: Resource,
    token: &CancellationToken,
) -> Resource {
    if let Some(group) = &resource.group {
        if let Ok(reference) = backend.get_resource_group(group, token).await {
            if !reference.annotations.is_empty() {
                resource.annotations =
                    RichAnnotations::merge(&reference.annotations, &resource.annotations);
            }
        }
    }
    resource
}

/// Build the identity annotation chain: roles, then groups, then scopes,
/// then whatever the principal carries directly
async fn identity_annotations(
    backend: &dyn Backend,
    principal: &Principal,
    direct: &Map<String, Value>,
    token: &CancellationToken,
) -> RichAnnotations {
    let mut role_mrns: Vec<Mrn> = Vec::new();
    for role in &principal.mroles {
        if !role_mrns.contains(role) {
            role_mrns.push(role.clone());
        }
    }

    let mut group_layers: Vec<(Mrn, RichAnnotations)> = Vec::new();
    for group in &principal.mgroups {
        if let Ok(def) = backend.get_group(group, token).await {
            for role in &def.roles {
                if !role_mrns.contains(role) {
                    role_mrns.push(role.clone());
                }
            }
            if !def.annotations.is_empty() {
                group_layers.push((def.mrn, def.annotations));
            }
        }
    }

    let mut role_layers: Vec<(Mrn, RichAnnotations)> = Vec::new();
    for role in &role_mrns {
        if let Ok(reference) = backend.get_role(role, token).await {
            if !reference.annotations.is_empty() {
                role_layers.push((reference.mrn, reference.annotations));
            }
        }
    }

    let mut scope_layers: Vec<(Mrn, RichAnnotations)> = Vec::new();
    for scope in &principal.scopes {
        if let Ok(reference) = backend.get_scope(scope, token).await {
            if !reference.annotations.is_empty() {
                scope_layers.push((reference.mrn, reference.annotations));
            }
        }
    }

    // Equal-priority contributors fold in ascending MRN order so the layer
    // merge is deterministic regardless of lookup order.
    let combine = |mut layers: Vec<(Mrn, RichAnnotations)>| -> RichAnnotations {
        layers.sort_by(|a, b| a.0.cmp(&b.0));
        RichAnnotations::combine(layers.iter().map(|(_, a)| a))
    };

    let roles = combine(role_layers);
    let groups = combine(group_layers);
    let scopes = combine(scope_layers);
    let principal_layer = RichAnnotations::from_plain(direct);

    RichAnnotations::fold_chain([&roles, &groups, &scopes, &principal_layer])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_porc_parsing() {
        let raw: RawPorc = serde_json::from_value(json!({
            "principal": {"sub": "u", "mroles": ["mrn:iam:role:a"]},
            "operation": "vault:admin:create",
            "resource": "mrn:vault:v1",
        }))
        .unwrap();

        assert_eq!(raw.operation.as_deref(), Some("vault:admin:create"));
        assert!(matches!(raw.resource, Some(RawResource::Mrn(_))));
        assert_eq!(raw.principal.unwrap().mroles.len(), 1);
    }

    #[test]
    fn test_raw_resource_qualified_parsing() {
        let raw: RawResource = serde_json::from_value(json!({
            "id": "mrn:vault:v1",
            "owner": "alice",
            "classification": "HIGH",
            "annotations": {"tier": "gold"},
        }))
        .unwrap();

        match raw {
            RawResource::Qualified(object) => {
                assert_eq!(object.id, "mrn:vault:v1");
                assert_eq!(object.classification, Some(Classification::High));
                assert_eq!(object.annotations.get("tier"), Some(&json!("gold")));
            }
            RawResource::Mrn(_) => panic!("expected qualified resource"),
        }
    }

    #[test]
    fn test_anonymous_principal() {
        let principal = Principal::default();
        assert!(principal.is_anonymous());

        let named = Principal {
            sub: Some("u".to_string()),
            ..Default::default()
        };
        assert!(!named.is_anonymous());
    }

    #[test]
    fn test_wire_form_shape() {
        let porc = NormalizedPorc {
            principal: Principal {
                sub: Some("u".to_string()),
                mroles: vec!["mrn:iam:role:a".to_string()],
                ..Default::default()
            },
            operation: "vault:admin:create".to_string(),
            resource: Resource::bare("mrn:vault:v1"),
            resource_error: None,
            context: json!({}),
        };

        let wire = porc.wire();
        assert_eq!(wire["operation"], json!("vault:admin:create"));
        assert_eq!(wire["resource"]["id"], json!("mrn:vault:v1"));
        assert_eq!(wire["resource"]["classification"], json!("UNASSIGNED"));
        assert_eq!(wire["principal"]["sub"], json!("u"));
        assert!(wire["principal"].get("mclearance").is_none());
    }

    #[test]
    fn test_wire_form_anonymous_principal_is_empty_object() {
        let porc = NormalizedPorc {
            principal: Principal::default(),
            operation: "vault:data:read".to_string(),
            resource: Resource::bare("mrn:vault:v1"),
            resource_error: None,
            context: json!({}),
        };

        assert_eq!(porc.wire()["principal"], json!({}));
    }
}
