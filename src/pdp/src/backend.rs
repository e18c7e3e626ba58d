//! MRN-indexed read interface over the domain model
//!
//! The backend resolves roles, groups, scopes, resource groups, resources,
//! operations, and mappers to evaluable references. The registry-backed
//! implementation compiles every policy at construction: a compile failure
//! anywhere aborts startup, so runtime evaluation never compiles anything.

use crate::error::{PdpError, Result};
use crate::policy::{PolicyCompiler, PolicyHandle};
use crate::porc::RawPorc;
use async_trait::async_trait;
use dashmap::DashMap;
use meridian_bundle::{GroupDef, Mrn, Registry, Resource, RichAnnotations};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// An entity resolved to its evaluable policy
///
/// The identifier is the entity's (role, scope, resource group, operation
/// binding), not the policy's: audit references record who voted, the
/// fingerprint records what was evaluated.
#[derive(Debug, Clone)]
pub struct PolicyReference {
    pub mrn: Mrn,

    pub handle: Arc<PolicyHandle>,

    pub annotations: RichAnnotations,
}

/// A compiled per-domain input transformation
#[derive(Clone)]
pub struct Mapper {
    name: Mrn,
    selector: Regex,
    handle: Arc<PolicyHandle>,
}

impl Mapper {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this mapper applies to the given input discriminator
    pub fn matches(&self, discriminator: &str) -> bool {
        self.selector.is_match(discriminator)
    }

    /// Transform an arbitrary input into a raw request
    pub fn map(&self, input: &Value, token: &CancellationToken) -> Result<RawPorc> {
        let produced = self
            .handle
            .evaluate_value(input, token)
            .map_err(|e| PdpError::Evaluation(format!("mapper '{}': {}", self.name, e)))?;

        serde_json::from_value(produced).map_err(|e| {
            PdpError::Evaluation(format!("mapper '{}' produced a non-PORC shape: {}", self.name, e))
        })
    }
}

/// Read interface the evaluator depends on
///
/// Lookups take the request cancellation token so remote implementations can
/// abandon in-flight work; the in-memory implementation ignores it.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn get_role(&self, mrn: &str, token: &CancellationToken) -> Result<PolicyReference>;

    async fn get_group(&self, mrn: &str, token: &CancellationToken) -> Result<GroupDef>;

    async fn get_scope(&self, mrn: &str, token: &CancellationToken) -> Result<PolicyReference>;

    async fn get_resource_group(
        &self,
        mrn: &str,
        token: &CancellationToken,
    ) -> Result<PolicyReference>;

    /// Qualify a bare resource identifier via the resource selector tables,
    /// falling back to the default resource group
    async fn get_resource(&self, mrn: &str, token: &CancellationToken) -> Result<Resource>;

    /// Resolve an operation string through the ordered selector table
    async fn get_operation(&self, operation: &str, token: &CancellationToken)
        -> Result<PolicyReference>;

    /// Resolve the mapper for a domain, or the registry's only mapper
    fn get_mapper(&self, domain: Option<&str>) -> Result<Mapper>;
}

struct OperationMatcher {
    name: Mrn,
    selectors: Vec<Regex>,
    policy: Mrn,
}

struct ResourceMatcher {
    selectors: Vec<Regex>,
    group: Mrn,
}

/// Backend over a validated in-memory registry
pub struct RegistryBackend {
    registry: Arc<Registry>,
    handles: HashMap<Mrn, Arc<PolicyHandle>>,
    operations: Vec<OperationMatcher>,
    resources: Vec<ResourceMatcher>,
    mappers: Vec<(String, Mapper)>,
    default_group: Option<Mrn>,
    resource_cache: DashMap<String, Resource>,
}

impl RegistryBackend {
    /// Compile every policy and mapper across the registry
    pub fn new(registry: Arc<Registry>, compiler: &PolicyCompiler) -> Result<Self> {
        let mut handles: HashMap<Mrn, Arc<PolicyHandle>> = HashMap::new();
        for domain in registry.domains() {
            for policy in domain.policies.values() {
                let bindings = registry.merged_bindings(policy)?;
                let handle = compiler
                    .compile(policy.mrn.clone(), &policy.source, bindings)
                    .map_err(|e| PdpError::Compilation(e.to_string()))?;
                handles.insert(policy.mrn.clone(), Arc::new(handle));
            }
        }

        // Selector regexes were validated with the registry; recompilation
        // here cannot fail for a registry that constructed.
        let compile_regex = |pattern: &str| -> Result<Regex> {
            Regex::new(pattern).map_err(|e| PdpError::Internal(e.to_string()))
        };

        let mut operations = Vec::new();
        for binding in registry.operations() {
            let selectors = binding
                .selectors
                .iter()
                .map(|s| compile_regex(s))
                .collect::<Result<Vec<_>>>()?;
            operations.push(OperationMatcher {
                name: binding.name.clone(),
                selectors,
                policy: binding.policy.clone(),
            });
        }

        let mut resources = Vec::new();
        for selector in registry.resource_selectors() {
            let selectors = selector
                .selectors
                .iter()
                .map(|s| compile_regex(s))
                .collect::<Result<Vec<_>>>()?;
            resources.push(ResourceMatcher {
                selectors,
                group: selector.group.clone(),
            });
        }

        let unrestricted = PolicyCompiler::unrestricted();
        let mut mappers = Vec::new();
        for (domain, def) in registry.mappers() {
            let handle = unrestricted
                .compile(def.name.clone(), &def.source, serde_json::Map::new())
                .map_err(|e| PdpError::Compilation(e.to_string()))?;
            mappers.push((
                domain.to_string(),
                Mapper {
                    name: def.name.clone(),
                    selector: compile_regex(&def.selector)?,
                    handle: Arc::new(handle),
                },
            ));
        }

        let default_group = registry.default_resource_group().map(|g| g.mrn.clone());

        info!(
            policies = handles.len(),
            mappers = mappers.len(),
            "backend ready"
        );

        Ok(Self {
            registry,
            handles,
            operations,
            resources,
            mappers,
            default_group,
            resource_cache: DashMap::new(),
        })
    }

    fn handle(&self, policy: &str) -> Result<Arc<PolicyHandle>> {
        self.handles
            .get(policy)
            .cloned()
            .ok_or_else(|| PdpError::Internal(format!("uncompiled policy: {}", policy)))
    }
}

#[async_trait]
impl Backend for RegistryBackend {
    async fn get_role(&self, mrn: &str, _token: &CancellationToken) -> Result<PolicyReference> {
        let role = self
            .registry
            .role(mrn)
            .ok_or_else(|| PdpError::NotFound(format!("role: {}", mrn)))?;

        Ok(PolicyReference {
            mrn: role.mrn.clone(),
            handle: self.handle(&role.policy)?,
            annotations: role.annotations.clone(),
        })
    }

    async fn get_group(&self, mrn: &str, _token: &CancellationToken) -> Result<GroupDef> {
        self.registry
            .group(mrn)
            .cloned()
            .ok_or_else(|| PdpError::NotFound(format!("group: {}", mrn)))
    }

    async fn get_scope(&self, mrn: &str, _token: &CancellationToken) -> Result<PolicyReference> {
        let scope = self
            .registry
            .scope(mrn)
            .ok_or_else(|| PdpError::NotFound(format!("scope: {}", mrn)))?;

        Ok(PolicyReference {
            mrn: scope.mrn.clone(),
            handle: self.handle(&scope.policy)?,
            annotations: scope.annotations.clone(),
        })
    }

    async fn get_resource_group(
        &self,
        mrn: &str,
        _token: &CancellationToken,
    ) -> Result<PolicyReference> {
        let group = self
            .registry
            .resource_group(mrn)
            .ok_or_else(|| PdpError::NotFound(format!("resource group: {}", mrn)))?;

        Ok(PolicyReference {
            mrn: group.mrn.clone(),
            handle: self.handle(&group.policy)?,
            annotations: group.annotations.clone(),
        })
    }

    async fn get_resource(&self, mrn: &str, _token: &CancellationToken) -> Result<Resource> {
        if let Some(hit) = self.resource_cache.get(mrn) {
            return Ok(hit.clone());
        }

        let mut resource = Resource::bare(mrn);

        let matched = self
            .resources
            .iter()
            .find(|m| m.selectors.iter().any(|re| re.is_match(mrn)));

        match matched {
            Some(matcher) => {
                debug!(resource = mrn, group = %matcher.group, "resource selector matched");
                resource.group = Some(matcher.group.clone());
            }
            None => {
                resource.group = self.default_group.clone();
            }
        }

        self.resource_cache.insert(mrn.to_string(), resource.clone());
        Ok(resource)
    }

    async fn get_operation(
        &self,
        operation: &str,
        _token: &CancellationToken,
    ) -> Result<PolicyReference> {
        for matcher in &self.operations {
            if matcher.selectors.iter().any(|re| re.is_match(operation)) {
                return Ok(PolicyReference {
                    mrn: matcher.name.clone(),
                    handle: self.handle(&matcher.policy)?,
                    annotations: RichAnnotations::new(),
                });
            }
        }

        Err(PdpError::NotFound(format!("operation: {}", operation)))
    }

    fn get_mapper(&self, domain: Option<&str>) -> Result<Mapper> {
        let candidates: Vec<&Mapper> = match domain {
            Some(name) => self
                .mappers
                .iter()
                .filter(|(d, _)| d == name)
                .map(|(_, m)| m)
                .collect(),
            None => self.mappers.iter().map(|(_, m)| m).collect(),
        };

        match candidates.as_slice() {
            [] => Err(PdpError::NotFound(format!(
                "mapper: {}",
                domain.unwrap_or("<any>")
            ))),
            [only] => Ok((*only).clone()),
            [first, second, ..] => Err(PdpError::Ambiguous(format!(
                "mappers '{}' and '{}' both apply",
                first.name, second.name
            ))),
        }
    }
}
