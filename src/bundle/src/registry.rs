//! Domain models and the cross-domain registry
//!
//! A `DomainModel` is the parsed, validated form of one policy domain. A
//! `Registry` holds an ordered collection of domains and provides uniform
//! lookup across all of them. Both are immutable after construction:
//! updates mean building a new registry and swapping it in atomically.

use crate::error::{BundleError, Result};
use crate::types::{
    GroupDef, Library, MapperDef, Mrn, OperationBinding, PolicySource, ResourceGroupDef,
    ResourceSelector, RoleDef, ScopeDef,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One policy domain: entity maps plus the ordered selector tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainModel {
    /// Domain name (unique within a registry)
    pub name: String,

    #[serde(default)]
    pub policies: HashMap<Mrn, PolicySource>,

    #[serde(default)]
    pub libraries: HashMap<Mrn, Library>,

    #[serde(default)]
    pub roles: HashMap<Mrn, RoleDef>,

    #[serde(default)]
    pub groups: HashMap<Mrn, GroupDef>,

    #[serde(default)]
    pub scopes: HashMap<Mrn, ScopeDef>,

    #[serde(default)]
    pub resource_groups: HashMap<Mrn, ResourceGroupDef>,

    /// Operation selector table, declaration order preserved
    #[serde(default)]
    pub operations: Vec<OperationBinding>,

    /// Resource selector table, declaration order preserved
    #[serde(default)]
    pub resources: Vec<ResourceSelector>,

    #[serde(default)]
    pub mappers: Vec<MapperDef>,
}

impl DomainModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_policy(mut self, policy: PolicySource) -> Self {
        self.policies.insert(policy.mrn.clone(), policy);
        self
    }

    pub fn with_library(mut self, library: Library) -> Self {
        self.libraries.insert(library.mrn.clone(), library);
        self
    }

    pub fn with_role(mut self, role: RoleDef) -> Self {
        self.roles.insert(role.mrn.clone(), role);
        self
    }

    pub fn with_group(mut self, group: GroupDef) -> Self {
        self.groups.insert(group.mrn.clone(), group);
        self
    }

    pub fn with_scope(mut self, scope: ScopeDef) -> Self {
        self.scopes.insert(scope.mrn.clone(), scope);
        self
    }

    pub fn with_resource_group(mut self, group: ResourceGroupDef) -> Self {
        self.resource_groups.insert(group.mrn.clone(), group);
        self
    }

    pub fn with_operation(mut self, binding: OperationBinding) -> Self {
        self.operations.push(binding);
        self
    }

    pub fn with_resource_selector(mut self, selector: ResourceSelector) -> Self {
        self.resources.push(selector);
        self
    }

    pub fn with_mapper(mut self, mapper: MapperDef) -> Self {
        self.mappers.push(mapper);
        self
    }
}

/// Ordered collection of domains with uniform cross-domain lookup
///
/// Construction validates the whole union: selector regexes must compile,
/// every cross reference must resolve, at most one resource group may be the
/// default, and the libraries of any one policy must not collide on binding
/// names. A registry that constructs is closed under reference resolution.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    domains: Vec<DomainModel>,
}

impl Registry {
    pub fn new(domains: Vec<DomainModel>) -> Result<Self> {
        let registry = Self { domains };
        registry.validate()?;
        Ok(registry)
    }

    pub fn domains(&self) -> &[DomainModel] {
        &self.domains
    }

    pub fn policy(&self, mrn: &str) -> Option<&PolicySource> {
        self.domains.iter().find_map(|d| d.policies.get(mrn))
    }

    pub fn library(&self, mrn: &str) -> Option<&Library> {
        self.domains.iter().find_map(|d| d.libraries.get(mrn))
    }

    pub fn role(&self, mrn: &str) -> Option<&RoleDef> {
        self.domains.iter().find_map(|d| d.roles.get(mrn))
    }

    pub fn group(&self, mrn: &str) -> Option<&GroupDef> {
        self.domains.iter().find_map(|d| d.groups.get(mrn))
    }

    pub fn scope(&self, mrn: &str) -> Option<&ScopeDef> {
        self.domains.iter().find_map(|d| d.scopes.get(mrn))
    }

    pub fn resource_group(&self, mrn: &str) -> Option<&ResourceGroupDef> {
        self.domains.iter().find_map(|d| d.resource_groups.get(mrn))
    }

    /// All operation bindings, domains in registry order, declaration order
    /// preserved within each domain
    pub fn operations(&self) -> impl Iterator<Item = &OperationBinding> {
        self.domains.iter().flat_map(|d| d.operations.iter())
    }

    /// All resource selectors in the same canonical order
    pub fn resource_selectors(&self) -> impl Iterator<Item = &ResourceSelector> {
        self.domains.iter().flat_map(|d| d.resources.iter())
    }

    /// All mappers with their owning domain name
    pub fn mappers(&self) -> impl Iterator<Item = (&str, &MapperDef)> {
        self.domains
            .iter()
            .flat_map(|d| d.mappers.iter().map(move |m| (d.name.as_str(), m)))
    }

    /// The registry-wide default resource group, if any
    pub fn default_resource_group(&self) -> Option<&ResourceGroupDef> {
        self.domains
            .iter()
            .flat_map(|d| d.resource_groups.values())
            .find(|g| g.default)
    }

    /// Merge the data bindings of a policy's libraries
    ///
    /// Binding names must be unique across the policy's library list.
    pub fn merged_bindings(
        &self,
        policy: &PolicySource,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut merged = serde_json::Map::new();
        let mut owners: HashMap<String, Mrn> = HashMap::new();

        for lib_mrn in &policy.libraries {
            let library =
                self.library(lib_mrn)
                    .ok_or_else(|| BundleError::UnresolvedReference {
                        kind: "library",
                        mrn: lib_mrn.clone(),
                        referrer: policy.mrn.clone(),
                    })?;

            for (name, value) in &library.bindings {
                if let Some(first) = owners.get(name) {
                    return Err(BundleError::BindingCollision {
                        binding: name.clone(),
                        first: first.clone(),
                        second: lib_mrn.clone(),
                        policy: policy.mrn.clone(),
                    });
                }
                owners.insert(name.clone(), lib_mrn.clone());
                merged.insert(name.clone(), value.clone());
            }
        }

        Ok(merged)
    }

    fn validate(&self) -> Result<()> {
        self.validate_selectors()?;
        self.validate_default_group()?;
        self.validate_closure()?;

        // Surfaces binding collisions before any compilation happens.
        for domain in &self.domains {
            for policy in domain.policies.values() {
                self.merged_bindings(policy)?;
            }
        }

        Ok(())
    }

    fn validate_selectors(&self) -> Result<()> {
        let check = |pattern: &str, owner: &str| -> Result<()> {
            regex::Regex::new(pattern).map_err(|e| BundleError::InvalidSelector {
                pattern: pattern.to_string(),
                owner: owner.to_string(),
                message: e.to_string(),
            })?;
            Ok(())
        };

        for domain in &self.domains {
            for binding in &domain.operations {
                for selector in &binding.selectors {
                    check(selector, &binding.name)?;
                }
            }
            for selector in &domain.resources {
                for pattern in &selector.selectors {
                    check(pattern, &selector.name)?;
                }
            }
            for mapper in &domain.mappers {
                check(&mapper.selector, &mapper.name)?;
            }
        }

        Ok(())
    }

    fn validate_default_group(&self) -> Result<()> {
        let mut default: Option<&Mrn> = None;
        for domain in &self.domains {
            for group in domain.resource_groups.values() {
                if group.default {
                    if let Some(first) = default {
                        return Err(BundleError::MultipleDefaultResourceGroups {
                            first: first.clone(),
                            second: group.mrn.clone(),
                        });
                    }
                    default = Some(&group.mrn);
                }
            }
        }
        Ok(())
    }

    fn validate_closure(&self) -> Result<()> {
        let missing = |kind: &'static str, mrn: &str, referrer: &str| {
            BundleError::UnresolvedReference {
                kind,
                mrn: mrn.to_string(),
                referrer: referrer.to_string(),
            }
        };

        for domain in &self.domains {
            for policy in domain.policies.values() {
                for lib in &policy.libraries {
                    if self.library(lib).is_none() {
                        return Err(missing("library", lib, &policy.mrn));
                    }
                }
            }
            for role in domain.roles.values() {
                if self.policy(&role.policy).is_none() {
                    return Err(missing("policy", &role.policy, &role.mrn));
                }
            }
            for group in domain.groups.values() {
                for role in &group.roles {
                    if self.role(role).is_none() {
                        return Err(missing("role", role, &group.mrn));
                    }
                }
            }
            for scope in domain.scopes.values() {
                if self.policy(&scope.policy).is_none() {
                    return Err(missing("policy", &scope.policy, &scope.mrn));
                }
            }
            for group in domain.resource_groups.values() {
                if self.policy(&group.policy).is_none() {
                    return Err(missing("policy", &group.policy, &group.mrn));
                }
            }
            for binding in &domain.operations {
                if self.policy(&binding.policy).is_none() {
                    return Err(missing("policy", &binding.policy, &binding.name));
                }
            }
            for selector in &domain.resources {
                if self.resource_group(&selector.group).is_none() {
                    return Err(missing("resource group", &selector.group, &selector.name));
                }
            }
        }

        Ok(())
    }
}
