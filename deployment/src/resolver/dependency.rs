//! Deployment dependency resolution
//!
//! Computes the full set of components a device must run to satisfy a
//! deployment together with every other scope the device participates in.
//! Root requirements are merged across scopes, then expanded breadth-first
//! through recipe dependency declarations, resolving each component to a
//! concrete version on the way. Anything the device cannot satisfy locally
//! is negotiated with the cloud registry and its recipe stored for the
//! lifecycle steps that follow.
//!
//! Every failure here is terminal for the deployment. Partial results are
//! discarded, never applied.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use semver::Version;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cloud::{CloudTransport, PlatformAttributes, ResolveCandidatesRequest};
use crate::errors::DeploymentError;
use crate::models::component::{
    is_implicit_component, ComponentRequirement, Provenance, ResolvedComponent,
    ResolvedComponentSet, RUNTIME_COMPONENT,
};
use crate::models::deployment::{Deployment, LOCAL_DEPLOYMENTS};
use crate::models::version::VersionConstraint;
use crate::resolver::component::{ComponentLookup, ComponentVersionResolver};
use crate::store::recipes::RecipeStore;
use crate::store::{scope_roots_path, ConfigStore};

/// Pending requirements awaiting resolution, processed in insertion order.
/// Requirements for a name already waiting are ANDed into its entry instead
/// of queueing it twice.
struct Worklist {
    order: VecDeque<String>,
    pending: BTreeMap<String, VersionConstraint>,
}

impl Worklist {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            pending: BTreeMap::new(),
        }
    }

    fn push(&mut self, requirement: ComponentRequirement) -> Result<(), DeploymentError> {
        match self.pending.get_mut(&requirement.name) {
            Some(existing) => existing.merge(&requirement.constraint)?,
            None => {
                self.order.push_back(requirement.name.clone());
                self.pending.insert(requirement.name, requirement.constraint);
            }
        }
        Ok(())
    }

    fn get(&self, name: &str) -> Option<&VersionConstraint> {
        self.pending.get(name)
    }

    fn pop(&mut self) -> Option<ComponentRequirement> {
        let name = self.order.pop_front()?;
        let constraint = self.pending.remove(&name)?;
        Some(ComponentRequirement::new(name, constraint))
    }
}

/// Resolves a deployment's root requirements into the device's complete
/// component closure
pub struct DependencyResolver {
    config: Arc<dyn ConfigStore>,
    cloud: Arc<dyn CloudTransport>,
    components: ComponentVersionResolver,
    recipes: Arc<RecipeStore>,
    platform: PlatformAttributes,
    runtime_version: Version,
}

impl DependencyResolver {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        cloud: Arc<dyn CloudTransport>,
        components: ComponentVersionResolver,
        recipes: Arc<RecipeStore>,
        platform: PlatformAttributes,
        runtime_version: Version,
    ) -> Self {
        Self {
            config,
            cloud,
            components,
            recipes,
            platform,
            runtime_version,
        }
    }

    /// Resolve the full component closure for a deployment.
    ///
    /// The deployment's roots seed the work. Roots persisted by every other
    /// scope the device belongs to join them, then the combined list is
    /// expanded through recipe dependencies until nothing is pending. The
    /// runtime version gate runs before anything is persisted or fetched.
    pub async fn resolve(
        &self,
        deployment: &Deployment,
    ) -> Result<ResolvedComponentSet, DeploymentError> {
        info!(
            "Resolving deployment {} for scope {}",
            deployment.id, deployment.scope
        );

        let mut worklist = Worklist::new();
        let mut normalized_roots = serde_json::Map::new();

        for (name, requirement) in &deployment.root_components {
            let constraint = VersionConstraint::parse(requirement)?;
            if name == RUNTIME_COMPONENT {
                self.check_runtime_pin(&constraint)?;
            }
            normalized_roots.insert(name.clone(), Value::String(constraint.to_string()));
            if is_implicit_component(name) {
                debug!("Root component {} is implicit, not resolving it", name);
                continue;
            }
            worklist.push(ComponentRequirement::new(name.clone(), constraint))?;
        }

        self.persist_scope_roots(&deployment.scope, normalized_roots)
            .await?;
        self.merge_other_scopes(&deployment.scope, &mut worklist)
            .await?;

        let mut resolved: ResolvedComponentSet = BTreeMap::new();
        let mut visiting: BTreeSet<String> = BTreeSet::new();

        while let Some(requirement) = worklist.pop() {
            let name = requirement.name;
            visiting.insert(name.clone());

            let component = match self.components.resolve(&name, &requirement.constraint).await? {
                ComponentLookup::Found(component) => component,
                ComponentLookup::NotFoundLocally => {
                    self.resolve_from_cloud(&name, &requirement.constraint).await?
                }
            };

            // single-pass processing should make this impossible
            if let Some(previous) = resolved.get(&name) {
                if previous.version != component.version {
                    return Err(DeploymentError::Conflict(format!(
                        "{} resolved twice, to {} and {}",
                        name, previous.version, component.version
                    )));
                }
            }

            debug!(
                "Resolved {} to {} ({:?})",
                name, component.version, component.provenance
            );

            for dependency in self.component_dependencies(&component).await? {
                if visiting.contains(&dependency.name) {
                    return Err(DeploymentError::Cycle(format!(
                        "{} depends on {} which is still being resolved",
                        name, dependency.name
                    )));
                }
                if let Some(existing) = resolved.get(&dependency.name) {
                    if !dependency.constraint.matches(&existing.version) {
                        return Err(DeploymentError::Conflict(format!(
                            "{} requires {} '{}' but {} is already resolved",
                            name, dependency.name, dependency.constraint, existing.version
                        )));
                    }
                    continue;
                }
                worklist.push(dependency)?;
            }

            visiting.remove(&name);
            resolved.insert(name, component);
        }

        info!(
            "Deployment {} resolved to {} components",
            deployment.id,
            resolved.len()
        );
        Ok(resolved)
    }

    /// A deployment naming the runtime as a root pins the runtime version.
    /// The pin must equal the running version exactly; there is no merging
    /// or relaxing here.
    fn check_runtime_pin(&self, constraint: &VersionConstraint) -> Result<(), DeploymentError> {
        let Some(pin) = constraint.pin() else {
            return Err(DeploymentError::Conflict(format!(
                "{} requires an exact version pin, got '{}'",
                RUNTIME_COMPONENT, constraint
            )));
        };
        if *pin != self.runtime_version {
            return Err(DeploymentError::Conflict(format!(
                "deployment pins {} {} but version {} is running",
                RUNTIME_COMPONENT, pin, self.runtime_version
            )));
        }
        Ok(())
    }

    /// Replace the persisted root map of a scope. Delete first so roots
    /// dropped by this deployment disappear.
    async fn persist_scope_roots(
        &self,
        scope: &str,
        roots: serde_json::Map<String, Value>,
    ) -> Result<(), DeploymentError> {
        let path = scope_roots_path(scope);
        self.config.delete(&path).await?;
        self.config.write(&path, Value::Object(roots), 0).await?;
        Ok(())
    }

    /// Merge the persisted roots of every other scope the device belongs to
    /// into the worklist. Identical requirements are tolerated; differing
    /// ones for the same component are a conflict.
    async fn merge_other_scopes(
        &self,
        own_scope: &str,
        worklist: &mut Worklist,
    ) -> Result<(), DeploymentError> {
        let mut scopes = self.cloud.list_scope_memberships().await?;
        if !scopes.iter().any(|s| s == LOCAL_DEPLOYMENTS) {
            scopes.push(LOCAL_DEPLOYMENTS.to_string());
        }

        for scope in scopes {
            if scope == own_scope {
                continue;
            }

            let stored = match self.config.read(&scope_roots_path(&scope)).await {
                Ok(stored) => stored,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            let Some(roots) = stored.as_object() else {
                return Err(DeploymentError::Invalid(format!(
                    "persisted roots of scope {} are not a map",
                    scope
                )));
            };

            for (name, requirement) in roots {
                if is_implicit_component(name) {
                    continue;
                }
                let Some(text) = requirement.as_str() else {
                    return Err(DeploymentError::Invalid(format!(
                        "persisted requirement for {} in scope {} is not a string",
                        name, scope
                    )));
                };
                let constraint = VersionConstraint::parse(text)?;

                match worklist.get(name) {
                    None => {
                        debug!("Scope {} adds root component {} '{}'", scope, name, constraint);
                        worklist.push(ComponentRequirement::new(name.clone(), constraint))?;
                    }
                    Some(existing) if *existing == constraint => {}
                    Some(existing) => {
                        return Err(DeploymentError::Conflict(format!(
                            "scope {} requires {} '{}' but '{}' is requested elsewhere",
                            scope, name, constraint, existing
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Negotiate a component version with the cloud registry and store the
    /// recipe it returns. Exactly one candidate is acceptable.
    async fn resolve_from_cloud(
        &self,
        name: &str,
        constraint: &VersionConstraint,
    ) -> Result<ResolvedComponent, DeploymentError> {
        debug!("Requesting candidates for {} '{}'", name, constraint);

        let request = ResolveCandidatesRequest {
            component_name: name.to_string(),
            version_requirements: constraint.to_string(),
            platform: self.platform.clone(),
        };
        let mut candidates = self.cloud.resolve_component_candidates(&request).await?;

        let candidate = match candidates.len() {
            0 => {
                return Err(DeploymentError::NotFound(format!(
                    "no registry candidate for {} matching '{}'",
                    name, constraint
                )));
            }
            1 => candidates.remove(0),
            n => {
                return Err(DeploymentError::Invalid(format!(
                    "registry returned {} candidates for {}, expected one",
                    n, name
                )));
            }
        };

        if let Some(guidance) = &candidate.vendor_guidance {
            if guidance == "DISCONTINUED" {
                warn!(
                    "Component {} {} is discontinued by its vendor",
                    name, candidate.version
                );
            } else {
                debug!("Vendor guidance for {} {}: {}", name, candidate.version, guidance);
            }
        }

        let body = candidate.decode_recipe()?;
        self.recipes
            .write_recipe(name, &candidate.version, &body)
            .await?;

        Ok(ResolvedComponent {
            name: name.to_string(),
            version: candidate.version,
            provenance: Provenance::Cloud,
        })
    }

    /// The declared dependencies of a resolved component in declaration
    /// order, implicit ones dropped. A running component without a stored
    /// recipe is treated as dependency-free; its dependencies were
    /// satisfied when it was first deployed.
    async fn component_dependencies(
        &self,
        component: &ResolvedComponent,
    ) -> Result<Vec<ComponentRequirement>, DeploymentError> {
        let recipe = match self
            .recipes
            .load_recipe(&component.name, &component.version)
            .await
        {
            Ok(recipe) => recipe,
            Err(e) if e.is_not_found() && component.provenance == Provenance::AlreadyRunning => {
                debug!(
                    "No stored recipe for running component {} {}",
                    component.name, component.version
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let mut dependencies = Vec::new();
        for (name, declared) in &recipe.component_dependencies {
            if is_implicit_component(name) {
                continue;
            }
            let constraint = VersionConstraint::parse(&declared.version_requirement)?;
            dependencies.push(ComponentRequirement::new(name.clone(), constraint));
        }
        Ok(dependencies)
    }
}
