//! Single-component version resolution
//!
//! Decides which version of one component the device can supply for a
//! merged requirement, preferring what is already running over what merely
//! sits in the recipe store. Cloud fallback is the dependency resolver's
//! job; this layer only answers for the device itself.

use std::sync::Arc;

use semver::Version;
use tracing::{debug, warn};

use crate::errors::DeploymentError;
use crate::health::HealthService;
use crate::models::component::{Provenance, ResolvedComponent};
use crate::models::version::VersionConstraint;
use crate::store::recipes::RecipeStore;
use crate::store::{component_version_path, ConfigStore};

/// Result of a device-local lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentLookup {
    /// The device can supply this version itself
    Found(ResolvedComponent),

    /// Nothing running or stored satisfies the requirement
    NotFoundLocally,
}

/// Resolves one component version against what the device already has
pub struct ComponentVersionResolver {
    health: Arc<dyn HealthService>,
    config: Arc<dyn ConfigStore>,
    recipes: Arc<RecipeStore>,
}

impl ComponentVersionResolver {
    pub fn new(
        health: Arc<dyn HealthService>,
        config: Arc<dyn ConfigStore>,
        recipes: Arc<RecipeStore>,
    ) -> Self {
        Self {
            health,
            config,
            recipes,
        }
    }

    /// Find the version the device can supply for a requirement, or report
    /// that a cloud lookup is needed. A healthy running component whose
    /// recorded version satisfies the requirement wins over any stored
    /// recipe, even a higher one. Among stored recipes the highest
    /// satisfying version wins.
    pub async fn resolve(
        &self,
        name: &str,
        constraint: &VersionConstraint,
    ) -> Result<ComponentLookup, DeploymentError> {
        if let Some(status) = self.health.component_status(name).await? {
            if status.is_healthy() {
                if let Some(version) = self.recorded_version(name).await? {
                    if constraint.matches(&version) {
                        debug!(
                            "Reusing running component {} {} for requirement '{}'",
                            name, version, constraint
                        );
                        return Ok(ComponentLookup::Found(ResolvedComponent {
                            name: name.to_string(),
                            version,
                            provenance: Provenance::AlreadyRunning,
                        }));
                    }
                }
            }
        }

        let mut candidates = self.recipes.available_versions(name).await?;
        candidates.retain(|v| constraint.matches(v));
        if let Some(version) = candidates.into_iter().max() {
            debug!(
                "Found stored recipe {} {} for requirement '{}'",
                name, version, constraint
            );
            return Ok(ComponentLookup::Found(ResolvedComponent {
                name: name.to_string(),
                version,
                provenance: Provenance::LocalStore,
            }));
        }

        Ok(ComponentLookup::NotFoundLocally)
    }

    /// The version recorded for a component in the configuration store. An
    /// absent or unreadable record reads as no version.
    async fn recorded_version(&self, name: &str) -> Result<Option<Version>, DeploymentError> {
        let value = match self.config.read(&component_version_path(name)).await {
            Ok(value) => value,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(text) = value.as_str() else {
            warn!("Recorded version of {} is not a string, ignoring it", name);
            return Ok(None);
        };

        match Version::parse(text) {
            Ok(version) => Ok(Some(version)),
            Err(e) => {
                warn!("Recorded version '{}' of {} does not parse: {}", text, name, e);
                Ok(None)
            }
        }
    }
}
