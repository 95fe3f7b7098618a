//! Bootstrap handling and crash-recoverable deployment state
//!
//! Some components declare a bootstrap lifecycle step that may restart the
//! device mid-deployment. The manager flags those components before
//! anything is applied, and owns the persisted snapshot that lets the
//! worker resume an interrupted deployment after a restart. The snapshot
//! must be written before any step that could be cut short; loading it
//! consumes it, so a resume happens at most once even if the resumed run
//! crashes again before a fresh save.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::errors::DeploymentError;
use crate::models::component::{Provenance, ResolvedComponent, ResolvedComponentSet};
use crate::models::deployment::{
    ComponentApplyState, ComponentDeploymentRecord, Deployment, DeploymentState, DeploymentType,
};
use crate::store::recipes::RecipeStore;
use crate::store::{
    in_progress_component_path, in_progress_components_path, in_progress_document_path,
    in_progress_path, ConfigStore,
};

/// Persisted form of the deployment being applied. Lifecycle state and
/// deployment type are not stored; type is reconstructed from the scope
/// name on load.
#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct DeploymentDocument {
    id: String,
    scope: String,
    configuration_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recipe_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    artifact_dir: Option<PathBuf>,
    created_at: DateTime<Utc>,
}

/// Flags bootstrap components and owns the persisted deployment snapshot
pub struct BootstrapManager {
    config: Arc<dyn ConfigStore>,
    recipes: Arc<RecipeStore>,
}

impl BootstrapManager {
    pub fn new(config: Arc<dyn ConfigStore>, recipes: Arc<RecipeStore>) -> Self {
        Self { config, recipes }
    }

    /// Turn a resolved component set into apply records, marking every
    /// component whose recipe declares a bootstrap step. No change is
    /// applied to the running system here.
    pub async fn flag_components(
        &self,
        resolved: &ResolvedComponentSet,
    ) -> Result<BTreeMap<String, ComponentDeploymentRecord>, DeploymentError> {
        let mut records = BTreeMap::new();
        for (name, component) in resolved {
            let state = if self.requires_bootstrap(component).await? {
                info!(
                    "Component {} {} declares a bootstrap step",
                    name, component.version
                );
                ComponentApplyState::NeedsBootstrap
            } else {
                ComponentApplyState::Resolved
            };
            records.insert(
                name.clone(),
                ComponentDeploymentRecord {
                    version: component.version.clone(),
                    state,
                },
            );
        }
        Ok(records)
    }

    /// Whether a resolved component's recipe declares a bootstrap step. A
    /// running component without a stored recipe was bootstrapped when it
    /// was first deployed, if ever.
    pub async fn requires_bootstrap(
        &self,
        component: &ResolvedComponent,
    ) -> Result<bool, DeploymentError> {
        match self
            .recipes
            .load_recipe(&component.name, &component.version)
            .await
        {
            Ok(recipe) => Ok(recipe.has_bootstrap_step()),
            Err(e) if e.is_not_found() && component.provenance == Provenance::AlreadyRunning => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Persist the deployment snapshot: the document first, then one record
    /// per component, so a crash mid-write loses at most one component's
    /// record.
    pub async fn save_state(
        &self,
        deployment: &Deployment,
        components: &BTreeMap<String, ComponentDeploymentRecord>,
    ) -> Result<(), DeploymentError> {
        let document = DeploymentDocument {
            id: deployment.id.clone(),
            scope: deployment.scope.clone(),
            configuration_id: deployment.configuration_id.clone(),
            recipe_dir: deployment.recipe_dir.clone(),
            artifact_dir: deployment.artifact_dir.clone(),
            created_at: deployment.created_at,
        };
        self.config
            .write(
                &in_progress_document_path(),
                serde_json::to_value(&document)?,
                0,
            )
            .await?;

        for (name, record) in components {
            self.config
                .write(
                    &in_progress_component_path(name),
                    serde_json::to_value(record)?,
                    0,
                )
                .await?;
        }

        debug!(
            "Persisted deployment {} with {} component records",
            deployment.id,
            components.len()
        );
        Ok(())
    }

    /// Load the persisted snapshot, if any, and consume it. An unreadable
    /// document is discarded rather than blocking every future start; an
    /// unreadable component record is dropped on its own.
    pub async fn load_in_progress(
        &self,
    ) -> Result<Option<(Deployment, BTreeMap<String, ComponentDeploymentRecord>)>, DeploymentError>
    {
        let document = match self.config.read(&in_progress_document_path()).await {
            Ok(document) => document,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let document: DeploymentDocument = match serde_json::from_value(document) {
            Ok(document) => document,
            Err(e) => {
                warn!("Discarding unreadable in-progress deployment record: {}", e);
                self.delete_state().await?;
                return Ok(None);
            }
        };

        let mut components = BTreeMap::new();
        match self.config.read(&in_progress_components_path()).await {
            Ok(Value::Object(map)) => {
                for (name, value) in map {
                    match serde_json::from_value::<ComponentDeploymentRecord>(value) {
                        Ok(record) => {
                            components.insert(name, record);
                        }
                        Err(e) => {
                            warn!("Dropping unreadable record for component {}: {}", name, e)
                        }
                    }
                }
            }
            Ok(_) => warn!("In-progress component records are not a map, ignoring them"),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        // consume the checkpoint so a second crash cannot replay it twice
        self.delete_state().await?;

        let deployment = Deployment {
            id: document.id,
            deployment_type: DeploymentType::from_scope(&document.scope),
            state: DeploymentState::InProgress,
            recipe_dir: document.recipe_dir,
            artifact_dir: document.artifact_dir,
            root_components: BTreeMap::new(),
            scope: document.scope,
            configuration_id: document.configuration_id,
            created_at: document.created_at,
        };

        info!("Loaded interrupted deployment {} for resumption", deployment.id);
        Ok(Some((deployment, components)))
    }

    /// Clear the persisted snapshot
    pub async fn delete_state(&self) -> Result<(), DeploymentError> {
        self.config.delete(&in_progress_path()).await
    }
}
