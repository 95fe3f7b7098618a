//! Deployment models

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::utils::generate_uuid;

/// Sentinel scope name owning every local (operator-driven) deployment
pub const LOCAL_DEPLOYMENTS: &str = "LOCAL_DEPLOYMENTS";

/// Where a deployment request originated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentType {
    /// Submitted by a local operator
    Local,

    /// Targeted at a fleet group this device belongs to
    FleetGroup,

    /// Delivered through a per-device fleet job
    FleetJob,

    /// Derived from the device twin document
    DeviceTwin,
}

impl DeploymentType {
    /// Reconstruct the type from a persisted scope name. Only the local
    /// sentinel survives persistence; every cloud variant loads back as
    /// FleetGroup.
    pub fn from_scope(scope: &str) -> Self {
        if scope == LOCAL_DEPLOYMENTS {
            DeploymentType::Local
        } else {
            DeploymentType::FleetGroup
        }
    }
}

/// Lifecycle state of a deployment while it is owned by the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    /// Waiting in the queue
    Queued,

    /// Being processed by the deployment worker
    InProgress,
}

/// One deployment request: the set of root components some scope wants on
/// this device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: String,

    /// Where the request came from
    pub deployment_type: DeploymentType,

    /// Current lifecycle state
    pub state: DeploymentState,

    /// Directory holding local recipes (local deployments only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipe_dir: Option<PathBuf>,

    /// Directory holding local artifacts (local deployments only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,

    /// Root component name -> requested version range or pin
    pub root_components: BTreeMap<String, String>,

    /// Owning scope: a fleet group name, or `LOCAL_DEPLOYMENTS`
    pub scope: String,

    /// Cloud configuration resource id, or the deployment id for local
    /// deployments
    pub configuration_id: String,

    /// When the request was created
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// Create a deployment for a fleet-group scope
    pub fn fleet_group(
        id: Option<String>,
        group: impl Into<String>,
        configuration_id: impl Into<String>,
        root_components: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: id.unwrap_or_else(generate_uuid),
            deployment_type: DeploymentType::FleetGroup,
            state: DeploymentState::Queued,
            recipe_dir: None,
            artifact_dir: None,
            root_components,
            scope: group.into(),
            configuration_id: configuration_id.into(),
            created_at: Utc::now(),
        }
    }

    /// Create a local deployment. The configuration id of a local deployment
    /// is the deployment id itself.
    pub fn local(
        id: Option<String>,
        root_components: BTreeMap<String, String>,
        recipe_dir: Option<PathBuf>,
        artifact_dir: Option<PathBuf>,
    ) -> Self {
        let id = id.unwrap_or_else(generate_uuid);
        Self {
            id: id.clone(),
            deployment_type: DeploymentType::Local,
            state: DeploymentState::Queued,
            recipe_dir,
            artifact_dir,
            root_components,
            scope: LOCAL_DEPLOYMENTS.to_string(),
            configuration_id: id,
            created_at: Utc::now(),
        }
    }
}

/// Apply progress of one component within an in-progress deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentApplyState {
    /// Version selected, nothing applied yet
    Resolved,

    /// The recipe declares a bootstrap step that has not run yet
    NeedsBootstrap,

    /// The bootstrap step ran. The runtime may have restarted since.
    Bootstrapped,
}

/// Persisted record of one component an in-progress deployment is applying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentDeploymentRecord {
    /// Version being applied
    pub version: Version,

    /// How far the apply has progressed
    pub state: ComponentApplyState,
}
