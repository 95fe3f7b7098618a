//! Cloud component registry access
//!
//! The dependency resolver falls back to the cloud registry when a
//! component cannot be satisfied locally, and consults the device's group
//! memberships when merging root components across deployment scopes. The
//! transport itself (HTTP, auth, retries) lives outside this crate; this
//! module defines the seam and the request/response shapes.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::errors::DeploymentError;

/// Platform attributes sent with candidate resolution so the registry can
/// filter by target
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlatformAttributes {
    /// Operating system identifier, e.g. "linux"
    pub os: String,
    /// Processor architecture, e.g. "aarch64"
    pub architecture: String,
}

impl PlatformAttributes {
    /// Attributes of the platform this process runs on
    pub fn detect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
        }
    }
}

/// Request for component candidates matching a set of version requirements
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResolveCandidatesRequest {
    /// Component to resolve
    pub component_name: String,
    /// Merged version requirements in normalized text form
    pub version_requirements: String,
    /// Target platform of this device
    pub platform: PlatformAttributes,
}

/// One candidate component version offered by the registry
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComponentCandidate {
    /// Registry identifier of the component version
    pub resource_id: String,
    /// Candidate version
    pub version: Version,
    /// Optional vendor message attached to the version, e.g. "DISCONTINUED"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_guidance: Option<String>,
    /// Base64 encoded recipe body
    pub recipe: String,
}

impl ComponentCandidate {
    /// Decode the recipe body carried with the candidate
    pub fn decode_recipe(&self) -> Result<Vec<u8>, DeploymentError> {
        BASE64.decode(&self.recipe).map_err(|e| {
            DeploymentError::Invalid(format!(
                "recipe payload for {} is not valid base64: {}",
                self.resource_id, e
            ))
        })
    }
}

/// Access to the cloud side of deployment resolution
#[async_trait]
pub trait CloudTransport: Send + Sync {
    /// Deployment scopes this device belongs to besides its own, e.g.
    /// fleet groups
    async fn list_scope_memberships(&self) -> Result<Vec<String>, DeploymentError>;

    /// Component versions the registry offers for the given requirements
    async fn resolve_component_candidates(
        &self,
        request: &ResolveCandidatesRequest,
    ) -> Result<Vec<ComponentCandidate>, DeploymentError>;
}
