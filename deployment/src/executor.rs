//! Lifecycle execution seam
//!
//! Once a deployment has been resolved and its state persisted, the worker
//! hands the prepared component set to the lifecycle executor. The executor
//! lives with the runtime's process supervisor and performs the actual
//! install, bootstrap and start steps. This crate only drives it.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::errors::DeploymentError;
use crate::models::deployment::{ComponentDeploymentRecord, Deployment};

/// Applies a prepared deployment to the runtime
#[async_trait]
pub trait LifecycleExecutor: Send + Sync {
    /// Run the lifecycle steps for every component in the deployment. The
    /// worker calls this exactly once per dequeued deployment and once per
    /// resumed deployment after a restart.
    async fn apply(
        &self,
        deployment: &Deployment,
        components: &BTreeMap<String, ComponentDeploymentRecord>,
    ) -> Result<(), DeploymentError>;
}
