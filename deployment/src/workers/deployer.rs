//! Deployment worker
//!
//! The single consumer of the deployment queue. Each dequeued deployment is
//! resolved, its snapshot persisted, handed to the lifecycle executor and
//! finally released from the queue, success or not. On startup the worker
//! first resumes any deployment a restart interrupted, before it pulls
//! anything new.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{error, info};

use crate::bootstrap::BootstrapManager;
use crate::errors::DeploymentError;
use crate::executor::LifecycleExecutor;
use crate::models::deployment::Deployment;
use crate::queue::DeploymentQueue;
use crate::resolver::dependency::DependencyResolver;

/// Run the deployment worker
pub async fn run(
    queue: Arc<DeploymentQueue>,
    resolver: Arc<DependencyResolver>,
    bootstrap: Arc<BootstrapManager>,
    executor: Arc<dyn LifecycleExecutor>,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) {
    info!("Deployment worker starting...");

    // A restart may have cut a deployment short mid-apply. Resume it before
    // touching the queue; loading the snapshot consumes it.
    match bootstrap.load_in_progress().await {
        Ok(Some((deployment, components))) => {
            info!(
                "Resuming interrupted deployment {} with {} components",
                deployment.id,
                components.len()
            );
            if let Err(e) = executor.apply(&deployment, &components).await {
                error!("Resumed deployment {} failed: {}", deployment.id, e);
            }
        }
        Ok(None) => {}
        Err(e) => error!("Could not check for an interrupted deployment: {}", e),
    }

    loop {
        let deployment = tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Deployment worker shutting down...");
                return;
            }
            deployment = queue.dequeue() => deployment,
        };

        info!(
            "Processing deployment {} ({:?}) for scope {}",
            deployment.id, deployment.deployment_type, deployment.scope
        );

        if let Err(e) = process_deployment(&deployment, &resolver, &bootstrap, &executor).await {
            error!("Deployment {} failed: {}", deployment.id, e);
        }

        if let Err(e) = queue.release() {
            error!("Could not release deployment {}: {}", deployment.id, e);
        }
    }
}

async fn process_deployment(
    deployment: &Deployment,
    resolver: &DependencyResolver,
    bootstrap: &BootstrapManager,
    executor: &Arc<dyn LifecycleExecutor>,
) -> Result<(), DeploymentError> {
    let resolved = resolver.resolve(deployment).await?;
    let components = bootstrap.flag_components(&resolved).await?;

    // persist before any step a restart could interrupt. A save that fails
    // partway is not a snapshot the next start may resume; clear it first.
    if let Err(save_err) = bootstrap.save_state(deployment, &components).await {
        if let Err(e) = bootstrap.delete_state().await {
            error!(
                "Could not clear the partial snapshot of deployment {}: {}",
                deployment.id, e
            );
        }
        return Err(save_err);
    }

    let result = executor.apply(deployment, &components).await;

    // the snapshot only covers an interrupted apply, not a failed one
    if let Err(e) = bootstrap.delete_state().await {
        error!("Could not clear the snapshot of deployment {}: {}", deployment.id, e);
    }
    result?;

    info!(
        "Deployment {} applied with {} components",
        deployment.id,
        components.len()
    );
    Ok(())
}
