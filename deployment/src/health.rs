//! Component health lookups
//!
//! The resolver asks the runtime's lifecycle tracker whether a component is
//! already running before it goes looking for versions elsewhere. Only the
//! status comes from here. The recorded version of a running component is
//! read from the configuration store.

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::DeploymentError;

/// Lifecycle status of a component known to the runtime
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComponentStatus {
    New,
    Installed,
    Starting,
    Running,
    Finished,
    Stopping,
    Errored,
    Broken,
}

impl ComponentStatus {
    /// Whether the component is in a state a deployment may reuse as-is.
    /// Running covers long-lived services, Finished covers run-once
    /// components that completed.
    pub fn is_healthy(&self) -> bool {
        matches!(self, ComponentStatus::Running | ComponentStatus::Finished)
    }
}

impl FromStr for ComponentStatus {
    type Err = DeploymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(ComponentStatus::New),
            "INSTALLED" => Ok(ComponentStatus::Installed),
            "STARTING" => Ok(ComponentStatus::Starting),
            "RUNNING" => Ok(ComponentStatus::Running),
            "FINISHED" => Ok(ComponentStatus::Finished),
            "STOPPING" => Ok(ComponentStatus::Stopping),
            "ERRORED" => Ok(ComponentStatus::Errored),
            "BROKEN" => Ok(ComponentStatus::Broken),
            other => Err(DeploymentError::Invalid(format!(
                "unknown component status '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ComponentStatus::New => "NEW",
            ComponentStatus::Installed => "INSTALLED",
            ComponentStatus::Starting => "STARTING",
            ComponentStatus::Running => "RUNNING",
            ComponentStatus::Finished => "FINISHED",
            ComponentStatus::Stopping => "STOPPING",
            ComponentStatus::Errored => "ERRORED",
            ComponentStatus::Broken => "BROKEN",
        };
        write!(f, "{}", text)
    }
}

/// Source of component lifecycle status
#[async_trait]
pub trait HealthService: Send + Sync {
    /// Status of a component, or None when the runtime has never seen it
    async fn component_status(
        &self,
        name: &str,
    ) -> Result<Option<ComponentStatus>, DeploymentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_healthy_statuses() {
        assert!(ComponentStatus::Running.is_healthy());
        assert!(ComponentStatus::Finished.is_healthy());
        assert!(!ComponentStatus::Starting.is_healthy());
        assert!(!ComponentStatus::Errored.is_healthy());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ComponentStatus::New,
            ComponentStatus::Installed,
            ComponentStatus::Starting,
            ComponentStatus::Running,
            ComponentStatus::Finished,
            ComponentStatus::Stopping,
            ComponentStatus::Errored,
            ComponentStatus::Broken,
        ] {
            let parsed: ComponentStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        assert!("DANCING".parse::<ComponentStatus>().is_err());
    }
}
