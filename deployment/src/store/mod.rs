//! Configuration store interface
//!
//! The runtime's hierarchical key-value store is an external collaborator;
//! this module defines the trait the deployment core consumes, the
//! well-known paths it owns under `services/deployment`, and an in-memory
//! reference implementation.

pub mod memory;
pub mod recipes;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::DeploymentError;

/// Hierarchical configuration store, addressed by ordered path segments
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the value at a path. A missing path returns
    /// `DeploymentError::NotFound`, which callers treat as "empty, not
    /// fatal".
    async fn read(&self, path: &[&str]) -> Result<Value, DeploymentError>;

    /// Write a value at a path, creating intermediate levels as needed.
    /// `depth` is an implementation-defined merge-depth hint; this core
    /// writes whole subtrees and always passes `0`.
    async fn write(&self, path: &[&str], value: Value, depth: u8) -> Result<(), DeploymentError>;

    /// Delete the subtree at a path. Deleting a missing path is not an
    /// error.
    async fn delete(&self, path: &[&str]) -> Result<(), DeploymentError>;
}

/// Path of a scope's persisted root-component map
pub fn scope_roots_path(scope: &str) -> [&str; 4] {
    ["services", "deployment", "scopeRootComponents", scope]
}

/// Path of the whole in-progress deployment snapshot
pub fn in_progress_path() -> [&'static str; 3] {
    ["services", "deployment", "inProgress"]
}

/// Path of the in-progress deployment document sub-record
pub fn in_progress_document_path() -> [&'static str; 4] {
    ["services", "deployment", "inProgress", "document"]
}

/// Path of the in-progress per-component sub-records
pub fn in_progress_components_path() -> [&'static str; 4] {
    ["services", "deployment", "inProgress", "components"]
}

/// Path of one component's in-progress sub-record
pub fn in_progress_component_path(name: &str) -> [&str; 5] {
    ["services", "deployment", "inProgress", "components", name]
}

/// Path where the runtime records a deployed component's version
pub fn component_version_path(name: &str) -> [&str; 3] {
    ["services", name, "version"]
}
