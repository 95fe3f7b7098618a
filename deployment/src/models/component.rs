//! Component requirement and resolution models

use std::collections::BTreeMap;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::models::version::VersionConstraint;

/// Component name of the runtime itself. A deployment that lists it as a
/// root component pins the runtime version; the pin must equal the running
/// version exactly.
pub const RUNTIME_COMPONENT: &str = "ember.runtime";

/// Components that are always present on a device and never resolved
/// explicitly: the runtime and its supervisor service.
pub const IMPLICIT_COMPONENTS: [&str; 2] = [RUNTIME_COMPONENT, "ember.runtime.supervisor"];

/// Whether a component name belongs to the implicit set
pub fn is_implicit_component(name: &str) -> bool {
    IMPLICIT_COMPONENTS.contains(&name)
}

/// A component name plus the version requirement it must satisfy
#[derive(Debug, Clone)]
pub struct ComponentRequirement {
    /// Component name
    pub name: String,

    /// Requested version range or pin
    pub constraint: VersionConstraint,
}

impl ComponentRequirement {
    pub fn new(name: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            name: name.into(),
            constraint,
        }
    }
}

/// Where a resolved component version came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// A healthy instance of a satisfying version is already running
    AlreadyRunning,

    /// A satisfying recipe was found in the local recipe store
    LocalStore,

    /// The version was negotiated with the cloud and its recipe fetched
    Cloud,
}

/// One component resolved to a concrete version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedComponent {
    /// Component name
    pub name: String,

    /// Concrete resolved version
    pub version: Version,

    /// Where the version came from
    pub provenance: Provenance,
}

/// The output of one resolution pass: every component the device must have,
/// keyed by name
pub type ResolvedComponentSet = BTreeMap<String, ResolvedComponent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implicit_components() {
        assert!(is_implicit_component("ember.runtime"));
        assert!(is_implicit_component("ember.runtime.supervisor"));
        assert!(!is_implicit_component("com.example.App"));
    }
}
