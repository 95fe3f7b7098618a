//! Component recipe models
//!
//! A recipe is the manifest describing one component version. The full
//! format belongs to the recipe toolchain; this module models only the
//! fields the deployment core reads: identity, declared dependencies, and
//! the lifecycle sections (to detect a bootstrap step). Unknown fields are
//! ignored on load.

use semver::Version;
use serde::{Deserialize, Serialize};

/// Minimal parsed view of a component recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentRecipe {
    /// Component name
    pub component_name: String,

    /// Component version
    pub component_version: Version,

    /// Declared dependencies as (name, requirement) pairs, kept in the
    /// order the recipe declares them
    #[serde(
        default,
        deserialize_with = "deserialize_dependency_map",
        serialize_with = "serialize_dependency_map"
    )]
    pub component_dependencies: Vec<(String, RecipeDependency)>,

    /// Lifecycle step declarations
    #[serde(default)]
    pub lifecycle: RecipeLifecycle,
}

impl ComponentRecipe {
    /// Whether this recipe declares a bootstrap lifecycle step
    pub fn has_bootstrap_step(&self) -> bool {
        self.lifecycle.bootstrap.is_some()
    }
}

/// Custom deserializer keeping the dependency map in declaration order
fn deserialize_dependency_map<'de, D>(
    deserializer: D,
) -> Result<Vec<(String, RecipeDependency)>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de::{self, MapAccess};

    struct DeclarationOrder;

    impl<'de> de::Visitor<'de> for DeclarationOrder {
        type Value = Vec<(String, RecipeDependency)>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("map of dependency declarations")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::new();
            while let Some(entry) = map.next_entry()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(DeclarationOrder)
}

fn serialize_dependency_map<S>(
    entries: &[(String, RecipeDependency)],
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_map(entries.iter().map(|(name, dep)| (name, dep)))
}

/// One dependency declaration inside a recipe
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeDependency {
    /// Version range or pin the dependent requires
    pub version_requirement: String,

    /// Hard dependencies restart the dependent on change; soft ones do not.
    /// Resolution treats both the same.
    #[serde(default)]
    pub dependency_type: DependencyType,
}

/// Kind of dependency declared in a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DependencyType {
    #[default]
    Hard,
    Soft,
}

/// Lifecycle sections a recipe may declare. The step bodies are opaque to
/// this core; the lifecycle executor interprets them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipeLifecycle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shutdown: Option<serde_json::Value>,

    /// An intrusive step that may restart the device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<serde_json::Value>,
}
