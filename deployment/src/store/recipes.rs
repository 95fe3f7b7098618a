//! Local recipe store
//!
//! Recipes live in a flat directory as `<name>-<version>.json`. The store
//! scans file names to answer which versions of a component are available,
//! writes newly fetched recipes atomically, and loads a recipe back into
//! its parsed view.

use std::path::{Path, PathBuf};

use semver::Version;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::errors::DeploymentError;
use crate::models::recipe::ComponentRecipe;
use crate::utils::sha256_hash;

/// File extension of stored recipes
pub const RECIPE_EXTENSION: &str = "json";

/// Directory of component recipes
#[derive(Debug, Clone)]
pub struct RecipeStore {
    dir: PathBuf,
}

impl RecipeStore {
    /// Create a store over a directory. The directory is created lazily on
    /// the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The store directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn recipe_path(&self, name: &str, version: &Version) -> PathBuf {
        self.dir
            .join(format!("{}-{}.{}", name, version, RECIPE_EXTENSION))
    }

    /// Every version of a component present in the store, ascending. A
    /// missing store directory reads as an empty store.
    pub async fn available_versions(&self, name: &str) -> Result<Vec<Version>, DeploymentError> {
        let mut versions = Vec::new();

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(versions),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some(version) = parse_recipe_file_name(file_name, name) {
                versions.push(version);
            }
        }

        versions.sort();
        Ok(versions)
    }

    /// Write a recipe body under its canonical file name, atomically
    pub async fn write_recipe(
        &self,
        name: &str,
        version: &Version,
        body: &[u8],
    ) -> Result<(), DeploymentError> {
        fs::create_dir_all(&self.dir).await?;

        let path = self.recipe_path(name, version);
        let temp_path = path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(body).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &path).await?;

        debug!(
            "Stored recipe {}-{} (sha256 {})",
            name,
            version,
            sha256_hash(body)
        );
        Ok(())
    }

    /// Load and parse a recipe by name and version. The file's declared
    /// identity must match its file name.
    pub async fn load_recipe(
        &self,
        name: &str,
        version: &Version,
    ) -> Result<ComponentRecipe, DeploymentError> {
        let path = self.recipe_path(name, version);

        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeploymentError::NotFound(format!(
                    "no recipe for {} {}",
                    name, version
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let recipe: ComponentRecipe = serde_json::from_str(&contents)?;

        if recipe.component_name != name || recipe.component_version != *version {
            return Err(DeploymentError::Invalid(format!(
                "recipe {} declares {} {} instead of {} {}",
                path.display(),
                recipe.component_name,
                recipe.component_version,
                name,
                version
            )));
        }

        Ok(recipe)
    }
}

/// Parse `<name>-<version>.json` against a known component name
fn parse_recipe_file_name(file_name: &str, component: &str) -> Option<Version> {
    let stem = file_name.strip_suffix(&format!(".{}", RECIPE_EXTENSION))?;
    let rest = stem.strip_prefix(component)?;
    let version_text = rest.strip_prefix('-')?;
    Version::parse(version_text).ok()
}
