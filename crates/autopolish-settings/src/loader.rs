//! Recipe discovery and loading

use crate::format::ConfigFormat;
use crate::recipe::Recipe;
use autopolish_core::{ConfigError, Result};
use std::path::{Path, PathBuf};

/// Source of named recipes
pub trait RecipeLoader: Send + Sync {
    /// Names of all available recipes, sorted
    fn list(&self) -> Result<Vec<String>>;

    /// Load and validate a recipe by name
    fn load(&self, name: &str) -> Result<Recipe>;

    /// Directory macro paths in recipes are resolved against
    fn macro_base_dir(&self) -> &Path;
}

/// Recipes stored as `<name>.yml`, `.yaml`, `.toml` or `.json` files in one directory
#[derive(Debug, Clone)]
pub struct RecipeDirectory {
    dir: PathBuf,
}

impl RecipeDirectory {
    /// Loader over `dir`. The directory need not exist yet.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory searched
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn find(&self, name: &str) -> Option<PathBuf> {
        ConfigFormat::EXTENSIONS
            .iter()
            .map(|ext| self.dir.join(format!("{}.{}", name, ext)))
            .find(|path| path.is_file())
    }
}

impl RecipeLoader for RecipeDirectory {
    fn list(&self) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || ConfigFormat::from_path(&path).is_none() {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn load(&self, name: &str) -> Result<Recipe> {
        let path = self.find(name).ok_or_else(|| ConfigError::RecipeNotFound {
            name: name.to_string(),
            dir: self.dir.clone(),
        })?;
        let format = ConfigFormat::from_path(&path).ok_or_else(|| ConfigError::InvalidRecipe {
            name: name.to_string(),
            reason: format!("unsupported file type {}", path.display()),
        })?;

        let content =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::InvalidRecipe {
                name: name.to_string(),
                reason: format!("Failed to read {}: {}", path.display(), e),
            })?;

        let recipe = Recipe::parse(name, &content, format)?;
        tracing::debug!("Loaded recipe '{}' from {}", name, path.display());
        Ok(recipe)
    }

    fn macro_base_dir(&self) -> &Path {
        &self.dir
    }
}
