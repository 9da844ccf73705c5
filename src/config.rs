//! Configuration for repository storage paths.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variable (STRATA_DATA)
//! 2. Explicit configuration passed by the embedding application
//! 3. Default (`<local data dir>/strata/sites-data`)
//!
//! Site descriptions (languages, modules, image styles) are loaded from
//! YAML files by the embedding application and handed to the repository at
//! connect time.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::domain::Site;

/// Environment variable overriding the data root.
pub const DATA_ENV: &str = "STRATA_DATA";

/// Directory name holding all site storage roots.
pub const DATA_DIR_DEFAULT: &str = "sites-data";

/// Storage configuration for a repository instance.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Directory containing one storage root per site
    pub data_root: PathBuf,
}

impl RepositoryConfig {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
        }
    }

    /// Resolve the data root from the environment, falling back to the
    /// platform's local data directory.
    pub fn from_env() -> Result<Self> {
        if let Ok(root) = std::env::var(DATA_ENV) {
            if !root.trim().is_empty() {
                return Ok(Self::new(PathBuf::from(root)));
            }
        }

        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .context("Failed to determine a data directory for repository storage")?;
        Ok(Self::new(base.join("strata").join(DATA_DIR_DEFAULT)))
    }

    /// Storage root for a single site
    pub fn site_root(&self, site: &str) -> PathBuf {
        self.data_root.join(site)
    }
}

/// Load a site description from a YAML file.
pub fn load_site(path: &Path) -> Result<Site> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read site description: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse site description: {}", path.display()))
}
