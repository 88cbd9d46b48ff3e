use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::global::cache::IndexCache;
use crate::global::utils::get_global_config_dir;
use crate::installer::STATE_DIR;
use crate::registry::Registry;

/// File name of the user configuration inside the config directory.
pub const CONFIG_FILE: &str = "marketplace.toml";

/// Contents of `marketplace.toml`.
///
/// Every field is optional in the file; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketplaceConfig {
    /// Where registry indexes are cached. Defaults to the per-user cache directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Project-relative directory holding the install state.
    pub state_dir: String,
    /// Timeout applied to every HTTP request, in seconds.
    pub timeout_secs: u64,
    /// Whether the `official` registry is configured automatically.
    pub default_registry: bool,
    pub registries: Vec<Registry>,
}

impl Default for MarketplaceConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            state_dir: STATE_DIR.to_string(),
            timeout_secs: 30,
            default_registry: true,
            registries: Vec::new(),
        }
    }
}

impl MarketplaceConfig {
    /// `<config dir>/marketplace.toml` for the current user.
    pub fn default_path() -> Result<PathBuf> {
        Ok(get_global_config_dir()?.join(CONFIG_FILE))
    }

    /// Loads the configuration, falling back to defaults if the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        toml::from_str(&content).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Writes the configuration in pretty TOML format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        std::fs::write(path, content).map_err(|e| Error::io(path, e))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn index_cache(&self) -> Result<IndexCache> {
        match &self.cache_dir {
            Some(dir) => Ok(IndexCache::new(dir)),
            None => IndexCache::default_location(),
        }
    }

    /// Records a registry added at runtime, replacing one with the same name.
    pub fn upsert_registry(&mut self, registry: Registry) {
        self.registries.retain(|r| r.name != registry.name);
        self.registries.push(registry);
    }

    /// Forgets a registry. Removing the default registry disables it.
    pub fn remove_registry(&mut self, name: &str) {
        self.registries.retain(|r| r.name != name);
        if name == crate::registry::DEFAULT_REGISTRY_NAME {
            self.default_registry = false;
        }
    }
}
