use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use crate::error::{Error, Result};
use crate::global::utils::get_global_cache_dir;
use crate::registry::{RegistryIndex, INDEX_FILE};

/// Outcome of a best-effort cache write.
///
/// Failures are logged where they happen and reported here only for
/// observation; they never become an [`Error`].
#[derive(Debug, Clone, PartialEq)]
pub enum CacheWrite {
    Stored(PathBuf),
    Failed(String),
}

impl CacheWrite {
    pub fn is_stored(&self) -> bool {
        matches!(self, CacheWrite::Stored(_))
    }
}

/// On-disk copies of registry indexes, one directory per registry.
///
/// The cache is a fallback for failed live fetches, never the source of
/// truth for whether a pattern exists.
#[derive(Debug, Clone)]
pub struct IndexCache {
    root: PathBuf,
}

impl IndexCache {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Uses the per-user cache directory.
    pub fn default_location() -> Result<Self> {
        Ok(Self::new(get_global_cache_dir()?))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self, registry: &str) -> PathBuf {
        self.root.join("registries").join(registry).join(INDEX_FILE)
    }

    /// Reads the cached index of a registry, `Ok(None)` if nothing is cached.
    pub fn load(&self, registry: &str) -> Result<Option<RegistryIndex>> {
        let path = self.index_path(registry);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        let index = serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::yaml(path.display().to_string(), e))?;
        Ok(Some(index))
    }

    /// Writes the index to the cache, logging instead of failing.
    pub fn store(&self, registry: &str, index: &RegistryIndex) -> CacheWrite {
        match self.try_store(registry, index) {
            Ok(path) => {
                debug!(registry, path = %path.display(), "cached registry index");
                CacheWrite::Stored(path)
            }
            Err(e) => {
                warn!(registry, error = %e, "failed to cache registry index");
                CacheWrite::Failed(e.to_string())
            }
        }
    }

    fn try_store(&self, registry: &str, index: &RegistryIndex) -> Result<PathBuf> {
        let path = self.index_path(registry);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let content = serde_yaml_ng::to_string(index)
            .map_err(|e| Error::yaml(format!("index of {}", registry), e))?;
        std::fs::write(&path, content).map_err(|e| Error::io(&path, e))?;
        Ok(path)
    }

    /// Drops the cached index of one registry.
    pub fn remove(&self, registry: &str) -> Result<()> {
        let dir = self.root.join("registries").join(registry);
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(())
    }

    /// Removes every cached index.
    pub fn clean(&self) -> Result<()> {
        let dir = self.root.join("registries");
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        Ok(())
    }
}
