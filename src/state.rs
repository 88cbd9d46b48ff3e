use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::{Error, Result};
use crate::pattern::{ConfigValues, Pattern};
use crate::util::write_atomic;

/// Status of a freshly installed pattern.
pub const STATUS_INSTALLED: &str = "installed";
/// Status of a pattern moved to another version after installation.
pub const STATUS_UPDATED: &str = "updated";
/// Health of a pattern nothing has probed yet.
pub const HEALTH_UNKNOWN: &str = "unknown";

/// Local record of one installed pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPattern {
    /// Full definition at the installed version.
    pub pattern: Pattern,
    pub version: String,
    /// Registry the definition was fetched from.
    #[serde(default)]
    pub registry: String,
    pub installed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Supplied configuration merged with the schema defaults.
    #[serde(default)]
    pub config: ConfigValues,
    #[serde(default)]
    pub environments: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub health: String,
    /// Files written for this installation, relative to the project root.
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// SHA-256 of the installed definition.
    #[serde(default)]
    pub digest: String,
}

impl InstalledPattern {
    pub fn name(&self) -> &str {
        self.pattern.name()
    }
}

/// Name-keyed install state, backed by a YAML file.
///
/// The file is the only durable record of what is installed. It is read
/// once and rewritten as a whole after every change.
#[derive(Debug)]
pub struct InstalledState {
    path: PathBuf,
    patterns: BTreeMap<String, InstalledPattern>,
}

impl InstalledState {
    /// Loads the state file. A missing or empty file yields an empty state.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let patterns = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_yaml_ng::from_str(&content)
                    .map_err(|e| Error::yaml(path.display().to_string(), e))?
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, patterns })
    }

    /// Overwrites the state file with the current contents.
    pub fn save(&self) -> Result<()> {
        let content = serde_yaml_ng::to_string(&self.patterns).map_err(|e| Error::State {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        write_atomic(&self.path, content.as_bytes()).map_err(|e| Error::State {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, name: &str) -> Option<&InstalledPattern> {
        self.patterns.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.contains_key(name)
    }

    pub fn insert(&mut self, installed: InstalledPattern) -> Option<InstalledPattern> {
        self.patterns.insert(installed.name().to_string(), installed)
    }

    pub fn remove(&mut self, name: &str) -> Option<InstalledPattern> {
        self.patterns.remove(name)
    }

    /// Installed patterns ordered by name.
    pub fn patterns(&self) -> impl Iterator<Item = &InstalledPattern> {
        self.patterns.values()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
