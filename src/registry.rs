use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use crate::error::{Error, Result};
use crate::global::cache::{CacheWrite, IndexCache};
use crate::pattern::{Pattern, PATTERN_FILE};
use crate::util::{is_path_component, latest_version};

/// Base URL of the registry every marketplace starts with.
pub const DEFAULT_REGISTRY_URL: &str = "https://patterns.gitops.io/registry";
/// Name of the default registry.
pub const DEFAULT_REGISTRY_NAME: &str = "official";
/// File name of a registry's catalog.
pub const INDEX_FILE: &str = "index.yaml";

/// Kind of pattern source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryType {
    Official,
    Community,
    Private,
    Local,
}

impl fmt::Display for RegistryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RegistryType::Official => "official",
            RegistryType::Community => "community",
            RegistryType::Private => "private",
            RegistryType::Local => "local",
        };
        f.write_str(s)
    }
}

/// Credentials sent with every request to a remote registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegistryAuth {
    Bearer { token: String },
    Basic { username: String, password: String },
}

/// A named, prioritized pattern source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub name: String,
    #[serde(rename = "type")]
    pub registry_type: RegistryType,
    /// Base HTTP URL, or a filesystem path for local registries.
    #[serde(default)]
    pub url: String,
    /// Higher priorities are searched first.
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<RegistryAuth>,
}

fn default_enabled() -> bool {
    true
}

impl Registry {
    pub fn new(name: &str, registry_type: RegistryType, url: &str, priority: i32) -> Registry {
        Registry {
            name: name.to_string(),
            registry_type,
            url: url.to_string(),
            priority,
            enabled: true,
            auth: None,
        }
    }

    /// A registry backed by a directory on disk.
    pub fn local<P: AsRef<Path>>(name: &str, path: P, priority: i32) -> Registry {
        Registry::new(
            name,
            RegistryType::Local,
            &path.as_ref().to_string_lossy(),
            priority,
        )
    }

    /// The registry every marketplace is created with.
    pub fn official() -> Registry {
        Registry::new(
            DEFAULT_REGISTRY_NAME,
            RegistryType::Official,
            DEFAULT_REGISTRY_URL,
            100,
        )
    }

    pub fn is_local(&self) -> bool {
        self.registry_type == RegistryType::Local
    }

    /// Checks the fields required before the registry can be added.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidRegistry("name is required".to_string()));
        }
        if !is_path_component(&self.name) {
            return Err(Error::InvalidRegistry(format!(
                "name '{}' must not contain path separators or '..'",
                self.name
            )));
        }
        if self.url.trim().is_empty() && !self.is_local() {
            return Err(Error::InvalidRegistry(format!(
                "url is required for {} registry '{}'",
                self.registry_type, self.name
            )));
        }
        Ok(())
    }

    /// Root directory of a local registry.
    pub fn local_root(&self) -> PathBuf {
        let url = self.url.strip_prefix("file://").unwrap_or(&self.url);
        if url.is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(url)
        }
    }

    fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }

    pub fn index_url(&self) -> String {
        format!("{}/{}", self.base_url(), INDEX_FILE)
    }

    pub fn pattern_url(&self, name: &str, version: &str) -> String {
        format!("{}/patterns/{}/{}/{}", self.base_url(), name, version, PATTERN_FILE)
    }

    /// Directory holding one pattern version inside a local registry.
    pub fn local_pattern_dir(&self, name: &str, version: &str) -> PathBuf {
        self.local_root().join("patterns").join(name).join(version)
    }

    pub fn local_index_path(&self) -> PathBuf {
        let root = self.local_root();
        if root.extension().is_some_and(|ext| ext == "yaml" || ext == "yml") {
            root
        } else {
            root.join(INDEX_FILE)
        }
    }
}

/// The catalog a registry publishes in `index.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryIndex {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated: Option<DateTime<Utc>>,
    pub patterns: Vec<PatternIndexEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<CategoryInfo>,
}

/// One pattern as listed in a registry index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatternIndexEntry {
    pub name: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub versions: Vec<String>,
    pub latest_version: String,
    pub rating: f64,
    pub downloads: u64,
    pub verified: bool,
    pub deprecated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoryInfo {
    pub name: String,
    pub description: String,
    pub count: usize,
}

impl RegistryIndex {
    pub fn find(&self, name: &str) -> Option<&PatternIndexEntry> {
        self.patterns.iter().find(|entry| entry.name == name)
    }

    /// Records a published pattern version, creating the entry if needed.
    pub fn add_version(&mut self, pattern: &Pattern) {
        let meta = &pattern.metadata;
        let position = self.patterns.iter().position(|e| e.name == meta.name);
        let entry = match position {
            Some(i) => &mut self.patterns[i],
            None => {
                self.patterns.push(PatternIndexEntry {
                    name: meta.name.clone(),
                    ..Default::default()
                });
                let last = self.patterns.len() - 1;
                &mut self.patterns[last]
            }
        };
        entry.description = meta.description.clone();
        entry.category = meta.category.clone();
        entry.tags = meta.tags.clone();
        if !entry.versions.contains(&meta.version) {
            entry.versions.push(meta.version.clone());
        }
        entry.latest_version = latest_version(&entry.versions).unwrap_or_default();
        self.generated = Some(Utc::now());
    }
}

impl PatternIndexEntry {
    /// Picks the version to fetch for a request.
    ///
    /// `None` and `"latest"` select the published latest version. Any other
    /// value must match a listed version exactly.
    pub fn resolve_version(&self, requested: Option<&str>) -> Result<String> {
        match requested.map(str::trim) {
            None | Some("") | Some("latest") => {
                if !self.latest_version.is_empty() {
                    return Ok(self.latest_version.clone());
                }
                latest_version(&self.versions).ok_or_else(|| Error::VersionNotFound {
                    name: self.name.clone(),
                    version: "latest".to_string(),
                })
            }
            Some(version) => {
                if self.versions.iter().any(|v| v == version) || self.latest_version == version {
                    Ok(version.to_string())
                } else {
                    Err(Error::VersionNotFound {
                        name: self.name.clone(),
                        version: version.to_string(),
                    })
                }
            }
        }
    }
}

/// Transport used to reach remote registries.
pub trait Fetcher {
    /// Fetches `url` with the registry's credentials and returns the body.
    fn get(&self, registry: &Registry, url: &str) -> Result<String>;
}

/// [`Fetcher`] backed by a blocking `reqwest` client.
///
/// The timeout applies to every request made through this instance.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("patterns/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Request {
                registry: "<client>".to_string(),
                source: e,
            })?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn get(&self, registry: &Registry, url: &str) -> Result<String> {
        let request = self.client.get(url);
        let request = match &registry.auth {
            Some(RegistryAuth::Bearer { token }) => request.bearer_auth(token),
            Some(RegistryAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        };
        let response = request.send().map_err(|e| Error::Request {
            registry: registry.name.clone(),
            source: e,
        })?;
        if response.status() != StatusCode::OK {
            return Err(Error::Http {
                registry: registry.name.clone(),
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.text().map_err(|e| Error::Request {
            registry: registry.name.clone(),
            source: e,
        })
    }
}

/// Reads indexes and pattern definitions from local or remote registries.
pub struct RegistryClient {
    fetcher: Box<dyn Fetcher>,
    cache: IndexCache,
}

impl RegistryClient {
    pub fn new(fetcher: Box<dyn Fetcher>, cache: IndexCache) -> Self {
        Self { fetcher, cache }
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    /// Fetches the live index of a registry.
    ///
    /// Successful remote fetches are written to the cache on a best-effort
    /// basis. A failed fetch does not fall back to the cache; use
    /// [`RegistryClient::cached_index`] for that.
    pub fn fetch_index(&self, registry: &Registry) -> Result<RegistryIndex> {
        if registry.is_local() {
            let path = registry.local_index_path();
            debug!(registry = %registry.name, path = %path.display(), "reading local index");
            let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            return serde_yaml_ng::from_str(&content)
                .map_err(|e| Error::yaml(format!("index of registry '{}'", registry.name), e));
        }

        let url = registry.index_url();
        debug!(registry = %registry.name, %url, "fetching index");
        let body = self.fetcher.get(registry, &url)?;
        let index: RegistryIndex = serde_yaml_ng::from_str(&body)
            .map_err(|e| Error::yaml(format!("index of registry '{}'", registry.name), e))?;
        let _: CacheWrite = self.cache.store(&registry.name, &index);
        Ok(index)
    }

    /// Returns the cached index of a registry, if one was stored.
    pub fn cached_index(&self, registry: &Registry) -> Result<Option<RegistryIndex>> {
        self.cache.load(&registry.name)
    }

    /// Fetches one pattern definition at an exact version.
    pub fn fetch_pattern(&self, registry: &Registry, name: &str, version: &str) -> Result<Pattern> {
        if !is_path_component(name) || !is_path_component(version) {
            return Err(Error::Validation(vec![format!(
                "registry '{}' lists an invalid pattern reference '{}@{}'",
                registry.name, name, version
            )]));
        }
        let pattern = if registry.is_local() {
            let path = registry.local_pattern_dir(name, version).join(PATTERN_FILE);
            if !path.exists() {
                return Err(Error::VersionNotFound {
                    name: name.to_string(),
                    version: version.to_string(),
                });
            }
            let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            Pattern::from_yaml(&content, &path.display().to_string())?
        } else {
            let url = registry.pattern_url(name, version);
            debug!(registry = %registry.name, %url, "fetching pattern");
            let body = self.fetcher.get(registry, &url)?;
            Pattern::from_yaml(&body, &url)?
        };

        if pattern.name() != name {
            return Err(Error::Validation(vec![format!(
                "registry '{}' returned pattern '{}' when '{}' was requested",
                registry.name,
                pattern.name(),
                name
            )]));
        }
        Ok(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> PatternIndexEntry {
        PatternIndexEntry {
            name: "argo-rollouts".into(),
            versions: vec!["1.5.0".into(), "1.6.2".into(), "1.10.0".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_registry_validation() {
        assert!(Registry::official().validate().is_ok());
        assert!(Registry::new("", RegistryType::Community, "https://x", 1).validate().is_err());
        assert!(Registry::new("c", RegistryType::Community, "", 1).validate().is_err());
        assert!(Registry::new("l", RegistryType::Local, "", 1).validate().is_ok());
        assert!(matches!(
            Registry::local("../cache", "/srv/patterns", 1).validate(),
            Err(Error::InvalidRegistry(_))
        ));
    }

    #[test]
    fn test_fetch_pattern_rejects_traversing_reference() {
        let dir = tempfile::tempdir().unwrap();
        let client = RegistryClient::new(
            Box::new(HttpFetcher::new(Duration::from_secs(1)).unwrap()),
            IndexCache::new(dir.path().join("cache")),
        );
        let registry = Registry::local("team", dir.path(), 1);
        let outside = dir.path().join("escaped");
        Pattern::new("escaped", "1.0.0", "outside").save(outside.join(PATTERN_FILE)).unwrap();

        let err = client.fetch_pattern(&registry, "../../escaped", "1.0.0").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_urls() {
        let registry = Registry::new("c", RegistryType::Community, "https://example.com/reg/", 1);
        assert_eq!(registry.index_url(), "https://example.com/reg/index.yaml");
        assert_eq!(
            registry.pattern_url("vault", "1.0.0"),
            "https://example.com/reg/patterns/vault/1.0.0/pattern.yaml"
        );
    }

    #[test]
    fn test_resolve_version() {
        let mut entry = entry();
        assert_eq!(entry.resolve_version(None).unwrap(), "1.10.0");
        entry.latest_version = "1.6.2".into();
        assert_eq!(entry.resolve_version(Some("latest")).unwrap(), "1.6.2");
        assert_eq!(entry.resolve_version(Some("1.5.0")).unwrap(), "1.5.0");
        assert!(entry.resolve_version(Some("2.0.0")).unwrap_err().is_not_found());
    }

    #[test]
    fn test_add_version_updates_latest() {
        let mut index = RegistryIndex::default();
        let mut pattern = Pattern::new("vault", "1.0.0", "Secrets");
        index.add_version(&pattern);
        pattern.metadata.version = "1.2.0".into();
        index.add_version(&pattern);
        let entry = index.find("vault").unwrap();
        assert_eq!(entry.versions, vec!["1.0.0", "1.2.0"]);
        assert_eq!(entry.latest_version, "1.2.0");
        assert_eq!(index.patterns.len(), 1);
    }

    #[test]
    fn test_auth_round_trips_through_toml() {
        let mut registry = Registry::new("p", RegistryType::Private, "https://p.example", 5);
        registry.auth = Some(RegistryAuth::Bearer { token: "t0k".into() });
        let text = toml::to_string(&registry).unwrap();
        let parsed: Registry = toml::from_str(&text).unwrap();
        assert_eq!(parsed, registry);
    }
}
