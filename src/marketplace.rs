//! The single API surface offered to front-ends.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use crate::config::MarketplaceConfig;
use crate::error::{Error, Result};
use crate::installer::{
    check_install, Conflict, InstallOptions, InstallResult, Installer, PatternStatus, UninstallOptions,
    UpdateInfo, UpdateOptions,
};
use crate::manager::{RegistryManager, SearchOptions, SearchResult};
use crate::pattern::{load_pattern, ConfigValues, Pattern, PATTERN_FILE};
use crate::registry::{CategoryInfo, HttpFetcher, Registry, RegistryClient, RegistryIndex};
use crate::state::InstalledPattern;
use crate::suggest::{self, missing_capabilities, Suggestion};
use crate::util::{copy_dir, write_atomic};

/// Full details of one pattern as shown by `info`.
#[derive(Debug, Clone)]
pub struct PatternInfo {
    pub pattern: Pattern,
    pub registry: String,
    pub versions: Vec<String>,
    pub rating: f64,
    pub downloads: u64,
    pub verified: bool,
    pub deprecated: bool,
    pub installed: bool,
    pub installed_version: Option<String>,
}

/// Portable snapshot of registries and installed patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketplaceExport {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default)]
    pub registries: Vec<Registry>,
    #[serde(default)]
    pub patterns: Vec<ExportedPattern>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedPattern {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub registry: String,
    /// Configuration without secret values.
    #[serde(default)]
    pub config: ConfigValues,
    #[serde(default)]
    pub environments: Vec<String>,
}

/// Outcome of [`Marketplace::import_config`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub registries_added: Vec<String>,
    pub installed: Vec<String>,
    pub skipped: Vec<String>,
    /// Patterns or registries that could not be imported, with the reason.
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Metrics {
    pub installed: usize,
    pub registries: usize,
    pub enabled_registries: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_status: BTreeMap<String, usize>,
    pub by_registry: BTreeMap<String, usize>,
    pub last_change: Option<DateTime<Utc>>,
}

const EXPORT_VERSION: &str = "1";

/// Registry discovery and local installation behind one owner.
///
/// Mutating operations take `&mut self`; the marketplace is meant to be
/// owned by a single caller for the duration of a session.
pub struct Marketplace {
    registries: RegistryManager,
    installer: Installer,
}

impl Marketplace {
    pub fn new(registries: RegistryManager, installer: Installer) -> Self {
        Self {
            registries,
            installer,
        }
    }

    /// Builds a marketplace for the project at `root` from user configuration.
    ///
    /// Registries listed in the configuration replace defaults of the same name.
    pub fn open<P: AsRef<Path>>(root: P, config: &MarketplaceConfig) -> Result<Self> {
        let fetcher = HttpFetcher::new(config.timeout())?;
        let client = RegistryClient::new(Box::new(fetcher), config.index_cache()?);
        let mut registries = if config.default_registry {
            RegistryManager::new(client)
        } else {
            RegistryManager::empty(client)
        };
        for registry in &config.registries {
            if registries.get_registry(&registry.name).is_ok() {
                registries.remove_registry(&registry.name)?;
            }
            registries.add_registry(registry.clone())?;
        }
        let installer = Installer::new(root, &config.state_dir)?;
        Ok(Self::new(registries, installer))
    }

    pub fn registries(&self) -> &RegistryManager {
        &self.registries
    }

    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    /// Searches all registries and flags results that are installed locally.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Vec<SearchResult> {
        let mut results = self.registries.search_patterns(query, options);
        for result in &mut results {
            result.installed = self.installer.is_installed(&result.entry.name);
        }
        results
    }

    pub fn get_pattern_info(&self, name: &str) -> Result<PatternInfo> {
        let (entry, registry) = self.registries.find_pattern(name)?;
        let version = entry.resolve_version(None)?;
        let pattern = self.registries.fetch_pattern(&registry, name, &version)?;
        let installed = self.installer.get_installed(name);
        Ok(PatternInfo {
            pattern,
            registry,
            versions: entry.versions,
            rating: entry.rating,
            downloads: entry.downloads,
            verified: entry.verified,
            deprecated: entry.deprecated,
            installed: installed.is_some(),
            installed_version: installed.map(|p| p.version.clone()),
        })
    }

    /// Installs a pattern, refusing to replace an existing installation unless forced.
    ///
    /// With `with_dependencies`, the pattern itself is checked before any
    /// dependency is installed, so a pattern that cannot be installed leaves
    /// nothing behind.
    pub fn install(&mut self, name: &str, options: &InstallOptions) -> Result<InstallResult> {
        if self.installer.is_installed(name) && !options.force {
            return Err(Error::AlreadyInstalled(name.to_string()));
        }
        let resolved = self
            .registries
            .resolve_pattern(name, options.version.as_deref())?;

        let mut dependencies = Vec::new();
        if options.with_dependencies {
            check_install(&resolved.pattern, options)?;
            for dependency in resolved.pattern.spec.dependencies.iter().filter(|d| !d.optional) {
                if self.installer.is_installed(&dependency.name) {
                    continue;
                }
                let version = dependency
                    .version
                    .clone()
                    .filter(|v| !matches!(v.trim(), "" | "*" | "latest"));
                let dependency_options = InstallOptions {
                    version,
                    environments: options.environments.clone(),
                    force: options.force,
                    dry_run: options.dry_run,
                    platform: options.platform.clone(),
                    tool: options.tool.clone(),
                    ..Default::default()
                };
                info!(pattern = %name, dependency = %dependency.name, "installing dependency");
                let result = self
                    .installer
                    .install(&self.registries, &dependency.name, &dependency_options)?;
                dependencies.push(result.name);
            }
        }

        let mut result = self.installer.install_resolved(resolved, options)?;
        result.dependencies = dependencies;
        Ok(result)
    }

    pub fn uninstall(&mut self, name: &str, options: &UninstallOptions) -> Result<InstalledPattern> {
        self.installer.uninstall(name, options)
    }

    pub fn update(&mut self, name: &str, options: &UpdateOptions) -> Result<InstallResult> {
        self.installer.update(&self.registries, name, options)
    }

    pub fn list_installed(&self) -> Vec<&InstalledPattern> {
        self.installer.list_installed()
    }

    pub fn get_status(&self) -> Vec<PatternStatus> {
        self.installer.status(&self.registries)
    }

    pub fn check_updates(&self) -> Vec<UpdateInfo> {
        self.installer.check_updates(&self.registries)
    }

    pub fn add_registry(&mut self, registry: Registry) -> Result<()> {
        self.registries.add_registry(registry)
    }

    /// Removes a registry and drops its cached index.
    pub fn remove_registry(&mut self, name: &str) -> Result<Registry> {
        let removed = self.registries.remove_registry(name)?;
        if let Err(e) = self.registries.client().cache().remove(name) {
            warn!(registry = %name, error = %e, "failed to drop cached index");
        }
        Ok(removed)
    }

    pub fn list_registries(&self) -> &[Registry] {
        self.registries.list_registries()
    }

    pub fn get_categories(&self) -> Vec<CategoryInfo> {
        self.registries.get_categories()
    }

    /// Scaffolds `<parent>/<name>/` with a starter `pattern.yaml`.
    pub fn create_pattern<P: AsRef<Path>>(&self, name: &str, parent: P) -> Result<PathBuf> {
        let dir = parent.as_ref().join(name);
        let definition = dir.join(PATTERN_FILE);
        if definition.exists() {
            return Err(Error::AlreadyExists(definition));
        }
        let pattern = Pattern::scaffold(name);
        pattern.save(&definition)?;

        let manifests = dir.join("manifests");
        std::fs::create_dir_all(&manifests).map_err(|e| Error::io(&manifests, e))?;
        let readme = dir.join("README.md");
        let content = format!(
            "# {}\n\n{}\n\nEdit `pattern.yaml` to describe the components and configuration.\n",
            name, pattern.metadata.description
        );
        std::fs::write(&readme, content).map_err(|e| Error::io(&readme, e))?;
        info!(pattern = %name, path = %dir.display(), "created pattern");
        Ok(dir)
    }

    /// Loads a pattern definition and checks it against the schema.
    pub fn validate_pattern<P: AsRef<Path>>(&self, path: P) -> Result<Pattern> {
        let pattern = load_pattern(path)?;
        pattern.validate()?;
        Ok(pattern)
    }

    /// Copies a pattern into a local registry and lists it in the registry index.
    ///
    /// Published versions are immutable; publishing the same version twice fails.
    pub fn publish_pattern<P: AsRef<Path>>(&self, path: P, registry: &str) -> Result<PathBuf> {
        let path = path.as_ref();
        let pattern = self.validate_pattern(path)?;
        let registry = self.registries.get_registry(registry)?;
        if !registry.is_local() {
            return Err(Error::Unsupported(format!(
                "publishing to {} registry '{}'",
                registry.registry_type, registry.name
            )));
        }

        let dest = registry.local_pattern_dir(pattern.name(), pattern.version());
        if dest.exists() {
            return Err(Error::AlreadyPublished {
                name: pattern.name().to_string(),
                version: pattern.version().to_string(),
                registry: registry.name.clone(),
            });
        }
        if path.is_dir() {
            copy_dir(path, &dest)?;
        } else {
            pattern.save(dest.join(PATTERN_FILE))?;
        }

        let index_path = registry.local_index_path();
        let mut index = if index_path.exists() {
            self.registries.client().fetch_index(registry)?
        } else {
            RegistryIndex {
                version: "1".to_string(),
                ..Default::default()
            }
        };
        index.add_version(&pattern);
        let content = serde_yaml_ng::to_string(&index)
            .map_err(|e| Error::yaml(format!("index of registry '{}'", registry.name), e))?;
        write_atomic(&index_path, content.as_bytes()).map_err(|e| Error::io(&index_path, e))?;
        info!(
            pattern = %pattern.name(),
            version = %pattern.version(),
            registry = %registry.name,
            "published pattern"
        );
        Ok(dest)
    }

    pub fn dependency_tree(&self, name: &str) -> Result<BTreeMap<String, Vec<String>>> {
        self.installer.dependency_tree(&self.registries, name)
    }

    pub fn conflict_check(&self, name: &str) -> Result<Vec<Conflict>> {
        self.installer.conflict_check(&self.registries, name)
    }

    pub fn get_recommended_patterns(&self, limit: usize) -> Vec<SearchResult> {
        let options = SearchOptions {
            hide_deprecated: true,
            ..Default::default()
        };
        suggest::recommended(self.search("", &options), limit)
    }

    pub fn get_popular_patterns(&self, limit: usize) -> Vec<SearchResult> {
        suggest::popular(self.search("", &SearchOptions::default()), limit)
    }

    /// Suggests patterns for capabilities the project directory does not seem to have.
    pub fn suggest_patterns<P: AsRef<Path>>(&self, project: P, limit: usize) -> Vec<Suggestion> {
        missing_capabilities(project.as_ref())
            .into_iter()
            .filter_map(|probe| {
                let options = SearchOptions {
                    category: Some(probe.category.to_string()),
                    hide_deprecated: true,
                    ..Default::default()
                };
                let patterns = suggest::recommended(self.search("", &options), limit);
                if patterns.is_empty() {
                    return None;
                }
                Some(Suggestion {
                    category: probe.category.to_string(),
                    reason: probe.reason.to_string(),
                    patterns,
                })
            })
            .collect()
    }

    /// Builds the export snapshot. Credentials and secret values are left out.
    pub fn export(&self) -> MarketplaceExport {
        let registries = self
            .list_registries()
            .iter()
            .map(|r| Registry {
                auth: None,
                ..r.clone()
            })
            .collect();
        let patterns = self
            .list_installed()
            .into_iter()
            .map(|installed| {
                let secrets = installed.pattern.secret_keys();
                let config = installed
                    .config
                    .iter()
                    .filter(|(key, _)| !secrets.contains(&key.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                ExportedPattern {
                    name: installed.name().to_string(),
                    version: installed.version.clone(),
                    registry: installed.registry.clone(),
                    config,
                    environments: installed.environments.clone(),
                }
            })
            .collect();
        MarketplaceExport {
            version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now(),
            registries,
            patterns,
        }
    }

    /// Writes the export snapshot as YAML.
    pub fn export_config<P: AsRef<Path>>(&self, path: P) -> Result<MarketplaceExport> {
        let path = path.as_ref();
        let export = self.export();
        let content = serde_yaml_ng::to_string(&export)
            .map_err(|e| Error::yaml(path.display().to_string(), e))?;
        write_atomic(path, content.as_bytes()).map_err(|e| Error::io(path, e))?;
        Ok(export)
    }

    /// Adds missing registries and installs the exported patterns.
    ///
    /// Each item is imported independently; failures are collected in the
    /// report instead of aborting the import.
    pub fn import_config<P: AsRef<Path>>(&mut self, path: P, force: bool) -> Result<ImportReport> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let export: MarketplaceExport = serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::yaml(path.display().to_string(), e))?;

        let mut report = ImportReport::default();
        for registry in export.registries {
            if self.registries.get_registry(&registry.name).is_ok() {
                continue;
            }
            let name = registry.name.clone();
            match self.registries.add_registry(registry) {
                Ok(()) => report.registries_added.push(name),
                Err(e) => report.failed.push((name, e.to_string())),
            }
        }
        for pattern in export.patterns {
            if self.installer.is_installed(&pattern.name) && !force {
                report.skipped.push(pattern.name);
                continue;
            }
            let options = InstallOptions {
                version: Some(pattern.version),
                config: pattern.config,
                environments: pattern.environments,
                force,
                ..Default::default()
            };
            match self.install(&pattern.name, &options) {
                Ok(result) => report.installed.push(result.name),
                Err(e) => {
                    warn!(pattern = %pattern.name, error = %e, "import failed");
                    report.failed.push((pattern.name, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// Summary counters computed from local state only.
    pub fn get_metrics(&self) -> Metrics {
        let mut metrics = Metrics {
            registries: self.list_registries().len(),
            enabled_registries: self.list_registries().iter().filter(|r| r.enabled).count(),
            ..Default::default()
        };
        for installed in self.list_installed() {
            metrics.installed += 1;
            let category = match installed.pattern.metadata.category.as_str() {
                "" => "uncategorized".to_string(),
                category => category.to_string(),
            };
            *metrics.by_category.entry(category).or_default() += 1;
            *metrics.by_status.entry(installed.status.clone()).or_default() += 1;
            *metrics.by_registry.entry(installed.registry.clone()).or_default() += 1;
            if metrics.last_change.is_none_or(|last| installed.updated_at > last) {
                metrics.last_change = Some(installed.updated_at);
            }
        }
        metrics
    }
}
