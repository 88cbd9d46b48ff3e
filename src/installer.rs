use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use chrono::Utc;
use tracing::{debug, info, warn};
use crate::error::{Error, Result};
use crate::manager::{RegistryManager, ResolvedPattern};
use crate::pattern::{ConfigValues, Pattern, PATTERN_FILE};
use crate::state::{InstalledPattern, InstalledState, HEALTH_UNKNOWN, STATUS_INSTALLED, STATUS_UPDATED};
use crate::util::{is_newer, is_path_component};

/// Default name of the per-project state directory.
pub const STATE_DIR: &str = ".marketplace";
/// File inside the state directory holding the install state.
pub const STATE_FILE: &str = "installed.yaml";
const VALUES_FILE: &str = "values.yaml";

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Exact version to install, latest when `None`.
    pub version: Option<String>,
    pub config: ConfigValues,
    pub environments: Vec<String>,
    /// Reinstall over an existing installation and skip compatibility checks.
    pub force: bool,
    /// Resolve and validate without writing anything.
    pub dry_run: bool,
    /// Target platform the pattern must support.
    pub platform: Option<String>,
    /// GitOps tool the pattern must support.
    pub tool: Option<String>,
    /// Install missing non-optional dependencies first.
    pub with_dependencies: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Target version, latest when `None`.
    pub version: Option<String>,
    /// Values laid over the currently installed configuration.
    pub config: ConfigValues,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    /// Leave the written files in place and only forget the installation.
    pub keep_files: bool,
}

/// What an install or update did.
#[derive(Debug, Clone, PartialEq)]
pub struct InstallResult {
    pub name: String,
    pub version: String,
    pub registry: String,
    pub previous_version: Option<String>,
    pub config: ConfigValues,
    pub paths: Vec<PathBuf>,
    pub dry_run: bool,
    /// Dependencies installed along with the pattern.
    pub dependencies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternStatus {
    pub name: String,
    pub version: String,
    pub status: String,
    pub health: String,
    /// Latest version known to the registries, `None` if it could not be looked up.
    pub latest: Option<String>,
    pub update_available: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateInfo {
    pub name: String,
    pub current: String,
    pub latest: String,
}

/// An installed pattern that clashes with a candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    pub pattern: String,
    pub reason: String,
}

/// Decides whether a candidate pattern clashes with an installed one.
pub trait ConflictPolicy {
    /// Returns one reason per clash, empty if the two can coexist.
    fn check(&self, candidate: &Pattern, installed: &InstalledPattern) -> Vec<String>;
}

/// Flags components sharing name and namespace, and dependencies pinned to
/// a version other than the installed one.
#[derive(Debug, Clone, Copy, Default)]
pub struct ComponentOverlapPolicy;

impl ConflictPolicy for ComponentOverlapPolicy {
    fn check(&self, candidate: &Pattern, installed: &InstalledPattern) -> Vec<String> {
        let mut reasons = Vec::new();
        for component in &candidate.spec.components {
            let clash = installed
                .pattern
                .spec
                .components
                .iter()
                .any(|other| other.name == component.name && other.namespace == component.namespace);
            if clash {
                let namespace = component.namespace.as_deref().unwrap_or("default");
                reasons.push(format!(
                    "component '{}' in namespace '{}' is already provided",
                    component.name, namespace
                ));
            }
        }
        for dependency in &candidate.spec.dependencies {
            if dependency.name != installed.name() {
                continue;
            }
            if let Some(version) = dependency.version.as_deref() {
                let pinned = !matches!(version.trim(), "" | "*" | "latest");
                if pinned && version != installed.version {
                    reasons.push(format!(
                        "requires {} {} but {} is installed",
                        dependency.name, version, installed.version
                    ));
                }
            }
        }
        reasons
    }
}

/// Executes install, update and uninstall transitions against the local state.
pub struct Installer {
    root: PathBuf,
    state_dir: PathBuf,
    state: InstalledState,
    policy: Box<dyn ConflictPolicy>,
}

impl Installer {
    /// Opens the install state of the project at `root`.
    ///
    /// State lives in `<root>/<state_dir>/installed.yaml`; a missing file
    /// means nothing is installed.
    pub fn new<P: AsRef<Path>>(root: P, state_dir: &str) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let state_dir = root.join(state_dir);
        let state = InstalledState::load(state_dir.join(STATE_FILE))?;
        Ok(Self {
            root,
            state_dir,
            state,
            policy: Box::new(ComponentOverlapPolicy),
        })
    }

    /// Replaces the conflict policy.
    pub fn with_policy(mut self, policy: Box<dyn ConflictPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> &InstalledState {
        &self.state
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.state.contains(name)
    }

    pub fn get_installed(&self, name: &str) -> Option<&InstalledPattern> {
        self.state.get(name)
    }

    /// Installed patterns ordered by name.
    pub fn list_installed(&self) -> Vec<&InstalledPattern> {
        self.state.patterns().collect()
    }

    /// Resolves a pattern through the registries and records it as installed.
    ///
    /// Reinstalling overwrites the previous record.
    pub fn install(
        &mut self,
        registries: &RegistryManager,
        name: &str,
        options: &InstallOptions,
    ) -> Result<InstallResult> {
        let resolved = registries.resolve_pattern(name, options.version.as_deref())?;
        self.install_resolved(resolved, options)
    }

    pub(crate) fn install_resolved(
        &mut self,
        resolved: ResolvedPattern,
        options: &InstallOptions,
    ) -> Result<InstallResult> {
        let ResolvedPattern { pattern, registry, .. } = resolved;
        let config = check_install(&pattern, options)?;

        let name = pattern.name().to_string();
        let version = pattern.version().to_string();
        let previous_version = self.state.get(&name).map(|p| p.version.clone());
        if options.dry_run {
            debug!(pattern = %name, %version, "dry run, nothing written");
            return Ok(InstallResult {
                name,
                version,
                registry,
                previous_version,
                config,
                paths: Vec::new(),
                dry_run: true,
                dependencies: Vec::new(),
            });
        }

        let paths = self.write_files(&pattern, &config)?;
        let now = Utc::now();
        let installed = InstalledPattern {
            digest: pattern.digest()?,
            pattern,
            version: version.clone(),
            registry: registry.clone(),
            installed_at: now,
            updated_at: now,
            config: config.clone(),
            environments: options.environments.clone(),
            status: STATUS_INSTALLED.to_string(),
            health: HEALTH_UNKNOWN.to_string(),
            paths: self.recorded_paths(&paths),
            annotations: BTreeMap::new(),
        };
        self.state.insert(installed);
        self.state.save()?;
        info!(pattern = %name, %version, %registry, "installed pattern");

        Ok(InstallResult {
            name,
            version,
            registry,
            previous_version,
            config,
            paths,
            dry_run: false,
            dependencies: Vec::new(),
        })
    }

    /// Moves an installed pattern to the requested or latest version.
    ///
    /// Values the operator chose for the current version are kept and
    /// overlaid with the supplied ones; everything else takes the new
    /// version's defaults. The original install time is preserved.
    pub fn update(
        &mut self,
        registries: &RegistryManager,
        name: &str,
        options: &UpdateOptions,
    ) -> Result<InstallResult> {
        let current = self
            .state
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;
        let ResolvedPattern { pattern, registry, .. } =
            registries.resolve_pattern(name, options.version.as_deref())?;
        pattern.validate()?;

        let mut supplied = current.pattern.overrides(&current.config);
        supplied.extend(options.config.clone());
        let config = pattern.merge_config_with_defaults(&supplied);
        pattern.validate_config(&config)?;

        let version = pattern.version().to_string();
        if options.dry_run {
            return Ok(InstallResult {
                name: name.to_string(),
                version,
                registry,
                previous_version: Some(current.version),
                config,
                paths: Vec::new(),
                dry_run: true,
                dependencies: Vec::new(),
            });
        }

        let paths = self.write_files(&pattern, &config)?;
        let mut annotations = current.annotations.clone();
        annotations.insert("previous-version".to_string(), current.version.clone());
        let updated = InstalledPattern {
            digest: pattern.digest()?,
            pattern,
            version: version.clone(),
            registry: registry.clone(),
            installed_at: current.installed_at,
            updated_at: Utc::now(),
            config: config.clone(),
            environments: current.environments.clone(),
            status: STATUS_UPDATED.to_string(),
            health: current.health.clone(),
            paths: self.recorded_paths(&paths),
            annotations,
        };
        self.state.insert(updated);
        self.state.save()?;
        info!(pattern = %name, from = %current.version, to = %version, "updated pattern");

        Ok(InstallResult {
            name: name.to_string(),
            version,
            registry,
            previous_version: Some(current.version),
            config,
            paths,
            dry_run: false,
            dependencies: Vec::new(),
        })
    }

    /// Forgets an installed pattern and removes the files written for it.
    pub fn uninstall(&mut self, name: &str, options: &UninstallOptions) -> Result<InstalledPattern> {
        if !self.state.contains(name) {
            return Err(Error::NotInstalled(name.to_string()));
        }
        if !options.keep_files {
            if let Some(installed) = self.state.get(name) {
                let paths: Vec<PathBuf> = installed
                    .paths
                    .iter()
                    .filter_map(|recorded| {
                        let owned = self.owned_path(recorded);
                        if owned.is_none() {
                            warn!(
                                pattern = %name,
                                path = %recorded.display(),
                                "refusing to remove path outside the state directory"
                            );
                        }
                        owned
                    })
                    .collect();
                remove_files(&paths)?;
            }
            if is_path_component(name) {
                let dir = self.pattern_dir(name);
                if dir.exists() {
                    std::fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
                }
            }
        }
        let removed = self
            .state
            .remove(name)
            .ok_or_else(|| Error::NotInstalled(name.to_string()))?;
        self.state.save()?;
        info!(pattern = %name, "uninstalled pattern");
        Ok(removed)
    }

    /// Maps each pattern reachable from `name` to its declared dependency names.
    ///
    /// Installed definitions are preferred over registry lookups. Each
    /// pattern is visited once, so cycles terminate; dependencies that cannot
    /// be resolved map to an empty list.
    pub fn dependency_tree(
        &self,
        registries: &RegistryManager,
        name: &str,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let root = self
            .lookup_pattern(registries, name)
            .ok_or_else(|| Error::PatternNotFound(name.to_string()))?;

        let mut tree = BTreeMap::new();
        let mut visited = HashSet::from([name.to_string()]);
        let mut queue = VecDeque::from([(name.to_string(), Some(root))]);
        while let Some((current, pattern)) = queue.pop_front() {
            let dependencies: Vec<String> = pattern
                .map(|p| p.spec.dependencies.iter().map(|d| d.name.clone()).collect())
                .unwrap_or_default();
            for dependency in &dependencies {
                if visited.insert(dependency.clone()) {
                    let pattern = self.lookup_pattern(registries, dependency);
                    queue.push_back((dependency.clone(), pattern));
                }
            }
            tree.insert(current, dependencies);
        }
        Ok(tree)
    }

    /// Lists installed patterns the candidate would clash with.
    pub fn conflict_check(&self, registries: &RegistryManager, name: &str) -> Result<Vec<Conflict>> {
        let candidate = match registries.resolve_pattern(name, None) {
            Ok(resolved) => resolved.pattern,
            Err(e) => match self.state.get(name) {
                Some(installed) => installed.pattern.clone(),
                None => return Err(e),
            },
        };
        Ok(self.conflicts_with(&candidate))
    }

    pub(crate) fn conflicts_with(&self, candidate: &Pattern) -> Vec<Conflict> {
        self.state
            .patterns()
            .filter(|installed| installed.name() != candidate.name())
            .flat_map(|installed| {
                self.policy
                    .check(candidate, installed)
                    .into_iter()
                    .map(move |reason| Conflict {
                        pattern: installed.name().to_string(),
                        reason,
                    })
            })
            .collect()
    }

    /// Reports each installed pattern together with the latest known version.
    pub fn status(&self, registries: &RegistryManager) -> Vec<PatternStatus> {
        self.state
            .patterns()
            .map(|installed| {
                let latest = registries
                    .find_pattern(installed.name())
                    .ok()
                    .and_then(|(entry, _)| entry.resolve_version(None).ok());
                let update_available = latest
                    .as_deref()
                    .is_some_and(|latest| is_newer(latest, &installed.version));
                PatternStatus {
                    name: installed.name().to_string(),
                    version: installed.version.clone(),
                    status: installed.status.clone(),
                    health: installed.health.clone(),
                    latest,
                    update_available,
                }
            })
            .collect()
    }

    /// Installed patterns with a newer version available.
    pub fn check_updates(&self, registries: &RegistryManager) -> Vec<UpdateInfo> {
        self.status(registries)
            .into_iter()
            .filter(|status| status.update_available)
            .filter_map(|status| {
                status.latest.map(|latest| UpdateInfo {
                    name: status.name,
                    current: status.version,
                    latest,
                })
            })
            .collect()
    }

    fn lookup_pattern(&self, registries: &RegistryManager, name: &str) -> Option<Pattern> {
        match self.state.get(name) {
            Some(installed) => Some(installed.pattern.clone()),
            None => registries.resolve_pattern(name, None).ok().map(|r| r.pattern),
        }
    }

    /// Paths as stored in the state file: relative to the project root.
    fn recorded_paths(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        paths
            .iter()
            .map(|path| path.strip_prefix(&self.root).map(Path::to_path_buf).unwrap_or_else(|_| path.clone()))
            .collect()
    }

    /// Resolves a recorded path against the project root. `None` if it is
    /// absolute, climbs with `..`, or ends up outside the state directory.
    fn owned_path(&self, recorded: &Path) -> Option<PathBuf> {
        if !recorded.components().all(|c| matches!(c, Component::Normal(_))) {
            return None;
        }
        let path = self.root.join(recorded);
        path.starts_with(&self.state_dir).then_some(path)
    }

    fn pattern_dir(&self, name: &str) -> PathBuf {
        self.state_dir.join("patterns").join(name)
    }

    fn write_files(&self, pattern: &Pattern, config: &ConfigValues) -> Result<Vec<PathBuf>> {
        let dir = self.pattern_dir(pattern.name());
        let definition = dir.join(PATTERN_FILE);
        pattern.save(&definition)?;

        let values = dir.join(VALUES_FILE);
        let content = serde_yaml_ng::to_string(config)
            .map_err(|e| Error::yaml(format!("values of {}", pattern.name()), e))?;
        std::fs::write(&values, content).map_err(|e| Error::io(&values, e))?;
        Ok(vec![definition, values])
    }
}

/// Runs every check an install performs before writing anything and
/// returns the configuration that would be recorded.
pub(crate) fn check_install(pattern: &Pattern, options: &InstallOptions) -> Result<ConfigValues> {
    pattern.validate()?;
    if !options.force {
        check_compatibility(pattern, options)?;
    }
    let config = pattern.merge_config_with_defaults(&options.config);
    pattern.validate_config(&config)?;
    Ok(config)
}

fn check_compatibility(pattern: &Pattern, options: &InstallOptions) -> Result<()> {
    if let Some(platform) = &options.platform {
        if !pattern.is_compatible_with_platform(platform) {
            return Err(Error::Incompatible {
                name: pattern.name().to_string(),
                target: format!("platform '{}'", platform),
            });
        }
    }
    if let Some(tool) = &options.tool {
        if !pattern.is_compatible_with_tool(tool) {
            return Err(Error::Incompatible {
                name: pattern.name().to_string(),
                target: format!("tool '{}'", tool),
            });
        }
    }
    Ok(())
}

fn remove_files(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(path, e)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{Component, Dependency};

    fn installed(pattern: Pattern) -> InstalledPattern {
        let now = Utc::now();
        InstalledPattern {
            version: pattern.version().to_string(),
            pattern,
            registry: "local".into(),
            installed_at: now,
            updated_at: now,
            config: ConfigValues::new(),
            environments: vec![],
            status: STATUS_INSTALLED.into(),
            health: HEALTH_UNKNOWN.into(),
            paths: vec![],
            annotations: BTreeMap::new(),
            digest: String::new(),
        }
    }

    fn with_component(name: &str, component: &str, namespace: Option<&str>) -> Pattern {
        let mut pattern = Pattern::new(name, "1.0.0", "test");
        pattern.spec.components.push(Component {
            name: component.into(),
            component_type: "helm".into(),
            namespace: namespace.map(String::from),
            ..Default::default()
        });
        pattern
    }

    #[test]
    fn test_overlap_policy_flags_shared_component() {
        let policy = ComponentOverlapPolicy;
        let existing = installed(with_component("kube-prometheus", "grafana", Some("monitoring")));
        let candidate = with_component("grafana-stack", "grafana", Some("monitoring"));
        assert_eq!(policy.check(&candidate, &existing).len(), 1);

        let elsewhere = with_component("grafana-stack", "grafana", Some("dashboards"));
        assert!(policy.check(&elsewhere, &existing).is_empty());
    }

    #[test]
    fn test_overlap_policy_flags_pinned_dependency_mismatch() {
        let policy = ComponentOverlapPolicy;
        let existing = installed(Pattern::new("cert-manager", "1.13.0", "certs"));
        let mut candidate = Pattern::new("ingress", "1.0.0", "ingress");
        candidate.spec.dependencies.push(Dependency {
            name: "cert-manager".into(),
            version: Some("1.14.0".into()),
            ..Default::default()
        });
        assert_eq!(policy.check(&candidate, &existing).len(), 1);

        candidate.spec.dependencies[0].version = Some("latest".into());
        assert!(policy.check(&candidate, &existing).is_empty());
    }

    #[test]
    fn test_owned_path_stays_inside_state_dir() {
        let root = tempfile::tempdir().unwrap();
        let installer = Installer::new(root.path(), STATE_DIR).unwrap();
        let inside = Path::new(".marketplace/patterns/loki/pattern.yaml");
        assert_eq!(installer.owned_path(inside), Some(root.path().join(inside)));
        assert!(installer.owned_path(Path::new("src/main.rs")).is_none());
        assert!(installer.owned_path(Path::new(".marketplace/../src/main.rs")).is_none());
        assert!(installer.owned_path(&root.path().join(inside)).is_none());
    }

    #[test]
    fn test_compatibility_check() {
        let mut pattern = Pattern::new("p", "1.0.0", "d");
        pattern.spec.tools = vec!["flux".into()];
        let options = InstallOptions {
            tool: Some("argocd".into()),
            ..Default::default()
        };
        assert!(matches!(
            check_compatibility(&pattern, &options),
            Err(Error::Incompatible { .. })
        ));
        let options = InstallOptions {
            tool: Some("Flux".into()),
            platform: Some("kubernetes".into()),
            ..Default::default()
        };
        assert!(check_compatibility(&pattern, &options).is_ok());
    }
}
