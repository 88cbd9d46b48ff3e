use std::collections::HashMap;
use std::path::Path;
use serde_json::json;
use tempfile::TempDir;
use patterns::*;

/// Serves canned bodies keyed by URL; anything else answers 503.
struct MockFetcher {
    bodies: HashMap<String, String>,
}

impl Fetcher for MockFetcher {
    fn get(&self, registry: &Registry, url: &str) -> Result<String> {
        self.bodies.get(url).cloned().ok_or_else(|| Error::Http {
            registry: registry.name.clone(),
            url: url.to_string(),
            status: 503,
        })
    }
}

fn pattern(name: &str, version: &str, category: &str) -> Pattern {
    let mut pattern = Pattern::new(name, version, &format!("{} pattern", name));
    pattern.metadata.category = category.to_string();
    pattern.spec.components.push(Component {
        name: name.to_string(),
        component_type: "helm".to_string(),
        source: format!("https://charts.example.com/{}", name),
        namespace: Some(name.to_string()),
        ..Default::default()
    });
    pattern
}

fn entry(pattern: &Pattern, rating: f64, downloads: u64) -> PatternIndexEntry {
    PatternIndexEntry {
        name: pattern.name().to_string(),
        description: pattern.metadata.description.clone(),
        category: pattern.metadata.category.clone(),
        tags: pattern.metadata.tags.clone(),
        versions: vec![pattern.version().to_string()],
        latest_version: pattern.version().to_string(),
        rating,
        downloads,
        ..Default::default()
    }
}

/// Writes a local registry containing every given pattern version.
fn write_registry(root: &Path, patterns: &[(Pattern, f64, u64)]) {
    let mut index = RegistryIndex {
        version: "1".into(),
        ..Default::default()
    };
    for (pattern, rating, downloads) in patterns {
        pattern
            .save(root.join("patterns").join(pattern.name()).join(pattern.version()).join(PATTERN_FILE))
            .unwrap();
        match index.patterns.iter_mut().find(|e| e.name == pattern.name()) {
            Some(existing) => {
                existing.versions.push(pattern.version().to_string());
                existing.latest_version = pattern.version().to_string();
            }
            None => index.patterns.push(entry(pattern, *rating, *downloads)),
        }
    }
    std::fs::create_dir_all(root).unwrap();
    std::fs::write(root.join(INDEX_FILE), serde_yaml_ng::to_string(&index).unwrap()).unwrap();
}

struct Fixture {
    _dirs: Vec<TempDir>,
    project: std::path::PathBuf,
    cache: std::path::PathBuf,
}

impl Fixture {
    fn new() -> Fixture {
        let project = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        Fixture {
            project: project.path().to_path_buf(),
            cache: cache.path().to_path_buf(),
            _dirs: vec![project, cache],
        }
    }

    fn registry_dir(&mut self) -> std::path::PathBuf {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        self._dirs.push(dir);
        path
    }

    fn marketplace(&self, registries: Vec<Registry>, bodies: HashMap<String, String>) -> Marketplace {
        let client = RegistryClient::new(Box::new(MockFetcher { bodies }), IndexCache::new(&self.cache));
        let mut manager = RegistryManager::empty(client);
        for registry in registries {
            manager.add_registry(registry).unwrap();
        }
        let installer = Installer::new(&self.project, STATE_DIR).unwrap();
        Marketplace::new(manager, installer)
    }
}

fn standard(fixture: &mut Fixture) -> Marketplace {
    let dir = fixture.registry_dir();
    let mut monitoring = pattern("prometheus-stack", "1.0.0", "monitoring");
    monitoring.metadata.tags = vec!["metrics".into()];
    monitoring.spec.config.insert(
        "retention".into(),
        ConfigItem {
            item_type: "string".into(),
            default: Some(json!("15d")),
            ..Default::default()
        },
    );
    monitoring.spec.config.insert(
        "domain".into(),
        ConfigItem {
            item_type: "string".into(),
            required: true,
            ..Default::default()
        },
    );
    write_registry(
        &dir,
        &[
            (monitoring, 4.8, 900),
            (pattern("prom-extra", "0.1.0", "monitoring"), 3.0, 10),
            (pattern("loki", "2.9.0", "logging"), 4.1, 300),
        ],
    );
    fixture.marketplace(vec![Registry::local("team", &dir, 10)], HashMap::new())
}

fn domain_config() -> ConfigValues {
    let mut config = ConfigValues::new();
    config.insert("domain".into(), json!("metrics.example.com"));
    config
}

#[test]
fn test_search_ranks_prefix_match_first() {
    let mut fixture = Fixture::new();
    let market = standard(&mut fixture);
    let results = market.search("prom", &SearchOptions::default());
    let names: Vec<_> = results.iter().map(|r| r.entry.name.as_str()).collect();
    assert_eq!(names, vec!["prometheus-stack", "prom-extra"]);

    let results = market.search("prometheus", &SearchOptions::default());
    assert_eq!(results[0].entry.name, "prometheus-stack");
}

#[test]
fn test_search_filters_and_limit() {
    let mut fixture = Fixture::new();
    let market = standard(&mut fixture);
    assert_eq!(market.search("", &SearchOptions::default()).len(), 3);

    let options = SearchOptions {
        category: Some("logging".into()),
        ..Default::default()
    };
    let results = market.search("", &options);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.name, "loki");

    let options = SearchOptions {
        tags: vec!["metrics".into()],
        ..Default::default()
    };
    assert_eq!(market.search("", &options).len(), 1);

    let options = SearchOptions {
        limit: 2,
        ..Default::default()
    };
    assert_eq!(market.search("", &options).len(), 2);
}

#[test]
fn test_search_dedup_prefers_higher_priority_registry() {
    let mut fixture = Fixture::new();
    let high = fixture.registry_dir();
    let low = fixture.registry_dir();
    write_registry(&high, &[(pattern("x", "1.0.0", "misc"), 1.0, 1)]);
    write_registry(&low, &[(pattern("x", "2.0.0", "misc"), 5.0, 1000)]);
    let market = fixture.marketplace(
        vec![Registry::local("low", &low, 1), Registry::local("high", &high, 20)],
        HashMap::new(),
    );

    let results = market.search("x", &SearchOptions::default());
    assert_eq!(results.iter().filter(|r| r.entry.name == "x").count(), 1);
    assert_eq!(results[0].registry, "high");
    assert_eq!(results[0].entry.rating, 1.0);
}

#[test]
fn test_failing_registry_does_not_block_search() {
    let mut fixture = Fixture::new();
    let local = fixture.registry_dir();
    write_registry(&local, &[(pattern("vault", "1.15.0", "security"), 4.5, 100)]);
    let down = Registry::new("down", RegistryType::Community, "https://down.example", 50);
    let market = fixture.marketplace(vec![down, Registry::local("local", &local, 1)], HashMap::new());

    let results = market.search("vault", &SearchOptions::default());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].registry, "local");
}

#[test]
fn test_remote_registry_fetch_and_cache() {
    let mut fixture = Fixture::new();
    let remote_pattern = pattern("external-secrets", "0.9.0", "security");
    let index = RegistryIndex {
        patterns: vec![entry(&remote_pattern, 4.0, 50)],
        ..Default::default()
    };
    let mut bodies = HashMap::new();
    bodies.insert(
        "https://remote.example/index.yaml".to_string(),
        serde_yaml_ng::to_string(&index).unwrap(),
    );
    bodies.insert(
        "https://remote.example/patterns/external-secrets/0.9.0/pattern.yaml".to_string(),
        remote_pattern.to_yaml().unwrap(),
    );
    let remote = Registry::new("remote", RegistryType::Private, "https://remote.example/", 5);
    let mut market = fixture.marketplace(vec![remote], bodies);

    let fetched = market.registries().fetch_index("remote").unwrap();
    assert_eq!(fetched.patterns.len(), 1);
    assert!(IndexCache::new(&fixture.cache).load("remote").unwrap().is_some());

    let info = market.get_pattern_info("external-secrets").unwrap();
    assert_eq!(info.registry, "remote");
    assert!(!info.installed);

    let result = market.install("external-secrets", &InstallOptions::default()).unwrap();
    assert_eq!(result.version, "0.9.0");
}

#[test]
fn test_install_list_uninstall_lifecycle() {
    let mut fixture = Fixture::new();
    let mut market = standard(&mut fixture);
    let options = InstallOptions {
        config: domain_config(),
        environments: vec!["staging".into()],
        ..Default::default()
    };
    let result = market.install("prometheus-stack", &options).unwrap();
    assert_eq!(result.version, "1.0.0");
    assert_eq!(result.config["retention"], json!("15d"));
    assert_eq!(result.paths.len(), 2);
    assert!(result.paths.iter().all(|p| p.exists()));

    let names: Vec<_> = market.list_installed().iter().map(|p| p.name().to_string()).collect();
    assert_eq!(names, vec!["prometheus-stack"]);
    let installed = market.list_installed()[0];
    assert_eq!(installed.status, STATUS_INSTALLED);
    assert!(!installed.digest.is_empty());

    let search = market.search("prometheus", &SearchOptions::default());
    assert!(search[0].installed);

    market.uninstall("prometheus-stack", &UninstallOptions::default()).unwrap();
    assert!(market.list_installed().is_empty());
    assert!(result.paths.iter().all(|p| !p.exists()));

    let err = market.uninstall("prometheus-stack", &UninstallOptions::default()).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_install_state_survives_reload() {
    let mut fixture = Fixture::new();
    let mut market = standard(&mut fixture);
    market.install("loki", &InstallOptions::default()).unwrap();

    let reloaded = Installer::new(&fixture.project, STATE_DIR).unwrap();
    assert!(reloaded.is_installed("loki"));
    assert!(fixture.project.join(".marketplace").join("installed.yaml").exists());
}

#[test]
fn test_install_validates_config() {
    let mut fixture = Fixture::new();
    let mut market = standard(&mut fixture);
    let err = market.install("prometheus-stack", &InstallOptions::default()).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert!(market.list_installed().is_empty());
}

#[test]
fn test_install_unknown_pattern_and_version() {
    let mut fixture = Fixture::new();
    let mut market = standard(&mut fixture);
    assert!(matches!(
        market.install("missing", &InstallOptions::default()),
        Err(Error::PatternNotFound(_))
    ));
    let options = InstallOptions {
        version: Some("9.9.9".into()),
        ..Default::default()
    };
    assert!(matches!(
        market.install("loki", &options),
        Err(Error::VersionNotFound { .. })
    ));
}

#[test]
fn test_reinstall_requires_force() {
    let mut fixture = Fixture::new();
    let mut market = standard(&mut fixture);
    market.install("loki", &InstallOptions::default()).unwrap();
    assert!(matches!(
        market.install("loki", &InstallOptions::default()),
        Err(Error::AlreadyInstalled(_))
    ));
    let options = InstallOptions {
        force: true,
        ..Default::default()
    };
    let result = market.install("loki", &options).unwrap();
    assert_eq!(result.previous_version.as_deref(), Some("2.9.0"));
}

#[test]
fn test_dry_run_writes_nothing() {
    let mut fixture = Fixture::new();
    let mut market = standard(&mut fixture);
    let options = InstallOptions {
        dry_run: true,
        ..Default::default()
    };
    let result = market.install("loki", &options).unwrap();
    assert!(result.dry_run);
    assert!(market.list_installed().is_empty());
    assert!(!fixture.project.join(".marketplace").exists());
}

#[test]
fn test_incompatible_tool_is_rejected_unless_forced() {
    let mut fixture = Fixture::new();
    let dir = fixture.registry_dir();
    let mut flux_only = pattern("flux-addons", "1.0.0", "gitops");
    flux_only.spec.tools = vec!["flux".into()];
    write_registry(&dir, &[(flux_only, 3.0, 1)]);
    let mut market = fixture.marketplace(vec![Registry::local("team", &dir, 1)], HashMap::new());

    let mut options = InstallOptions {
        tool: Some("argocd".into()),
        ..Default::default()
    };
    assert!(matches!(
        market.install("flux-addons", &options),
        Err(Error::Incompatible { .. })
    ));
    options.force = true;
    assert!(market.install("flux-addons", &options).is_ok());
}

#[test]
fn test_update_lifecycle() {
    let mut fixture = Fixture::new();
    let dir = fixture.registry_dir();
    let v1 = pattern("cert-manager", "1.13.0", "security");
    let mut v2 = pattern("cert-manager", "1.14.0", "security");
    v2.spec.config.insert(
        "issuer".into(),
        ConfigItem {
            item_type: "string".into(),
            default: Some(json!("letsencrypt")),
            ..Default::default()
        },
    );
    write_registry(&dir, &[(v1, 4.0, 10), (v2, 4.0, 10)]);
    let mut market = fixture.marketplace(vec![Registry::local("team", &dir, 1)], HashMap::new());

    let err = market.update("cert-manager", &UpdateOptions::default()).unwrap_err();
    assert!(matches!(err, Error::NotInstalled(_)));

    let options = InstallOptions {
        version: Some("1.13.0".into()),
        ..Default::default()
    };
    market.install("cert-manager", &options).unwrap();
    let installed_at = market.list_installed()[0].installed_at;

    let updates = market.check_updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].latest, "1.14.0");

    let result = market.update("cert-manager", &UpdateOptions::default()).unwrap();
    assert_eq!(result.version, "1.14.0");
    assert_eq!(result.previous_version.as_deref(), Some("1.13.0"));
    assert_eq!(result.config["issuer"], json!("letsencrypt"));

    let installed = market.list_installed()[0];
    assert_eq!(installed.installed_at, installed_at);
    assert_eq!(installed.status, STATUS_UPDATED);
    assert!(market.check_updates().is_empty());

    let status = market.get_status();
    assert_eq!(status[0].latest.as_deref(), Some("1.14.0"));
    assert!(!status[0].update_available);
}

#[test]
fn test_dependency_tree_handles_cycles_and_missing() {
    let mut fixture = Fixture::new();
    let dir = fixture.registry_dir();
    let dep = |name: &str| Dependency {
        name: name.into(),
        ..Default::default()
    };
    let mut a = pattern("a", "1.0.0", "misc");
    a.spec.dependencies = vec![dep("b"), dep("ghost")];
    let mut b = pattern("b", "1.0.0", "misc");
    b.spec.dependencies = vec![dep("c")];
    let mut c = pattern("c", "1.0.0", "misc");
    c.spec.dependencies = vec![dep("a")];
    write_registry(&dir, &[(a, 1.0, 1), (b, 1.0, 1), (c, 1.0, 1)]);
    let market = fixture.marketplace(vec![Registry::local("team", &dir, 1)], HashMap::new());

    let tree = market.dependency_tree("a").unwrap();
    assert_eq!(tree["a"], vec!["b", "ghost"]);
    assert_eq!(tree["b"], vec!["c"]);
    assert_eq!(tree["c"], vec!["a"]);
    assert!(tree["ghost"].is_empty());
    assert_eq!(tree.len(), 4);

    assert!(market.dependency_tree("nothing").unwrap_err().is_not_found());
}

#[test]
fn test_install_with_dependencies() {
    let mut fixture = Fixture::new();
    let dir = fixture.registry_dir();
    let mut ingress = pattern("ingress-nginx", "4.10.0", "ingress");
    ingress.spec.dependencies = vec![
        Dependency {
            name: "cert-manager".into(),
            version: Some("latest".into()),
            ..Default::default()
        },
        Dependency {
            name: "external-dns".into(),
            optional: true,
            ..Default::default()
        },
    ];
    write_registry(
        &dir,
        &[
            (ingress, 4.0, 10),
            (pattern("cert-manager", "1.14.0", "security"), 4.0, 10),
            (pattern("external-dns", "0.14.0", "networking"), 4.0, 10),
        ],
    );
    let mut market = fixture.marketplace(vec![Registry::local("team", &dir, 1)], HashMap::new());
    let options = InstallOptions {
        with_dependencies: true,
        ..Default::default()
    };
    let result = market.install("ingress-nginx", &options).unwrap();
    assert_eq!(result.dependencies, vec!["cert-manager"]);
    let names: Vec<_> = market.list_installed().iter().map(|p| p.name().to_string()).collect();
    assert_eq!(names, vec!["cert-manager", "ingress-nginx"]);
}

#[test]
fn test_conflict_check_reports_overlapping_components() {
    let mut fixture = Fixture::new();
    let dir = fixture.registry_dir();
    let mut kube_prometheus = pattern("kube-prometheus", "1.0.0", "monitoring");
    kube_prometheus.spec.components.push(Component {
        name: "grafana".into(),
        component_type: "helm".into(),
        namespace: Some("monitoring".into()),
        ..Default::default()
    });
    let mut grafana = pattern("grafana-stack", "1.0.0", "monitoring");
    grafana.spec.components = vec![Component {
        name: "grafana".into(),
        component_type: "helm".into(),
        namespace: Some("monitoring".into()),
        ..Default::default()
    }];
    write_registry(&dir, &[(kube_prometheus, 4.0, 10), (grafana, 4.0, 10)]);
    let mut market = fixture.marketplace(vec![Registry::local("team", &dir, 1)], HashMap::new());

    assert!(market.conflict_check("grafana-stack").unwrap().is_empty());
    market.install("kube-prometheus", &InstallOptions::default()).unwrap();
    let conflicts = market.conflict_check("grafana-stack").unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].pattern, "kube-prometheus");
    assert!(market.conflict_check("kube-prometheus").unwrap().is_empty());
}

#[test]
fn test_registry_management() {
    let mut fixture = Fixture::new();
    let mut market = standard(&mut fixture);
    let err = market.add_registry(Registry::local("team", "/elsewhere", 99)).unwrap_err();
    assert!(matches!(err, Error::DuplicateRegistry(_)));

    market
        .add_registry(Registry::new("community", RegistryType::Community, "https://c.example", 50))
        .unwrap();
    let priorities: Vec<_> = market.list_registries().iter().map(|r| r.priority).collect();
    assert_eq!(priorities, vec![50, 10]);

    market.remove_registry("community").unwrap();
    assert!(matches!(
        market.remove_registry("community"),
        Err(Error::RegistryNotFound(_))
    ));
}

#[test]
fn test_categories_merge_explicit_and_derived() {
    let mut fixture = Fixture::new();
    let explicit = fixture.registry_dir();
    write_registry(&explicit, &[(pattern("loki", "2.9.0", "logging"), 4.0, 1)]);
    let mut index: RegistryIndex =
        serde_yaml_ng::from_str(&std::fs::read_to_string(explicit.join(INDEX_FILE)).unwrap()).unwrap();
    index.categories = vec![CategoryInfo {
        name: "logging".into(),
        description: "Log pipelines".into(),
        count: 5,
    }];
    std::fs::write(explicit.join(INDEX_FILE), serde_yaml_ng::to_string(&index).unwrap()).unwrap();

    let derived = fixture.registry_dir();
    write_registry(
        &derived,
        &[
            (pattern("fluent-bit", "3.0.0", "logging"), 4.0, 1),
            (pattern("vault", "1.15.0", "security"), 4.0, 1),
        ],
    );
    let market = fixture.marketplace(
        vec![Registry::local("a", &explicit, 2), Registry::local("b", &derived, 1)],
        HashMap::new(),
    );
    let categories = market.get_categories();
    assert_eq!(categories[0].name, "logging");
    assert_eq!(categories[0].count, 6);
    assert_eq!(categories[0].description, "Log pipelines");
    assert_eq!(categories[1].name, "security");
}

#[test]
fn test_create_validate_and_publish() {
    let mut fixture = Fixture::new();
    let registry_dir = fixture.registry_dir();
    let workspace = fixture.registry_dir();
    let mut market = fixture.marketplace(vec![Registry::local("team", &registry_dir, 1)], HashMap::new());

    let dir = market.create_pattern("my-app", &workspace).unwrap();
    assert!(matches!(
        market.create_pattern("my-app", &workspace),
        Err(Error::AlreadyExists(_))
    ));
    let pattern = market.validate_pattern(&dir).unwrap();
    assert_eq!(pattern.name(), "my-app");

    let published = market.publish_pattern(&dir, "team").unwrap();
    assert!(published.join(PATTERN_FILE).exists());
    assert!(published.join("README.md").exists());
    assert!(matches!(
        market.publish_pattern(&dir, "team"),
        Err(Error::AlreadyPublished { .. })
    ));

    let results = market.search("my-app", &SearchOptions::default());
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entry.latest_version, "0.1.0");
    market.install("my-app", &InstallOptions::default()).unwrap();

    market
        .add_registry(Registry::new("remote", RegistryType::Community, "https://r.example", 1))
        .unwrap();
    assert!(matches!(
        market.publish_pattern(&dir, "remote"),
        Err(Error::Unsupported(_))
    ));
}

#[test]
fn test_validate_pattern_reports_all_errors() {
    let fixture = Fixture::new();
    let market = fixture.marketplace(vec![], HashMap::new());
    let path = fixture.project.join("broken.yaml");
    std::fs::write(&path, "kind: Chart\nmetadata:\n  version: 1.0.0\n").unwrap();
    let Err(Error::Validation(errors)) = market.validate_pattern(&path) else {
        panic!("expected validation errors");
    };
    assert!(errors.iter().any(|e| e.contains("name")));
    assert!(errors.iter().any(|e| e.contains("kind")));
    assert!(errors.iter().any(|e| e.contains("apiVersion")));
}

#[test]
fn test_export_and_import() {
    let mut fixture = Fixture::new();
    let dir = fixture.registry_dir();
    let mut vault = pattern("vault", "1.15.0", "security");
    vault.spec.config.insert(
        "token".into(),
        ConfigItem {
            item_type: "secret".into(),
            ..Default::default()
        },
    );
    vault.spec.config.insert(
        "replicas".into(),
        ConfigItem {
            item_type: "integer".into(),
            default: Some(json!(1)),
            ..Default::default()
        },
    );
    write_registry(&dir, &[(vault, 4.0, 10)]);
    let mut market = fixture.marketplace(vec![Registry::local("team", &dir, 1)], HashMap::new());
    let mut config = ConfigValues::new();
    config.insert("token".into(), json!("s3cr3t"));
    config.insert("replicas".into(), json!(3));
    let options = InstallOptions {
        config,
        ..Default::default()
    };
    market.install("vault", &options).unwrap();

    let export_path = fixture.project.join("export.yaml");
    let export = market.export_config(&export_path).unwrap();
    assert_eq!(export.patterns.len(), 1);
    assert!(!export.patterns[0].config.contains_key("token"));
    assert!(!std::fs::read_to_string(&export_path).unwrap().contains("s3cr3t"));

    let other = Fixture::new();
    let mut fresh = other.marketplace(vec![], HashMap::new());
    let report = fresh.import_config(&export_path, false).unwrap();
    assert_eq!(report.registries_added, vec!["team"]);
    assert_eq!(report.installed, vec!["vault"]);
    assert!(report.failed.is_empty());
    let installed = fresh.list_installed()[0];
    assert_eq!(installed.config["replicas"], json!(3));

    let again = fresh.import_config(&export_path, false).unwrap();
    assert_eq!(again.skipped, vec!["vault"]);
}

#[test]
fn test_recommendations_and_suggestions() {
    let mut fixture = Fixture::new();
    let dir = fixture.registry_dir();
    let mut sealed = pattern("sealed-secrets", "2.15.0", "security");
    sealed.metadata.tags = vec!["secrets".into()];
    write_registry(
        &dir,
        &[
            (pattern("prometheus-stack", "1.0.0", "monitoring"), 4.8, 900),
            (sealed, 4.2, 500),
            (pattern("loki", "2.9.0", "logging"), 4.1, 300),
        ],
    );
    let mut market = fixture.marketplace(vec![Registry::local("team", &dir, 1)], HashMap::new());
    market.install("loki", &InstallOptions::default()).unwrap();

    let recommended = market.get_recommended_patterns(10);
    assert!(recommended.iter().all(|r| r.entry.name != "loki"));
    assert_eq!(recommended[0].entry.name, "prometheus-stack");

    let popular = market.get_popular_patterns(1);
    assert_eq!(popular[0].entry.name, "prometheus-stack");

    std::fs::create_dir_all(fixture.project.join("apps").join("prometheus")).unwrap();
    let suggestions = market.suggest_patterns(&fixture.project, 3);
    let categories: Vec<_> = suggestions.iter().map(|s| s.category.as_str()).collect();
    assert_eq!(categories, vec!["security"]);
    assert_eq!(suggestions[0].patterns[0].entry.name, "sealed-secrets");
}

#[test]
fn test_metrics() {
    let mut fixture = Fixture::new();
    let mut market = standard(&mut fixture);
    assert_eq!(market.get_metrics().installed, 0);
    market.install("loki", &InstallOptions::default()).unwrap();
    let metrics = market.get_metrics();
    assert_eq!(metrics.installed, 1);
    assert_eq!(metrics.registries, 1);
    assert_eq!(metrics.by_category["logging"], 1);
    assert_eq!(metrics.by_status[STATUS_INSTALLED], 1);
    assert!(metrics.last_change.is_some());
}

#[test]
fn test_uninstall_in_copied_project_leaves_original_alone() {
    let mut fixture = Fixture::new();
    let mut market = standard(&mut fixture);
    let result = market.install("loki", &InstallOptions::default()).unwrap();
    let installed = market.list_installed()[0];
    assert!(installed.paths.iter().all(|p| p.is_relative()));

    let copy = TempDir::new().unwrap();
    patterns::util::copy_dir(&fixture.project, copy.path()).unwrap();
    let mut installer = Installer::new(copy.path(), STATE_DIR).unwrap();
    installer.uninstall("loki", &UninstallOptions::default()).unwrap();

    assert!(result.paths.iter().all(|p| p.exists()));
    assert!(!copy.path().join(".marketplace/patterns/loki").exists());
    assert!(market.installer().is_installed("loki"));
}

#[test]
fn test_pattern_name_cannot_escape_state_dir() {
    let mut fixture = Fixture::new();
    let base = fixture.registry_dir();
    let registry = base.join("registry");
    let mut escaping = Pattern::new("../../escaped", "1.0.0", "escaping pattern");
    escaping.metadata.category = "misc".into();
    // Where `<registry>/patterns/../../escaped/1.0.0` points to.
    escaping.save(base.join("escaped/1.0.0").join(PATTERN_FILE)).unwrap();
    std::fs::create_dir_all(&registry).unwrap();
    let index = RegistryIndex {
        patterns: vec![entry(&escaping, 1.0, 1)],
        ..Default::default()
    };
    std::fs::write(registry.join(INDEX_FILE), serde_yaml_ng::to_string(&index).unwrap()).unwrap();
    let mut market = fixture.marketplace(vec![Registry::local("team", &registry, 1)], HashMap::new());

    let err = market.install("../../escaped", &InstallOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(!fixture.project.join("escaped").exists());
    assert!(market.list_installed().is_empty());
}

#[test]
fn test_update_applies_new_defaults_and_keeps_overrides() {
    let mut fixture = Fixture::new();
    let dir = fixture.registry_dir();
    let item = |item_type: &str, default: serde_json::Value| ConfigItem {
        item_type: item_type.into(),
        default: Some(default),
        ..Default::default()
    };
    let mut v1 = pattern("external-dns", "0.13.0", "networking");
    v1.spec.config.insert("interval".into(), item("string", json!("1m")));
    v1.spec.config.insert("replicas".into(), item("integer", json!(1)));
    v1.spec.config.insert("sources".into(), item("string", json!("service")));
    let mut v2 = pattern("external-dns", "0.14.0", "networking");
    v2.spec.config.insert("interval".into(), item("string", json!("5m")));
    v2.spec.config.insert("replicas".into(), item("integer", json!(1)));
    v2.spec.config.insert("sources".into(), item("array", json!(["service", "ingress"])));
    write_registry(&dir, &[(v1, 4.0, 1), (v2, 4.0, 1)]);
    let mut market = fixture.marketplace(vec![Registry::local("team", &dir, 1)], HashMap::new());

    let mut config = ConfigValues::new();
    config.insert("replicas".into(), json!(2));
    let options = InstallOptions {
        version: Some("0.13.0".into()),
        config,
        ..Default::default()
    };
    market.install("external-dns", &options).unwrap();

    let result = market.update("external-dns", &UpdateOptions::default()).unwrap();
    assert_eq!(result.version, "0.14.0");
    assert_eq!(result.config["interval"], json!("5m"));
    assert_eq!(result.config["replicas"], json!(2));
    assert_eq!(result.config["sources"], json!(["service", "ingress"]));
}

#[test]
fn test_failed_install_with_dependencies_installs_nothing() {
    let mut fixture = Fixture::new();
    let dir = fixture.registry_dir();
    let mut ingress = pattern("ingress-nginx", "4.10.0", "ingress");
    ingress.spec.dependencies = vec![Dependency {
        name: "cert-manager".into(),
        ..Default::default()
    }];
    ingress.spec.config.insert(
        "domain".into(),
        ConfigItem {
            item_type: "string".into(),
            required: true,
            ..Default::default()
        },
    );
    write_registry(
        &dir,
        &[(ingress, 4.0, 10), (pattern("cert-manager", "1.14.0", "security"), 4.0, 10)],
    );
    let mut market = fixture.marketplace(vec![Registry::local("team", &dir, 1)], HashMap::new());
    let options = InstallOptions {
        with_dependencies: true,
        ..Default::default()
    };
    let err = market.install("ingress-nginx", &options).unwrap_err();
    assert!(matches!(err, Error::InvalidConfig(_)));
    assert!(market.list_installed().is_empty());
}
