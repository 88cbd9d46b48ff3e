use std::path::Path;
use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use patterns::{
    ConfigValues, InstallOptions, Marketplace, MarketplaceConfig, Registry, RegistryAuth,
    RegistryType, SearchOptions, SearchResult, UninstallOptions, UpdateOptions,
};
use crate::cli::{PatternsCommand, RegistryCommand, RegistryKind, CLI};

pub fn execute(cli: CLI) -> Result<()> {
    let config_path = match cli.config {
        Some(path) => path,
        None => MarketplaceConfig::default_path()?,
    };
    let mut config = MarketplaceConfig::load(&config_path)
        .with_context(|| format!("Could not load {}", config_path.display()))?;
    let project = match cli.project {
        Some(project) => project,
        None => std::env::current_dir()?,
    };
    let mut market = Marketplace::open(&project, &config)?;

    match cli.command {
        PatternsCommand::Search { query, category, tags, limit, verified } => {
            let options = SearchOptions {
                category,
                tags,
                limit,
                verified_only: verified,
                ..Default::default()
            };
            let results = market.search(query.as_deref().unwrap_or(""), &options);
            print_results(&results);
            Ok(())
        }
        PatternsCommand::Info { name } => execute_info(&market, &name),
        PatternsCommand::Install {
            name,
            version,
            values,
            environments,
            force,
            dry_run,
            with_deps,
            platform,
            tool,
        } => {
            let options = InstallOptions {
                version,
                config: parse_values(&values)?,
                environments,
                force,
                dry_run,
                platform,
                tool,
                with_dependencies: with_deps,
            };
            let result = market.install(&name, &options)?;
            for dependency in &result.dependencies {
                println!("{} {} (dependency)", "installed".green(), dependency);
            }
            let verb = if result.dry_run { "would install" } else { "installed" };
            println!("{} {}@{} from {}", verb.green(), result.name, result.version, result.registry);
            Ok(())
        }
        PatternsCommand::Update { name, version, values, dry_run } => {
            let options = UpdateOptions {
                version,
                config: parse_values(&values)?,
                dry_run,
            };
            let result = market.update(&name, &options)?;
            let previous = result.previous_version.unwrap_or_default();
            println!("{} {} {} -> {}", "updated".green(), result.name, previous, result.version);
            Ok(())
        }
        PatternsCommand::Uninstall { name, keep_files } => {
            market.uninstall(&name, &UninstallOptions { keep_files })?;
            println!("{} {}", "uninstalled".yellow(), name);
            Ok(())
        }
        PatternsCommand::List => {
            let installed = market.list_installed();
            if installed.is_empty() {
                println!("No patterns installed");
            }
            for pattern in installed {
                println!("{}: {}", pattern.name(), pattern.version);
                println!("   {} since {}", pattern.status, pattern.installed_at.format("%Y-%m-%d"));
            }
            Ok(())
        }
        PatternsCommand::Status => {
            for status in market.get_status() {
                let latest = status.latest.as_deref().unwrap_or("unknown");
                let marker = if status.update_available { "update available".yellow() } else { "up to date".green() };
                println!("{}: {} ({}, health {})", status.name, status.version, status.status, status.health);
                println!("   latest {} {}", latest, marker);
            }
            Ok(())
        }
        PatternsCommand::Outdated => {
            let updates = market.check_updates();
            if updates.is_empty() {
                println!("All patterns are up to date");
            }
            for update in updates {
                println!("{}: {} -> {}", update.name, update.current, update.latest.yellow());
            }
            Ok(())
        }
        PatternsCommand::Registry { command } => {
            execute_registry(&mut market, &mut config, &config_path, command)
        }
        PatternsCommand::Categories => {
            for category in market.get_categories() {
                println!("{} ({})", category.name.bold(), category.count);
                if !category.description.is_empty() {
                    println!("   {}", category.description);
                }
            }
            Ok(())
        }
        PatternsCommand::Create { name, dir } => {
            let path = market.create_pattern(&name, &dir)?;
            println!("{} {}", "created".green(), path.display());
            Ok(())
        }
        PatternsCommand::Validate { path } => {
            let pattern = market.validate_pattern(&path)?;
            println!("{} {}@{}", "valid".green(), pattern.name(), pattern.version());
            Ok(())
        }
        PatternsCommand::Publish { path, registry } => {
            let dest = market.publish_pattern(&path, &registry)?;
            println!("{} {}", "published".green(), dest.display());
            Ok(())
        }
        PatternsCommand::Deps { name } => {
            let tree = market.dependency_tree(&name)?;
            for (pattern, dependencies) in tree {
                if dependencies.is_empty() {
                    println!("{}", pattern);
                } else {
                    println!("{} -> {}", pattern, dependencies.join(", "));
                }
            }
            Ok(())
        }
        PatternsCommand::Conflicts { name } => {
            let conflicts = market.conflict_check(&name)?;
            if conflicts.is_empty() {
                println!("No conflicts");
            }
            for conflict in conflicts {
                println!("{}: {}", conflict.pattern.red(), conflict.reason);
            }
            Ok(())
        }
        PatternsCommand::Recommend { limit } => {
            print_results(&market.get_recommended_patterns(limit));
            Ok(())
        }
        PatternsCommand::Popular { limit } => {
            print_results(&market.get_popular_patterns(limit));
            Ok(())
        }
        PatternsCommand::Suggest { limit } => {
            let suggestions = market.suggest_patterns(&project, limit);
            if suggestions.is_empty() {
                println!("No suggestions");
            }
            for suggestion in suggestions {
                println!("{}: {}", suggestion.category.bold(), suggestion.reason);
                print_results(&suggestion.patterns);
            }
            Ok(())
        }
        PatternsCommand::Export { path } => {
            let export = market.export_config(&path)?;
            println!("Exported {} patterns to {}", export.patterns.len(), path.display());
            Ok(())
        }
        PatternsCommand::Import { path, force } => execute_import(&mut market, &path, force),
        PatternsCommand::Metrics => {
            println!("{}", serde_json::to_string_pretty(&market.get_metrics())?);
            Ok(())
        }
    }
}

pub fn execute_info(market: &Marketplace, name: &str) -> Result<()> {
    let info = market.get_pattern_info(name)?;
    let meta = &info.pattern.metadata;
    println!("{}@{}", meta.name.bold(), meta.version);
    println!("  {}", meta.description);
    println!("  registry: {}", info.registry);
    println!("  versions: {}", info.versions.join(", "));
    println!("  rating: {:.1}  downloads: {}", info.rating, info.downloads);
    if info.verified {
        println!("  {}", "verified".green());
    }
    if info.deprecated {
        println!("  {}", "deprecated".red());
    }
    match info.installed_version {
        Some(version) => println!("  installed: {}", version),
        None => println!("  not installed"),
    }
    for component in &info.pattern.spec.components {
        println!("  component {} ({})", component.name, component.component_type);
    }
    for dependency in &info.pattern.spec.dependencies {
        let optional = if dependency.optional { " (optional)" } else { "" };
        println!("  depends on {}{}", dependency.name, optional);
    }
    Ok(())
}

pub fn execute_registry(
    market: &mut Marketplace,
    config: &mut MarketplaceConfig,
    config_path: &Path,
    command: RegistryCommand,
) -> Result<()> {
    match command {
        RegistryCommand::Add { name, url, kind, priority, token } => {
            let mut registry = Registry::new(&name, registry_type(kind), &url, priority);
            registry.auth = token.map(|token| RegistryAuth::Bearer { token });
            market.add_registry(registry.clone())?;
            config.upsert_registry(registry);
            config.save(config_path)?;
            println!("{} registry {}", "added".green(), name);
        }
        RegistryCommand::Remove { name } => {
            market.remove_registry(&name)?;
            config.remove_registry(&name);
            config.save(config_path)?;
            println!("{} registry {}", "removed".yellow(), name);
        }
        RegistryCommand::List => {
            for registry in market.list_registries() {
                let state = if registry.enabled { "enabled".green() } else { "disabled".red() };
                println!(
                    "{} [{}] priority {} {}",
                    registry.name.bold(),
                    registry.registry_type,
                    registry.priority,
                    state
                );
                println!("   {}", registry.url);
            }
        }
    }
    Ok(())
}

pub fn execute_import(market: &mut Marketplace, path: &Path, force: bool) -> Result<()> {
    let report = market.import_config(path, force)?;
    for name in &report.registries_added {
        println!("{} registry {}", "added".green(), name);
    }
    for name in &report.installed {
        println!("{} {}", "installed".green(), name);
    }
    for name in &report.skipped {
        println!("{} {} (already installed)", "skipped".yellow(), name);
    }
    for (name, reason) in &report.failed {
        println!("{} {}: {}", "failed".red(), name, reason);
    }
    if !report.failed.is_empty() {
        return Err(anyhow!("{} item(s) failed to import", report.failed.len()));
    }
    Ok(())
}

fn print_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No patterns found");
        return;
    }
    for result in results {
        let entry = &result.entry;
        let installed = if result.installed { " [installed]".green().to_string() } else { String::new() };
        let verified = if entry.verified { " ✓".green().to_string() } else { String::new() };
        println!("{}@{}{}{}", entry.name.bold(), entry.latest_version, verified, installed);
        if !entry.description.is_empty() {
            println!("   {}", entry.description);
        }
        println!("   {} | rating {:.1} | {} downloads", result.registry, entry.rating, entry.downloads);
    }
}

fn registry_type(kind: RegistryKind) -> RegistryType {
    match kind {
        RegistryKind::Official => RegistryType::Official,
        RegistryKind::Community => RegistryType::Community,
        RegistryKind::Private => RegistryType::Private,
        RegistryKind::Local => RegistryType::Local,
    }
}

/// Parses `key=value` pairs. Values are read as YAML scalars or collections,
/// so `3`, `true` and `[a, b]` keep their types.
fn parse_values(values: &[String]) -> Result<ConfigValues> {
    let mut config = ConfigValues::new();
    for pair in values {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid value '{}', expected key=value", pair))?;
        let parsed = serde_yaml_ng::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        config.insert(key.trim().to_string(), parsed);
    }
    Ok(config)
}
