//! Ordered set of registries with a unified discovery API.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use tracing::{debug, warn};
use crate::error::{Error, Result};
use crate::pattern::Pattern;
use crate::registry::{CategoryInfo, PatternIndexEntry, Registry, RegistryClient, RegistryIndex};

/// Shared flag used to stop a running search between registries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }
}

/// Filters and limits applied by [`RegistryManager::search_patterns`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Exact category match.
    pub category: Option<String>,
    /// Keep entries carrying at least one of these tags.
    pub tags: Vec<String>,
    /// Maximum number of results, `0` for no limit.
    pub limit: usize,
    pub verified_only: bool,
    pub hide_deprecated: bool,
    pub cancel: Option<CancelToken>,
}

/// A search hit together with the registry that reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub entry: PatternIndexEntry,
    pub registry: String,
    /// Filled in by the marketplace from the local install state.
    pub installed: bool,
}

/// A pattern definition fetched at a concrete version.
#[derive(Debug, Clone)]
pub struct ResolvedPattern {
    pub pattern: Pattern,
    pub entry: PatternIndexEntry,
    pub registry: String,
}

/// Owns the configured registries, sorted by descending priority.
pub struct RegistryManager {
    registries: Vec<Registry>,
    client: RegistryClient,
}

impl RegistryManager {
    /// Creates a manager holding only the default `official` registry.
    pub fn new(client: RegistryClient) -> Self {
        Self {
            registries: vec![Registry::official()],
            client,
        }
    }

    /// Creates a manager with no registries at all.
    pub fn empty(client: RegistryClient) -> Self {
        Self {
            registries: Vec::new(),
            client,
        }
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    /// Adds a registry and re-sorts the set by descending priority.
    ///
    /// Registries with equal priority keep their insertion order.
    pub fn add_registry(&mut self, registry: Registry) -> Result<()> {
        registry.validate()?;
        if self.registries.iter().any(|r| r.name == registry.name) {
            return Err(Error::DuplicateRegistry(registry.name));
        }
        debug!(registry = %registry.name, priority = registry.priority, "adding registry");
        self.registries.push(registry);
        self.registries.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    pub fn remove_registry(&mut self, name: &str) -> Result<Registry> {
        let position = self
            .registries
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| Error::RegistryNotFound(name.to_string()))?;
        Ok(self.registries.remove(position))
    }

    pub fn list_registries(&self) -> &[Registry] {
        &self.registries
    }

    pub fn get_registry(&self, name: &str) -> Result<&Registry> {
        self.registries
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::RegistryNotFound(name.to_string()))
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<()> {
        let registry = self
            .registries
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::RegistryNotFound(name.to_string()))?;
        registry.enabled = enabled;
        Ok(())
    }

    /// Fetches the live index of a registry by name.
    pub fn fetch_index(&self, name: &str) -> Result<RegistryIndex> {
        let registry = self.get_registry(name)?;
        self.client.fetch_index(registry)
    }

    fn enabled_registries(&self) -> impl Iterator<Item = &Registry> {
        self.registries.iter().filter(|r| r.enabled)
    }

    /// Live index first, cached copy second, `None` if neither is available.
    fn index_with_fallback(&self, registry: &Registry) -> Option<RegistryIndex> {
        let live_err = match self.client.fetch_index(registry) {
            Ok(index) => return Some(index),
            Err(e) => e,
        };
        match self.client.cached_index(registry) {
            Ok(Some(index)) => {
                warn!(registry = %registry.name, error = %live_err, "using cached index");
                Some(index)
            }
            Ok(None) => {
                warn!(registry = %registry.name, error = %live_err, "skipping unavailable registry");
                None
            }
            Err(cache_err) => {
                warn!(
                    registry = %registry.name,
                    error = %live_err,
                    cache_error = %cache_err,
                    "skipping unavailable registry"
                );
                None
            }
        }
    }

    /// Searches every enabled registry in priority order.
    ///
    /// The first registry to report a name wins. A registry that can be
    /// reached neither live nor through the cache contributes nothing.
    /// Cancelling the token stops before the next registry and returns what
    /// was collected so far.
    pub fn search_patterns(&self, query: &str, options: &SearchOptions) -> Vec<SearchResult> {
        let query = query.trim().to_lowercase();
        let mut seen = HashSet::new();
        let mut results = Vec::new();

        for registry in self.enabled_registries() {
            if options.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
                debug!("search cancelled, returning partial results");
                break;
            }
            let Some(index) = self.index_with_fallback(registry) else {
                continue;
            };
            for entry in index.patterns {
                if seen.contains(&entry.name) {
                    continue;
                }
                seen.insert(entry.name.clone());
                if matches_search(&entry, &query, options) {
                    results.push(SearchResult {
                        entry,
                        registry: registry.name.clone(),
                        installed: false,
                    });
                }
            }
        }

        rank_results(&mut results, &query);
        if options.limit > 0 {
            results.truncate(options.limit);
        }
        results
    }

    /// Fetches a pattern definition from a named registry.
    pub fn fetch_pattern(&self, registry: &str, name: &str, version: &str) -> Result<Pattern> {
        let registry = self.get_registry(registry)?;
        self.client.fetch_pattern(registry, name, version)
    }

    /// Finds the index entry of a pattern in the highest-priority registry listing it.
    pub fn find_pattern(&self, name: &str) -> Result<(PatternIndexEntry, String)> {
        for registry in self.enabled_registries() {
            let Some(index) = self.index_with_fallback(registry) else {
                continue;
            };
            if let Some(entry) = index.find(name) {
                return Ok((entry.clone(), registry.name.clone()));
            }
        }
        Err(Error::PatternNotFound(name.to_string()))
    }

    /// Locates a pattern and fetches its definition at the requested or latest version.
    pub fn resolve_pattern(&self, name: &str, version: Option<&str>) -> Result<ResolvedPattern> {
        let (entry, registry) = self.find_pattern(name)?;
        let version = entry.resolve_version(version)?;
        let pattern = self.fetch_pattern(&registry, name, &version)?;
        Ok(ResolvedPattern {
            pattern,
            entry,
            registry,
        })
    }

    /// Merges the category lists of all enabled registries, summing counts.
    ///
    /// Registries that publish no category list contribute categories
    /// derived from their pattern entries.
    pub fn get_categories(&self) -> Vec<CategoryInfo> {
        let mut merged: BTreeMap<String, CategoryInfo> = BTreeMap::new();
        for registry in self.enabled_registries() {
            let Some(index) = self.index_with_fallback(registry) else {
                continue;
            };
            let categories = if index.categories.is_empty() {
                derive_categories(&index.patterns)
            } else {
                index.categories
            };
            for category in categories {
                merged
                    .entry(category.name.clone())
                    .and_modify(|c| {
                        c.count += category.count;
                        if c.description.is_empty() {
                            c.description = category.description.clone();
                        }
                    })
                    .or_insert(category);
            }
        }
        let mut categories: Vec<CategoryInfo> = merged.into_values().collect();
        categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        categories
    }
}

fn derive_categories(entries: &[PatternIndexEntry]) -> Vec<CategoryInfo> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for entry in entries.iter().filter(|e| !e.category.is_empty()) {
        *counts.entry(entry.category.as_str()).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(name, count)| CategoryInfo {
            name: name.to_string(),
            description: String::new(),
            count,
        })
        .collect()
}

/// Filter predicate for search. `query` must already be lowercased.
fn matches_search(entry: &PatternIndexEntry, query: &str, options: &SearchOptions) -> bool {
    if let Some(category) = &options.category {
        if &entry.category != category {
            return false;
        }
    }
    if !options.tags.is_empty() && !entry.tags.iter().any(|t| options.tags.contains(t)) {
        return false;
    }
    if options.verified_only && !entry.verified {
        return false;
    }
    if options.hide_deprecated && entry.deprecated {
        return false;
    }
    if query.is_empty() {
        return true;
    }
    entry.name.to_lowercase().contains(query)
        || entry.description.to_lowercase().contains(query)
        || entry.tags.iter().any(|t| t.to_lowercase().contains(query))
}

/// Exact name match, then name prefix, then rating, then downloads.
fn rank_results(results: &mut [SearchResult], query: &str) {
    results.sort_by(|a, b| {
        let a_name = a.entry.name.to_lowercase();
        let b_name = b.entry.name.to_lowercase();
        (b_name == query)
            .cmp(&(a_name == query))
            .then_with(|| b_name.starts_with(query).cmp(&a_name.starts_with(query)))
            .then_with(|| {
                b.entry
                    .rating
                    .partial_cmp(&a.entry.rating)
                    .unwrap_or(Ordering::Equal)
            })
            .then_with(|| b.entry.downloads.cmp(&a.entry.downloads))
    });
}
