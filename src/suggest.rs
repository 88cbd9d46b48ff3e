//! Advisory ranking views and project probes.

use std::cmp::Ordering;
use std::path::Path;
use crate::manager::SearchResult;

/// A capability detected by looking for well-known directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    /// Registry category that provides the capability.
    pub category: &'static str,
    pub reason: &'static str,
    pub dirs: &'static [&'static str],
}

pub const PROBES: &[Probe] = &[
    Probe {
        category: "monitoring",
        reason: "no monitoring stack detected",
        dirs: &["monitoring", "prometheus", "grafana"],
    },
    Probe {
        category: "logging",
        reason: "no log aggregation detected",
        dirs: &["logging", "loki", "fluentd", "fluent-bit", "elasticsearch"],
    },
    Probe {
        category: "ingress",
        reason: "no ingress controller detected",
        dirs: &["ingress", "ingress-nginx", "traefik", "contour"],
    },
    Probe {
        category: "security",
        reason: "no secrets management detected",
        dirs: &["secrets", "sealed-secrets", "external-secrets", "vault"],
    },
];

/// Subdirectories of a GitOps repository where components usually live.
const SEARCH_ROOTS: &[&str] = &["", "apps", "infrastructure", "platform", "components"];

/// Probes whose directories are absent from the project.
pub fn missing_capabilities(root: &Path) -> Vec<&'static Probe> {
    PROBES.iter().filter(|probe| !has_any_dir(root, probe.dirs)).collect()
}

fn has_any_dir(root: &Path, dirs: &[&str]) -> bool {
    SEARCH_ROOTS.iter().any(|base| {
        let base = if base.is_empty() { root.to_path_buf() } else { root.join(base) };
        dirs.iter().any(|dir| base.join(dir).is_dir())
    })
}

/// Patterns worth suggesting for one missing capability.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub category: String,
    pub reason: String,
    pub patterns: Vec<SearchResult>,
}

/// Verified first, then by rating and downloads. Installed and deprecated
/// patterns are dropped.
pub fn recommended(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results.retain(|r| !r.installed && !r.entry.deprecated);
    results.sort_by(|a, b| {
        b.entry
            .verified
            .cmp(&a.entry.verified)
            .then_with(|| by_rating(a, b))
            .then_with(|| b.entry.downloads.cmp(&a.entry.downloads))
    });
    truncate(results, limit)
}

/// Most downloaded first, rating breaks ties.
pub fn popular(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| {
        b.entry
            .downloads
            .cmp(&a.entry.downloads)
            .then_with(|| by_rating(a, b))
    });
    truncate(results, limit)
}

fn by_rating(a: &SearchResult, b: &SearchResult) -> Ordering {
    b.entry.rating.partial_cmp(&a.entry.rating).unwrap_or(Ordering::Equal)
}

fn truncate(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    if limit > 0 {
        results.truncate(limit);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PatternIndexEntry;
    use tempfile::tempdir;

    fn result(name: &str, rating: f64, downloads: u64, verified: bool) -> SearchResult {
        SearchResult {
            entry: PatternIndexEntry {
                name: name.into(),
                rating,
                downloads,
                verified,
                ..Default::default()
            },
            registry: "official".into(),
            installed: false,
        }
    }

    #[test]
    fn test_missing_capabilities() {
        let dir = tempdir().unwrap();
        assert_eq!(missing_capabilities(dir.path()).len(), PROBES.len());

        std::fs::create_dir_all(dir.path().join("infrastructure").join("loki")).unwrap();
        std::fs::create_dir_all(dir.path().join("monitoring")).unwrap();
        let missing: Vec<_> = missing_capabilities(dir.path()).iter().map(|p| p.category).collect();
        assert_eq!(missing, vec!["ingress", "security"]);
    }

    #[test]
    fn test_recommended_prefers_verified_and_skips_installed() {
        let mut installed = result("installed", 5.0, 1000, true);
        installed.installed = true;
        let results = vec![
            result("unverified", 5.0, 1000, false),
            result("verified", 4.0, 10, true),
            installed,
        ];
        let names: Vec<_> = recommended(results, 0).into_iter().map(|r| r.entry.name).collect();
        assert_eq!(names, vec!["verified", "unverified"]);
    }

    #[test]
    fn test_popular_orders_by_downloads() {
        let results = vec![
            result("a", 5.0, 10, true),
            result("b", 1.0, 500, false),
            result("c", 3.0, 100, false),
        ];
        let names: Vec<_> = popular(results, 2).into_iter().map(|r| r.entry.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }
}
