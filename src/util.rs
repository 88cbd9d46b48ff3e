use std::io::Write;
use std::path::{Component, Path, PathBuf};
use semver::Version;
use tempfile::NamedTempFile;
use walkdir::WalkDir;
use crate::error::{Error, Result};

/// Parses a version string as SemVer, tolerating a leading `v`.
pub fn parse_version(version: &str) -> Option<Version> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    Version::parse(version).ok()
}

/// Returns the highest version of the list.
///
/// SemVer versions are compared numerically. If none of the versions parse,
/// the last listed version is taken as the newest.
pub fn latest_version(versions: &[String]) -> Option<String> {
    versions
        .iter()
        .filter_map(|v| parse_version(v).map(|parsed| (parsed, v)))
        .max_by(|(a, _), (b, _)| a.cmp(b))
        .map(|(_, v)| v.clone())
        .or_else(|| versions.last().cloned())
}

/// Whether `candidate` is newer than `current`.
///
/// Falls back to plain inequality when either side is not SemVer.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    match (parse_version(candidate), parse_version(current)) {
        (Some(candidate), Some(current)) => candidate > current,
        _ => !candidate.is_empty() && candidate != current,
    }
}

/// Whether `name` can be used as exactly one directory name.
///
/// Pattern, version and registry names become path segments, so anything
/// that could step out of its parent or nest deeper is rejected.
pub fn is_path_component(name: &str) -> bool {
    if name.trim().is_empty() || name.contains(['/', '\\']) || name.contains("..") {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Replaces `path` with `content` by writing a sibling temp file and renaming it.
pub fn write_atomic<P: AsRef<Path>>(path: P, content: &[u8]) -> std::io::Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let mut file = NamedTempFile::new_in(&parent)?;
    file.write_all(content)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Recursively copies a directory, returning the files written.
pub fn copy_dir<P: AsRef<Path>, Q: AsRef<Path>>(src: P, dest: Q) -> Result<Vec<PathBuf>> {
    let src = src.as_ref();
    let dest = dest.as_ref();
    let mut written = Vec::new();
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
            Error::io(path, std::io::Error::other(e.to_string()))
        })?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            std::fs::copy(entry.path(), &target).map_err(|e| Error::io(&target, e))?;
            written.push(target);
        }
    }
    Ok(written)
}
