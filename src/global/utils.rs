use std::path::PathBuf;
use crate::error::{Error, Result};
use directories::ProjectDirs;

pub fn get_global_config_dir() -> Result<PathBuf> {
    let (config_dir, _) = get_global_dirs()?;
    Ok(config_dir)
}

pub fn get_global_cache_dir() -> Result<PathBuf> {
    let (_, cache_dir) = get_global_dirs()?;
    Ok(cache_dir)
}

/// Returns the `(config, cache)` directories for the current user.
pub fn get_global_dirs() -> Result<(PathBuf, PathBuf)> {
    let proj_dirs = ProjectDirs::from("io", "gitops", "patterns")
        .ok_or_else(|| Error::Unsupported("could not determine the home directory".to_string()))?;

    let config_dir = proj_dirs.config_dir().to_path_buf();
    let cache_dir = proj_dirs.cache_dir().to_path_buf();

    Ok((config_dir, cache_dir))
}
