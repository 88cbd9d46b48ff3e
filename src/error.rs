//! Error types for the pattern marketplace.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by marketplace operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A registry definition is missing a required field
    #[error("invalid registry: {0}")]
    InvalidRegistry(String),

    /// A registry with the same name is already configured
    #[error("registry '{0}' already exists")]
    DuplicateRegistry(String),

    /// No registry with this name is configured
    #[error("registry '{0}' not found")]
    RegistryNotFound(String),

    /// No enabled registry publishes this pattern
    #[error("pattern '{0}' not found in any registry")]
    PatternNotFound(String),

    /// The pattern exists but not at the requested version
    #[error("version {version} not found for pattern {name}")]
    VersionNotFound { name: String, version: String },

    /// The pattern is absent from the local install state
    #[error("pattern '{0}' is not installed")]
    NotInstalled(String),

    /// The pattern is already installed and `force` was not given
    #[error("pattern '{0}' is already installed (use force to reinstall)")]
    AlreadyInstalled(String),

    /// Published versions are immutable
    #[error("{name} {version} is already published to registry '{registry}'")]
    AlreadyPublished {
        name: String,
        version: String,
        registry: String,
    },

    /// Scaffolding would overwrite an existing pattern
    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    /// The pattern does not declare support for the requested target
    #[error("pattern '{name}' is not compatible with {target}")]
    Incompatible { name: String, target: String },

    /// A registry answered with a non-success status
    #[error("registry '{registry}' returned status {status} for {url}")]
    Http {
        registry: String,
        url: String,
        status: u16,
    },

    /// The HTTP request itself failed
    #[error("request to registry '{registry}' failed: {source}")]
    Request {
        registry: String,
        #[source]
        source: reqwest::Error,
    },

    /// Reading or writing a file failed
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A YAML document could not be parsed or produced
    #[error("YAML error in {context}: {source}")]
    Yaml {
        context: String,
        #[source]
        source: serde_yaml_ng::Error,
    },

    /// The marketplace configuration file is malformed
    #[error("configuration error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    /// Pattern schema violations
    #[error("pattern validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Supplied configuration violates the pattern's schema
    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// The install-state file could not be written
    #[error("failed to persist install state to {path}: {message}")]
    State { path: PathBuf, message: String },

    /// The operation is not available for this registry or input
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn yaml(context: impl Into<String>, source: serde_yaml_ng::Error) -> Self {
        Error::Yaml {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` for errors that mean "this thing does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::RegistryNotFound(_)
                | Error::PatternNotFound(_)
                | Error::VersionNotFound { .. }
                | Error::NotInstalled(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_lists_every_violation() {
        let err = Error::Validation(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "pattern validation failed: a; b");
    }

    #[test]
    fn not_found_classification() {
        assert!(Error::NotInstalled("x".into()).is_not_found());
        assert!(Error::PatternNotFound("x".into()).is_not_found());
        assert!(!Error::Unsupported("x".into()).is_not_found());
    }
}
