//! # Patterns Core Library
//!
//! This crate contains the core logic of the `patterns` tool – a marketplace for reusable
//! GitOps patterns (bundles of deployable infrastructure components).
//!
//! Patterns are discovered in one or more prioritized registries (a local directory or a
//! remote HTTP endpoint publishing an `index.yaml`), fetched as `pattern.yaml` definitions,
//! and recorded per project in `.marketplace/installed.yaml`.
//!
//! This library is built for the `patterns` CLI, but every front-end is expected to go
//! through [`Marketplace`].
//!
//! ## Modules Overview
//! - [`pattern`] – Pattern definitions, schema validation and configuration merging
//! - [`registry`] – Registry sources, index format and the fetching client
//! - [`manager`] – Prioritized registry set with search, lookup and categories
//! - [`state`] – The persisted install state
//! - [`installer`] – Install, update and uninstall transitions, dependencies and conflicts
//! - [`suggest`] – Recommendation views and project probes
//! - [`marketplace`] – The facade composing all of the above
//! - [`config`] – User configuration (`marketplace.toml`)
//! - [`global`] – Per-user directories and the registry index cache
//! - [`util`] – Shared helpers (versions, atomic writes, copying)

pub mod error;
pub mod pattern;
pub mod registry;
pub mod manager;
pub mod state;
pub mod installer;
pub mod suggest;
pub mod marketplace;
pub mod config;
pub mod util;
pub mod global;

pub use error::{Error, Result};
pub use pattern::*;
pub use registry::*;
pub use manager::*;
pub use state::*;
pub use installer::*;
pub use marketplace::*;
pub use config::*;
pub use global::cache::*;
