use std::path::PathBuf;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct CLI {
    /// Path to `marketplace.toml`. Defaults to the user config directory
    #[clap(long, global = true)]
    pub(crate) config: Option<PathBuf>,
    /// Project directory holding `.marketplace/`. Defaults to the current directory
    #[clap(long, global = true)]
    pub(crate) project: Option<PathBuf>,
    /// Enable debug logging
    #[clap(short, long, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: PatternsCommand,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum PatternsCommand {
    /// Search all registries. An empty query lists everything
    Search {
        query: Option<String>,
        #[clap(long)]
        category: Option<String>,
        /// Only show patterns carrying this tag (repeatable)
        #[clap(long = "tag")]
        tags: Vec<String>,
        #[clap(long, default_value_t = 0)]
        limit: usize,
        /// Only show verified patterns
        #[clap(long)]
        verified: bool,
    },
    /// Show the full definition of a pattern
    Info {
        name: String,
    },
    /// Install a pattern into the project
    Install {
        name: String,
        #[clap(long)]
        version: Option<String>,
        /// Configuration value: key=value (repeatable)
        #[clap(long = "set")]
        values: Vec<String>,
        /// Target environment (repeatable)
        #[clap(long = "env")]
        environments: Vec<String>,
        #[clap(long)]
        force: bool,
        #[clap(long)]
        dry_run: bool,
        /// Also install missing required dependencies
        #[clap(long)]
        with_deps: bool,
        #[clap(long)]
        platform: Option<String>,
        #[clap(long)]
        tool: Option<String>,
    },
    /// Update an installed pattern to a newer version
    Update {
        name: String,
        #[clap(long)]
        version: Option<String>,
        #[clap(long = "set")]
        values: Vec<String>,
        #[clap(long)]
        dry_run: bool,
    },
    /// Uninstall a pattern
    Uninstall {
        name: String,
        /// Keep the files written for the pattern
        #[clap(long)]
        keep_files: bool,
    },
    /// List installed patterns
    List,
    /// Show installed patterns with their latest available versions
    Status,
    /// List installed patterns with updates available
    Outdated,
    /// Manage registries
    Registry {
        #[command(subcommand)]
        command: RegistryCommand,
    },
    /// List pattern categories across registries
    Categories,
    /// Scaffold a new pattern directory
    Create {
        name: String,
        #[clap(long, default_value = ".")]
        dir: PathBuf,
    },
    /// Validate a pattern definition
    Validate {
        path: PathBuf,
    },
    /// Publish a pattern to a local registry
    Publish {
        path: PathBuf,
        #[clap(long)]
        registry: String,
    },
    /// Show the dependency tree of a pattern
    Deps {
        name: String,
    },
    /// Show installed patterns that conflict with a pattern
    Conflicts {
        name: String,
    },
    /// Recommended patterns not installed yet
    Recommend {
        #[clap(long, default_value_t = 10)]
        limit: usize,
    },
    /// Most downloaded patterns
    Popular {
        #[clap(long, default_value_t = 10)]
        limit: usize,
    },
    /// Suggest patterns for capabilities the project seems to lack
    Suggest {
        #[clap(long, default_value_t = 3)]
        limit: usize,
    },
    /// Export registries and installed patterns to a YAML file
    Export {
        path: PathBuf,
    },
    /// Import registries and patterns from an export file
    Import {
        path: PathBuf,
        #[clap(long)]
        force: bool,
    },
    /// Print install statistics as JSON
    Metrics,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum RegistryCommand {
    /// Add a registry. For local registries URL is a directory
    Add {
        name: String,
        url: String,
        #[clap(long = "type", value_enum, default_value_t = RegistryKind::Community)]
        kind: RegistryKind,
        #[clap(long, default_value_t = 0)]
        priority: i32,
        /// Bearer token sent with every request
        #[clap(long)]
        token: Option<String>,
    },
    /// Remove a registry
    Remove {
        name: String,
    },
    /// List registries in search order
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RegistryKind {
    Official,
    Community,
    Private,
    Local,
}
