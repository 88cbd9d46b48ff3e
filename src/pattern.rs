use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use crate::error::{Error, Result};
use crate::util::is_path_component;

/// Schema version written into newly scaffolded patterns.
pub const API_VERSION: &str = "marketplace.gitops.io/v1";
/// The only accepted value of a pattern's `kind` field.
pub const PATTERN_KIND: &str = "Pattern";
/// File name of a pattern definition inside its source directory.
pub const PATTERN_FILE: &str = "pattern.yaml";

/// Runtime configuration values keyed by config item name.
pub type ConfigValues = BTreeMap<String, Value>;

/// A versioned bundle of infrastructure components, as stored in `pattern.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    /// Schema version tag.
    #[serde(default)]
    pub api_version: String,
    /// Must equal [`PATTERN_KIND`].
    #[serde(default)]
    pub kind: String,
    /// Descriptive metadata.
    #[serde(default)]
    pub metadata: PatternMetadata,
    /// Components, configuration schema and compatibility information.
    #[serde(default)]
    pub spec: PatternSpec,
}

/// Identifying and descriptive information of a pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatternMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
    pub license: String,
    pub tags: Vec<String>,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PatternSpec {
    /// Platforms the pattern runs on (`kubernetes`, `openshift`, ...). Empty means any.
    pub platforms: Vec<String>,
    /// GitOps tools the pattern works with (`argocd`, `flux`, ...). Empty means any.
    pub tools: Vec<String>,
    pub dependencies: Vec<Dependency>,
    pub components: Vec<Component>,
    /// Configuration schema keyed by item name.
    pub config: BTreeMap<String, ConfigItem>,
    pub validations: Vec<ValidationCheck>,
    pub docs: Vec<DocLink>,
    pub hooks: Hooks,
}

/// A reference to another pattern by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Dependency {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub optional: bool,
    pub reason: String,
}

/// One deployable unit within a pattern.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Component {
    pub name: String,
    /// Component type: `helm`, `kustomize`, `manifest`, `operator`.
    #[serde(rename = "type")]
    pub component_type: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<String>,
    pub optional: bool,
}

/// Value type of a [`ConfigItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    String,
    Integer,
    Boolean,
    Secret,
    Array,
    Object,
}

impl ConfigType {
    pub fn parse(s: &str) -> Option<ConfigType> {
        match s.to_ascii_lowercase().as_str() {
            "string" => Some(ConfigType::String),
            "integer" | "int" => Some(ConfigType::Integer),
            "boolean" | "bool" => Some(ConfigType::Boolean),
            "secret" => Some(ConfigType::Secret),
            "array" => Some(ConfigType::Array),
            "object" => Some(ConfigType::Object),
            _ => None,
        }
    }
}

/// One entry of a pattern's configuration schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigItem {
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub required: bool,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl ConfigItem {
    pub fn config_type(&self) -> Option<ConfigType> {
        ConfigType::parse(&self.item_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationCheck {
    pub name: String,
    #[serde(rename = "type")]
    pub check_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocLink {
    pub title: String,
    pub url: String,
}

/// Lifecycle hook script paths, relative to the pattern directory.
///
/// Hooks are recorded with the installation but never executed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Hooks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_install: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_install: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pre_uninstall: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_uninstall: Option<String>,
}

impl Pattern {
    /// Creates an empty pattern with the current schema version and kind.
    pub fn new(name: &str, version: &str, description: &str) -> Pattern {
        Pattern {
            api_version: API_VERSION.to_string(),
            kind: PATTERN_KIND.to_string(),
            metadata: PatternMetadata {
                name: name.to_string(),
                version: version.to_string(),
                description: description.to_string(),
                ..Default::default()
            },
            spec: PatternSpec::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// Checks the pattern against the schema rules.
    ///
    /// Every violation is collected before failing, so the returned
    /// [`Error::Validation`] lists all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.api_version.trim().is_empty() {
            errors.push("apiVersion is required".to_string());
        }
        if self.kind != PATTERN_KIND {
            errors.push(format!("kind must be '{}', got '{}'", PATTERN_KIND, self.kind));
        }
        if self.metadata.name.trim().is_empty() {
            errors.push("metadata.name is required".to_string());
        } else if !is_path_component(&self.metadata.name) {
            errors.push(format!(
                "metadata.name '{}' must not contain path separators or '..'",
                self.metadata.name
            ));
        }
        if self.metadata.version.trim().is_empty() {
            errors.push("metadata.version is required".to_string());
        } else if !is_path_component(&self.metadata.version) {
            errors.push(format!(
                "metadata.version '{}' must not contain path separators or '..'",
                self.metadata.version
            ));
        }
        if self.metadata.description.trim().is_empty() {
            errors.push("metadata.description is required".to_string());
        }
        for (i, component) in self.spec.components.iter().enumerate() {
            if component.name.trim().is_empty() {
                errors.push(format!("spec.components[{}].name is required", i));
            }
            if component.component_type.trim().is_empty() {
                errors.push(format!("spec.components[{}].type is required", i));
            }
        }
        for (i, dependency) in self.spec.dependencies.iter().enumerate() {
            if dependency.name.trim().is_empty() {
                errors.push(format!("spec.dependencies[{}].name is required", i));
            }
        }
        for (key, item) in &self.spec.config {
            if item.item_type.trim().is_empty() {
                errors.push(format!("spec.config.{}.type is required", key));
            } else if item.config_type().is_none() {
                errors.push(format!("spec.config.{} has unknown type '{}'", key, item.item_type));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }

    /// Validates operator-supplied configuration against the schema.
    ///
    /// Required items must be present. Known keys are type-checked, integers
    /// are range-checked, and string values are checked against `enum` and
    /// `pattern` constraints. Keys the schema does not declare pass through.
    pub fn validate_config(&self, supplied: &ConfigValues) -> Result<()> {
        let mut errors = Vec::new();
        for (key, item) in &self.spec.config {
            match supplied.get(key) {
                Some(value) => check_value(key, item, value, &mut errors),
                None if item.required => {
                    errors.push(format!("required config '{}' is missing", key));
                }
                None => {}
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidConfig(errors))
        }
    }

    /// Returns the schema defaults overwritten by every supplied value.
    pub fn merge_config_with_defaults(&self, supplied: &ConfigValues) -> ConfigValues {
        let mut merged: ConfigValues = self
            .spec
            .config
            .iter()
            .filter_map(|(key, item)| item.default.clone().map(|v| (key.clone(), v)))
            .collect();
        for (key, value) in supplied {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Values of `config` that differ from this pattern's defaults.
    ///
    /// These are the values an operator chose; everything else was filled in
    /// by [`Pattern::merge_config_with_defaults`].
    pub fn overrides(&self, config: &ConfigValues) -> ConfigValues {
        config
            .iter()
            .filter(|(key, value)| {
                self.spec.config.get(*key).and_then(|item| item.default.as_ref()) != Some(*value)
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    pub fn is_compatible_with_platform(&self, platform: &str) -> bool {
        contains_ignore_case(&self.spec.platforms, platform)
    }

    pub fn is_compatible_with_tool(&self, tool: &str) -> bool {
        contains_ignore_case(&self.spec.tools, tool)
    }

    /// Names of config items declared as secrets.
    pub fn secret_keys(&self) -> Vec<&str> {
        self.spec
            .config
            .iter()
            .filter(|(_, item)| item.config_type() == Some(ConfigType::Secret))
            .map(|(key, _)| key.as_str())
            .collect()
    }

    /// SHA-256 of the serialized definition, hex encoded.
    pub fn digest(&self) -> Result<String> {
        let yaml = self.to_yaml()?;
        Ok(hex::encode(Sha256::digest(yaml.as_bytes())))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| Error::yaml(format!("pattern {}", self.name()), e))
    }

    pub fn from_yaml(content: &str, context: &str) -> Result<Pattern> {
        serde_yaml_ng::from_str(content).map_err(|e| Error::yaml(context, e))
    }

    /// Writes the pattern as YAML, creating parent directories as needed.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }
        let yaml = self.to_yaml()?;
        std::fs::write(path, yaml).map_err(|e| Error::io(path, e))
    }

    /// A starter pattern used when scaffolding a new pattern directory.
    pub fn scaffold(name: &str) -> Pattern {
        let mut pattern = Pattern::new(name, "0.1.0", &format!("{} pattern", name));
        pattern.metadata.license = "Apache-2.0".to_string();
        pattern.metadata.category = "general".to_string();
        pattern.spec.platforms = vec!["kubernetes".to_string()];
        pattern.spec.tools = vec!["argocd".to_string(), "flux".to_string()];
        pattern.spec.components.push(Component {
            name: name.to_string(),
            component_type: "kustomize".to_string(),
            source: "./manifests".to_string(),
            namespace: Some(name.to_string()),
            ..Default::default()
        });
        pattern.spec.config.insert(
            "namespace".to_string(),
            ConfigItem {
                item_type: "string".to_string(),
                default: Some(Value::String(name.to_string())),
                description: "Namespace the components are deployed to".to_string(),
                ..Default::default()
            },
        );
        pattern
    }
}

/// Loads a pattern definition from a `pattern.yaml` file or a directory containing one.
pub fn load_pattern<P: AsRef<Path>>(path: P) -> Result<Pattern> {
    let path = pattern_file_path(path.as_ref());
    let content = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    Pattern::from_yaml(&content, &path.display().to_string())
}

/// Resolves a directory to its `pattern.yaml`; files are returned unchanged.
pub fn pattern_file_path(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(PATTERN_FILE)
    } else {
        path.to_path_buf()
    }
}

fn contains_ignore_case(list: &[String], needle: &str) -> bool {
    list.is_empty() || list.iter().any(|item| item.eq_ignore_ascii_case(needle))
}

fn as_integer(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
}

fn check_value(key: &str, item: &ConfigItem, value: &Value, errors: &mut Vec<String>) {
    match item.config_type() {
        Some(ConfigType::String) | Some(ConfigType::Secret) => {
            if !value.is_string() {
                errors.push(format!("config '{}' must be a string", key));
            }
        }
        Some(ConfigType::Integer) => match as_integer(value) {
            Some(n) => {
                if let Some(min) = item.min.filter(|min| n < *min) {
                    errors.push(format!("config '{}' must be >= {}, got {}", key, min, n));
                }
                if let Some(max) = item.max.filter(|max| n > *max) {
                    errors.push(format!("config '{}' must be <= {}, got {}", key, max, n));
                }
            }
            None => errors.push(format!("config '{}' must be an integer", key)),
        },
        Some(ConfigType::Boolean) => {
            if !value.is_boolean() {
                errors.push(format!("config '{}' must be a boolean", key));
            }
        }
        Some(ConfigType::Array) => {
            if !value.is_array() {
                errors.push(format!("config '{}' must be an array", key));
            }
        }
        Some(ConfigType::Object) => {
            if !value.is_object() {
                errors.push(format!("config '{}' must be an object", key));
            }
        }
        None => {}
    }

    if let Some(s) = value.as_str() {
        if !item.allowed.is_empty() && !item.allowed.iter().any(|a| a == s) {
            errors.push(format!(
                "config '{}' must be one of [{}], got '{}'",
                key,
                item.allowed.join(", "),
                s
            ));
        }
        if let Some(pattern) = &item.pattern {
            match Regex::new(pattern) {
                Ok(re) if !re.is_match(s) => {
                    errors.push(format!("config '{}' does not match pattern '{}'", key, pattern));
                }
                Ok(_) => {}
                Err(_) => errors.push(format!("config '{}' declares an invalid pattern '{}'", key, pattern)),
            }
        }
    }
}
