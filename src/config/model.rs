//! Declarative resource model.
//!
//! These types describe the desired configuration after it has been read
//! from source: one [`ResourceConfig`] per declared resource, grouped by
//! module. Attribute values are kept raw; resolving them against known
//! values is the job of the interpolation collaborator.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::addrs::{ModulePath, ResourceAddress, ResourceMode};

/// Raw, unresolved attribute values of a resource declaration.
pub type RawConfig = BTreeMap<String, serde_json::Value>;

/// Reference roots that never name a resource.
const NON_RESOURCE_ROOTS: &[&str] = &[
    "var", "count", "self", "path", "module", "local", "terraform", "each",
];

/// The complete desired configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Modules, the root module included.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

/// Resources declared in one module.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModuleConfig {
    /// Path of the module; empty for the root.
    #[serde(default)]
    pub path: ModulePath,
    /// Declared resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Managed or data.
    #[serde(default)]
    pub mode: ResourceMode,
    /// Resource type, e.g. `aws_instance`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Resource name.
    pub name: String,
    /// Explicit provider name; defaults to the type prefix.
    #[serde(default)]
    pub provider: Option<String>,
    /// Count expression, if the resource is count-parameterized.
    #[serde(default)]
    pub count: Option<CountExpr>,
    /// Explicit ordering dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Lifecycle settings.
    #[serde(default)]
    pub lifecycle: Lifecycle,
    /// Raw attribute values.
    #[serde(default)]
    pub config: RawConfig,
}

/// Lifecycle settings of a resource.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lifecycle {
    /// Fail any plan that would destroy an instance of this resource.
    #[serde(default)]
    pub prevent_destroy: bool,
}

/// Raw text of a count expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountExpr(String);

impl Config {
    /// Creates a configuration holding only a root module.
    #[must_use]
    pub fn with_root(resources: Vec<ResourceConfig>) -> Self {
        Self {
            modules: vec![ModuleConfig {
                path: ModulePath::root(),
                resources,
            }],
        }
    }

    /// Iterates over every declaration with its module path.
    pub fn resources(&self) -> impl Iterator<Item = (&ModulePath, &ResourceConfig)> {
        self.modules
            .iter()
            .flat_map(|m| m.resources.iter().map(move |r| (&m.path, r)))
    }

    /// Returns the total number of declared resources.
    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.modules.iter().map(|m| m.resources.len()).sum()
    }
}

impl ResourceConfig {
    /// Creates a managed resource declaration.
    #[must_use]
    pub fn managed(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: ResourceMode::Managed,
            resource_type: resource_type.into(),
            name: name.into(),
            provider: None,
            count: None,
            depends_on: Vec::new(),
            lifecycle: Lifecycle::default(),
            config: RawConfig::new(),
        }
    }

    /// Creates a data resource declaration.
    #[must_use]
    pub fn data(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: ResourceMode::Data,
            ..Self::managed(resource_type, name)
        }
    }

    /// Sets the count expression.
    #[must_use]
    pub fn with_count(mut self, expr: impl Into<String>) -> Self {
        self.count = Some(CountExpr::new(expr));
        self
    }

    /// Sets one raw attribute.
    #[must_use]
    pub fn with_attr(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Adds an explicit ordering dependency.
    #[must_use]
    pub fn with_depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.depends_on.push(dependency.into());
        self
    }

    /// Enables `prevent_destroy`.
    #[must_use]
    pub const fn with_prevent_destroy(mut self) -> Self {
        self.lifecycle.prevent_destroy = true;
        self
    }

    /// Returns the resource address (no instance key) within `module`.
    #[must_use]
    pub fn address(&self, module: &ModulePath) -> ResourceAddress {
        ResourceAddress::new(module.clone(), self.mode, &self.resource_type, &self.name)
    }

    /// Returns the provider name: the explicit one, or the type prefix
    /// (`aws_instance` is served by `aws`).
    #[must_use]
    pub fn provider_name(&self) -> String {
        self.provider.clone().unwrap_or_else(|| {
            self.resource_type
                .split_once('_')
                .map_or_else(|| self.resource_type.clone(), |(prefix, _)| prefix.to_string())
        })
    }

    /// Returns everything this declaration depends on: explicit
    /// `depends_on` entries plus resources referenced from `${...}`
    /// expressions in its raw attributes, sorted and deduplicated.
    #[must_use]
    pub fn references(&self) -> Vec<String> {
        let mut refs: BTreeSet<String> = self.depends_on.iter().cloned().collect();
        for value in self.config.values() {
            collect_value_references(value, &mut refs);
        }
        refs.into_iter().collect()
    }
}

impl CountExpr {
    /// Wraps raw expression text.
    #[must_use]
    pub fn new(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    /// Returns the raw expression text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CountExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Walks a raw value and collects resource references.
fn collect_value_references(value: &serde_json::Value, refs: &mut BTreeSet<String>) {
    match value {
        serde_json::Value::String(s) => collect_string_references(s, refs),
        serde_json::Value::Array(items) => {
            for item in items {
                collect_value_references(item, refs);
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values() {
                collect_value_references(item, refs);
            }
        }
        _ => {}
    }
}

/// Extracts resource references from every `${...}` segment of a string.
fn collect_string_references(s: &str, refs: &mut BTreeSet<String>) {
    let mut rest = s;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return;
        };
        let expr = &after[..end];
        for token in expr.split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '*'))) {
            if let Some(reference) = resource_reference(token) {
                refs.insert(reference);
            }
        }
        rest = &after[end + 1..];
    }
}

/// Turns a traversal such as `aws_instance.web.0.id` into the referenced
/// resource or instance name (`aws_instance.web.0`).
fn resource_reference(token: &str) -> Option<String> {
    let parts: Vec<&str> = token.split('.').filter(|p| !p.is_empty()).collect();
    let (prefix, rest) = match parts.as_slice() {
        ["data", rest @ ..] => ("data.", rest),
        [first, ..] if NON_RESOURCE_ROOTS.contains(first) => return None,
        rest => ("", rest),
    };

    let [resource_type, name, tail @ ..] = rest else {
        return None;
    };
    if !resource_type.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return None;
    }

    match tail.first() {
        Some(index) if index.parse::<usize>().is_ok() => {
            Some(format!("{prefix}{resource_type}.{name}.{index}"))
        }
        _ => Some(format!("{prefix}{resource_type}.{name}")),
    }
}
