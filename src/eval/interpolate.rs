//! Resolution of raw configuration values.
//!
//! The [`Interpolator`] turns the raw attribute values of a declaration into
//! a [`ResolvedConfig`] for one instance. Values that depend on something
//! not yet known are reported as unknown instead of failing.
//!
//! [`StateResolver`] is the built-in resolver: it understands
//! `${count.index}`, `${var.NAME}`, and attribute references to recorded
//! instances such as `${aws_instance.web.0.id}`. A reference to an instance
//! that has not been created yet, or to an attribute planned as computed,
//! resolves to unknown.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::addrs::{ResourceAddress, ResourceMode, StateKey};
use crate::config::{CountExpr, RawConfig};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::state::{State, UNKNOWN_VALUE};

use super::count::{CountEvaluator, CountValue};

/// Configuration of one instance after resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedConfig {
    /// Resolved values; unknown attributes hold [`UNKNOWN_VALUE`].
    pub values: BTreeMap<String, serde_json::Value>,
    /// Top-level attributes whose value is not fully known.
    pub unknown: BTreeSet<String>,
}

/// What an instance's configuration is resolved against.
#[derive(Debug, Clone, Copy)]
pub struct InstanceScope<'a> {
    /// Address of the instance being resolved.
    pub address: &'a ResourceAddress,
    /// Count index, zero when the resource has no count.
    pub count_index: usize,
    /// Recorded state of already-evaluated instances.
    pub state: &'a State,
}

/// Resolves raw configuration values for one instance.
pub trait Interpolator: Send + Sync {
    /// Resolves every attribute of `raw`.
    fn resolve(&self, raw: &RawConfig, scope: &InstanceScope<'_>) -> (ResolvedConfig, Diagnostics);
}

impl ResolvedConfig {
    /// Returns true when no attribute is unknown.
    #[must_use]
    pub fn is_wholly_known(&self) -> bool {
        self.unknown.is_empty()
    }

    /// Returns a resolved value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Returns a resolved value rendered as a flat string.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).map(flatten_value)
    }
}

impl<'a> InstanceScope<'a> {
    /// Creates a scope; a missing index counts as index zero.
    #[must_use]
    pub fn new(address: &'a ResourceAddress, state: &'a State) -> Self {
        Self {
            address,
            count_index: address.index.unwrap_or(0),
            state,
        }
    }
}

/// Result of resolving one `${...}` expression.
enum Resolved {
    Known(String),
    Unknown,
}

/// Built-in resolver backed by variables and recorded state.
#[derive(Debug, Clone, Default)]
pub struct StateResolver {
    variables: BTreeMap<String, String>,
}

impl StateResolver {
    /// Creates a resolver without variables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defines a variable readable as `${var.NAME}`.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    fn resolve_value(
        &self,
        value: &serde_json::Value,
        scope: &InstanceScope<'_>,
        diags: &mut Diagnostics,
    ) -> Option<serde_json::Value> {
        match value {
            serde_json::Value::String(s) => self
                .resolve_string(s, scope, diags)
                .map(serde_json::Value::String),
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                let mut known = true;
                for item in items {
                    match self.resolve_value(item, scope, diags) {
                        Some(v) => out.push(v),
                        None => {
                            known = false;
                            out.push(serde_json::Value::String(UNKNOWN_VALUE.to_string()));
                        }
                    }
                }
                known.then_some(serde_json::Value::Array(out))
            }
            serde_json::Value::Object(map) => {
                let mut out = serde_json::Map::new();
                let mut known = true;
                for (k, item) in map {
                    if let Some(v) = self.resolve_value(item, scope, diags) {
                        out.insert(k.clone(), v);
                    } else {
                        known = false;
                    }
                }
                known.then_some(serde_json::Value::Object(out))
            }
            other => Some(other.clone()),
        }
    }

    /// Substitutes every `${...}` segment; `None` if any is unknown.
    fn resolve_string(
        &self,
        s: &str,
        scope: &InstanceScope<'_>,
        diags: &mut Diagnostics,
    ) -> Option<String> {
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        let mut known = true;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                diags.append(
                    Diagnostic::error(format!("unterminated expression in \"{s}\""))
                        .with_address(scope.address.to_string()),
                );
                return None;
            };
            match self.resolve_expr(after[..end].trim(), scope, diags) {
                Resolved::Known(v) => out.push_str(&v),
                Resolved::Unknown => known = false,
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);

        known.then_some(out)
    }

    fn resolve_expr(&self, expr: &str, scope: &InstanceScope<'_>, diags: &mut Diagnostics) -> Resolved {
        let parts: Vec<&str> = expr.split('.').collect();
        match parts.as_slice() {
            ["count", "index"] => Resolved::Known(scope.count_index.to_string()),
            ["var", name] => {
                if let Some(value) = self.variables.get(*name) {
                    Resolved::Known(value.clone())
                } else {
                    diags.append(
                        Diagnostic::error(format!("unknown variable \"{name}\""))
                            .with_address(scope.address.to_string()),
                    );
                    Resolved::Unknown
                }
            }
            ["data", resource_type, name, rest @ ..] => {
                Self::resolve_attribute(ResourceMode::Data, resource_type, name, rest, scope)
            }
            [resource_type, name, rest @ ..] if !rest.is_empty() => {
                Self::resolve_attribute(ResourceMode::Managed, resource_type, name, rest, scope)
            }
            _ => {
                diags.append(
                    Diagnostic::error(format!("unsupported expression \"{expr}\""))
                        .with_address(scope.address.to_string()),
                );
                Resolved::Unknown
            }
        }
    }

    fn resolve_attribute(
        mode: ResourceMode,
        resource_type: &str,
        name: &str,
        rest: &[&str],
        scope: &InstanceScope<'_>,
    ) -> Resolved {
        let resource = ResourceAddress::new(scope.address.module.clone(), mode, resource_type, name);
        let (key, attribute): (StateKey, String) = match rest {
            [index, attr @ ..] if !attr.is_empty() && index.parse::<usize>().is_ok() => {
                let index = index.parse::<usize>().unwrap_or_default();
                (resource.instance(index).state_key(), attr.join("."))
            }
            ["*", ..] => return Resolved::Unknown,
            attr => (resource.state_key(), attr.join(".")),
        };

        scope
            .state
            .instance(&resource.module, &key)
            .and_then(|instance| instance.attributes.get(&attribute))
            .filter(|value| value.as_str() != UNKNOWN_VALUE)
            .map_or(Resolved::Unknown, |value| Resolved::Known(value.clone()))
    }
}

impl Interpolator for StateResolver {
    fn resolve(&self, raw: &RawConfig, scope: &InstanceScope<'_>) -> (ResolvedConfig, Diagnostics) {
        let mut diags = Diagnostics::new();
        let mut resolved = ResolvedConfig::default();

        for (key, value) in raw {
            if let Some(v) = self.resolve_value(value, scope, &mut diags) {
                resolved.values.insert(key.clone(), v);
            } else {
                resolved.unknown.insert(key.clone());
                resolved
                    .values
                    .insert(key.clone(), serde_json::Value::String(UNKNOWN_VALUE.to_string()));
            }
        }

        (resolved, diags)
    }
}

impl CountEvaluator for StateResolver {
    fn evaluate(
        &self,
        expr: &CountExpr,
        resource: &ResourceAddress,
        state: &State,
    ) -> (CountValue, Diagnostics) {
        let mut diags = Diagnostics::new();
        let scope = InstanceScope {
            address: resource,
            count_index: 0,
            state,
        };

        let Some(text) = self.resolve_string(expr.as_str().trim(), &scope, &mut diags) else {
            return (CountValue::Unknown, diags);
        };

        match text.trim().parse::<i64>() {
            Ok(n) => (CountValue::Known(n), diags),
            Err(_) => {
                diags.append(
                    Diagnostic::error(format!("count must be a whole number, got \"{text}\""))
                        .with_address(resource.to_string()),
                );
                (CountValue::Unknown, diags)
            }
        }
    }
}

/// Renders a resolved value as the flat string stored in state.
#[must_use]
pub fn flatten_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
