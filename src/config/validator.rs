//! Validation of the declarative resource model.
//!
//! Catches declaration mistakes before a graph is built: malformed names,
//! duplicate addresses, unusable `depends_on` entries, and settings that
//! have no effect on data resources.

use crate::addrs::{ModulePath, ResourceAddress, ResourceMode};
use crate::error::{ConfigError, InfraplanError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::model::{Config, ResourceConfig};

/// Validator for resource configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing every problem found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors.
    pub errors: Vec<ValidationError>,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// Address or field that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    /// Returns true if no errors were found.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration and collects every finding.
    #[must_use]
    pub fn check(&self, config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        if config.resource_count() == 0 {
            result.warnings.push(String::from("No resources declared in configuration"));
        }

        let mut seen_modules = HashSet::new();
        for module in &config.modules {
            if !seen_modules.insert(&module.path) {
                result.error(module.path.to_string(), "Module declared more than once");
            }

            let mut seen = HashSet::new();
            for resource in &module.resources {
                let address = resource.address(&module.path);
                if !seen.insert(address.clone()) {
                    let err = ConfigError::DuplicateResource {
                        address: address.to_string(),
                    };
                    result.error(address.to_string(), err.to_string());
                }
                Self::validate_resource(&module.path, resource, &address, &mut result);
            }
        }

        result
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error if validation fails.
    pub fn validate(&self, config: &Config) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!(warnings = result.warnings.len(), "Configuration validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(InfraplanError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    fn validate_resource(
        module: &ModulePath,
        resource: &ResourceConfig,
        address: &ResourceAddress,
        result: &mut ValidationResult,
    ) {
        let field = address.to_string();

        if !is_valid_identifier(&resource.resource_type) {
            result.error(
                &field,
                format!(
                    "Resource type '{}' is invalid. Must start with a letter and contain only \
                     letters, digits, and underscores.",
                    resource.resource_type
                ),
            );
        }

        if !is_valid_identifier(&resource.name) && !is_valid_name(&resource.name) {
            result.error(
                &field,
                format!(
                    "Resource name '{}' is invalid. Must start with a letter or underscore.",
                    resource.name
                ),
            );
        }

        if let Some(count) = &resource.count
            && count.as_str().trim().is_empty()
        {
            result.error(format!("{field}.count"), "Count expression cannot be empty");
        }

        for (i, dependency) in resource.depends_on.iter().enumerate() {
            let dep_field = format!("{field}.depends_on[{i}]");
            match ResourceAddress::parse(dependency) {
                Ok(target) => {
                    let target = ResourceAddress {
                        module: module.clone(),
                        ..target
                    };
                    if target.same_resource(address) {
                        result.error(dep_field, "A resource cannot depend on itself");
                    }
                }
                Err(err) => result.error(dep_field, err.to_string()),
            }
        }

        if resource.mode == ResourceMode::Data {
            if resource.lifecycle.prevent_destroy {
                result.warnings.push(format!(
                    "{field}: prevent_destroy has no effect on data resources"
                ));
            }
            if resource.count.is_some() && !resource.depends_on.is_empty() {
                result.warnings.push(format!(
                    "{field}: counted data resource with depends_on is always read during apply"
                ));
            }
        }
    }
}

/// Checks a type or name: a leading letter, then letters, digits, `_`.
fn is_valid_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Names additionally allow a leading underscore and dashes.
fn is_valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
