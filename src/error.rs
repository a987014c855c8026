//! Error types for the infraplan planning core.
//!
//! This module provides the error hierarchy for every stage of a planning
//! run: configuration resolution, provider calls, count expansion, graph
//! construction, and state persistence.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the planning core.
#[derive(Debug, Error)]
pub enum InfraplanError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Provider call errors, tagged with the instance being planned.
    #[error("Provider error for {address}: {source}")]
    Provider {
        /// Address of the instance whose provider call failed.
        address: String,
        /// Underlying provider error.
        #[source]
        source: ProviderError,
    },

    /// A destroy was planned for a resource guarded by `prevent_destroy`.
    #[error(
        "{address}: the plan would destroy this resource, but it currently has \
         lifecycle.prevent_destroy set to true. To avoid this error and continue \
         with the plan, either disable lifecycle.prevent_destroy or adjust the \
         scope of the plan using targets"
    )]
    PreventDestroy {
        /// Address of the guarded instance.
        address: String,
    },

    /// Count evaluation errors.
    #[error("Count error: {0}")]
    Count(#[from] CountError),

    /// Graph construction or validation errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file was not found.
    #[error("Settings file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The settings file could not be parsed.
    #[error("Failed to parse settings: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Resolving the raw configuration of an instance failed.
    #[error("{address}: failed to resolve configuration: {message}")]
    Interpolation {
        /// Address of the instance.
        address: String,
        /// Description of the failure.
        message: String,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field or address that failed validation.
        field: Option<String>,
    },

    /// Duplicate resource declaration.
    #[error("Duplicate resource declaration: {address}")]
    DuplicateResource {
        /// The duplicated address.
        address: String,
    },

    /// A node needed its resource declaration but none was attached.
    #[error("{address}: no configuration attached")]
    MissingConfig {
        /// Address of the node.
        address: String,
    },

    /// An address or target string could not be parsed.
    #[error("Invalid address '{input}': {reason}")]
    InvalidAddress {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors reported by or about providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No provider is registered under the resolved name.
    #[error("Provider {name} is not registered")]
    NotFound {
        /// Resolved provider name.
        name: String,
    },

    /// The provider rejected or failed a call.
    #[error("{operation} failed: {message}")]
    CallFailed {
        /// Provider operation (diff, read_data_diff, ...).
        operation: String,
        /// Description of the failure.
        message: String,
    },
}

/// Count expression errors.
#[derive(Debug, Error)]
pub enum CountError {
    /// The count expression could not be evaluated.
    #[error("{resource} in module {module}: failed to evaluate count \"{expression}\": {message}")]
    Evaluation {
        /// Address of the resource declaring the count.
        resource: String,
        /// Module path.
        module: String,
        /// Raw expression text.
        expression: String,
        /// Description of the failure.
        message: String,
    },

    /// The count expression produced a negative number.
    #[error("{resource} in module {module}: count \"{expression}\" evaluated to {value}, must be >= 0")]
    Negative {
        /// Address of the resource declaring the count.
        resource: String,
        /// Module path.
        module: String,
        /// Raw expression text.
        expression: String,
        /// The rejected value.
        value: i64,
    },
}

/// Graph construction and validation errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The graph contains a dependency cycle.
    #[error("{graph}: cycle detected involving {node}")]
    CycleDetected {
        /// Graph name.
        graph: String,
        /// A node that is part of the cycle.
        node: String,
    },

    /// The graph has no synthetic root.
    #[error("{graph}: no root found")]
    NoRoot {
        /// Graph name.
        graph: String,
    },

    /// The graph has more than one root.
    #[error("{graph}: expected exactly one root, found {count}")]
    MultipleRoots {
        /// Graph name.
        graph: String,
        /// Number of roots found.
        count: usize,
    },

    /// A node cannot be reached from the root.
    #[error("{graph}: {node} is not reachable from the root")]
    Unreachable {
        /// Graph name.
        graph: String,
        /// Unreachable node.
        node: String,
    },

    /// A node depends on itself.
    #[error("{graph}: {node} depends on itself")]
    SelfReference {
        /// Graph name.
        graph: String,
        /// Offending node.
        node: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// A state key does not follow either supported format.
    #[error("Invalid state key: {key}")]
    InvalidKey {
        /// The rejected key.
        key: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Writing the state file failed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: u32,
        /// Found state version.
        found: u32,
    },
}

/// Result type alias for planning operations.
pub type Result<T> = std::result::Result<T, InfraplanError>;

impl InfraplanError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Wraps a provider error with the address of the instance being planned.
    #[must_use]
    pub fn provider(address: impl Into<String>, source: ProviderError) -> Self {
        Self::Provider {
            address: address.into(),
            source,
        }
    }

    /// Returns the resource address this error is about, if it names one.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Provider { address, .. } | Self::PreventDestroy { address } => Some(address),
            Self::Config(
                ConfigError::Interpolation { address, .. }
                | ConfigError::DuplicateResource { address }
                | ConfigError::MissingConfig { address },
            ) => Some(address),
            Self::Config(ConfigError::ValidationError { field, .. }) => field.as_deref(),
            Self::Count(
                CountError::Evaluation { resource, .. } | CountError::Negative { resource, .. },
            ) => Some(resource),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field or address.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }

    /// Creates an interpolation error for an instance.
    #[must_use]
    pub fn interpolation(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Interpolation {
            address: address.into(),
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a call failure for the named provider operation.
    #[must_use]
    pub fn call_failed(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CallFailed {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl StateError {
    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }
}
