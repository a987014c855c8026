//! Resource addressing and state-key resolution.
//!
//! A [`ResourceAddress`] identifies one resource (or one instance of it)
//! within a module. A [`StateKey`] is the string under which an instance
//! is stored inside its module's state. Two historical key formats coexist
//! in persisted state and both stay readable:
//!
//! - `type.name` for resources without a count
//! - `type.name.N` for counted instances
//!
//! Data resources carry a `data.` prefix so managed and data resources
//! with the same type and name never collide.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConfigError, StateError};

/// Prefix marking data resources in keys and addresses.
const DATA_PREFIX: &str = "data";

/// Prefix marking a module segment in a rendered address.
const MODULE_PREFIX: &str = "module";

/// Path of a module from the root; the root module has no segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModulePath(Vec<String>);

/// Whether a resource is managed (created and destroyed) or only read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMode {
    /// A resource whose lifecycle the plan controls.
    #[default]
    Managed,
    /// A data source, read but never created.
    Data,
}

/// Identity of a resource or of one of its instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceAddress {
    /// Module containing the resource.
    pub module: ModulePath,
    /// Managed or data.
    pub mode: ResourceMode,
    /// Resource type, e.g. `aws_instance`.
    pub resource_type: String,
    /// Resource name from the declaration.
    pub name: String,
    /// Count index; `None` when no count applies.
    pub index: Option<usize>,
}

/// Storage key of an instance within its module's state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateKey(String);

impl ModulePath {
    /// The root module.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from its segments.
    #[must_use]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Returns the path of a child module.
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    /// Returns true for the root module.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the module names from the root down.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "root");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{MODULE_PREFIX}.{segment}")?;
        }
        Ok(())
    }
}

impl fmt::Display for ResourceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Managed => "managed",
            Self::Data => "data",
        };
        write!(f, "{s}")
    }
}

impl ResourceAddress {
    /// Creates an address for a resource without an instance key.
    #[must_use]
    pub fn new(
        module: ModulePath,
        mode: ResourceMode,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            module,
            mode,
            resource_type: resource_type.into(),
            name: name.into(),
            index: None,
        }
    }

    /// Shorthand for a managed resource in the root module.
    #[must_use]
    pub fn managed(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ModulePath::root(), ResourceMode::Managed, resource_type, name)
    }

    /// Shorthand for a data resource in the root module.
    #[must_use]
    pub fn data(resource_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(ModulePath::root(), ResourceMode::Data, resource_type, name)
    }

    /// Returns the address of instance `index` of this resource.
    #[must_use]
    pub fn instance(&self, index: usize) -> Self {
        Self {
            index: Some(index),
            ..self.clone()
        }
    }

    /// Sets the instance index from a legacy signed index.
    ///
    /// Any negative index is the "no count declared" sentinel and yields an
    /// address without an index.
    #[must_use]
    pub fn with_legacy_index(self, index: i64) -> Self {
        Self {
            index: usize::try_from(index).ok(),
            ..self
        }
    }

    /// Strips the instance key.
    #[must_use]
    pub fn containing_resource(&self) -> Self {
        Self {
            index: None,
            ..self.clone()
        }
    }

    /// Returns the storage key for this address.
    #[must_use]
    pub fn state_key(&self) -> StateKey {
        let base = self.resource_name();
        match self.index {
            None => StateKey(base),
            Some(index) => StateKey(format!("{base}.{index}")),
        }
    }

    /// Returns the module-local name used by references, e.g.
    /// `aws_instance.web` or `data.aws_ami.ubuntu`.
    #[must_use]
    pub fn resource_name(&self) -> String {
        match self.mode {
            ResourceMode::Managed => format!("{}.{}", self.resource_type, self.name),
            ResourceMode::Data => {
                format!("{DATA_PREFIX}.{}.{}", self.resource_type, self.name)
            }
        }
    }

    /// Returns true if `other` is an instance of the same resource as `self`.
    #[must_use]
    pub fn same_resource(&self, other: &Self) -> bool {
        self.module == other.module
            && self.mode == other.mode
            && self.resource_type == other.resource_type
            && self.name == other.name
    }

    /// Returns true if this address is selected by an operator target.
    ///
    /// A target without an index selects every instance of the resource.
    #[must_use]
    pub fn matches_target(&self, target: &Self) -> bool {
        self.same_resource(target) && (target.index.is_none() || target.index == self.index)
    }

    /// Parses an operator-facing address such as `aws_instance.web[1]` or
    /// `module.net.data.aws_vpc.main`.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not a well-formed address.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidAddress {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut parts: Vec<&str> = input.split('.').collect();
        let mut module = ModulePath::root();
        while parts.len() > 2 && parts[0] == MODULE_PREFIX {
            module = module.child(parts[1]);
            parts.drain(..2);
        }

        let mode = if parts.len() == 3 && parts[0] == DATA_PREFIX {
            parts.remove(0);
            ResourceMode::Data
        } else {
            ResourceMode::Managed
        };

        let [resource_type, name_part] = parts.as_slice() else {
            return Err(invalid("expected <type>.<name>"));
        };

        let (name, index) = match name_part.split_once('[') {
            Some((name, rest)) => {
                let digits = rest
                    .strip_suffix(']')
                    .ok_or_else(|| invalid("unterminated index"))?;
                let index = digits
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                (name, Some(index))
            }
            None => (*name_part, None),
        };

        if resource_type.is_empty() || name.is_empty() {
            return Err(invalid("type and name must not be empty"));
        }

        Ok(Self {
            module,
            mode,
            resource_type: (*resource_type).to_string(),
            name: name.to_string(),
            index,
        })
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in self.module.segments() {
            write!(f, "{MODULE_PREFIX}.{segment}.")?;
        }
        write!(f, "{}", self.resource_name())?;
        if let Some(index) = self.index {
            write!(f, "[{index}]")?;
        }
        Ok(())
    }
}

impl StateKey {
    /// Wraps a raw key read from persisted state.
    #[must_use]
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves the key back into an address within `module`.
    ///
    /// Both `type.name` and `type.name.N` are accepted, with an optional
    /// `data.` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the key follows neither format.
    pub fn to_address(&self, module: &ModulePath) -> Result<ResourceAddress, StateError> {
        let invalid = || StateError::InvalidKey {
            key: self.0.clone(),
        };

        let mut parts: Vec<&str> = self.0.split('.').collect();
        let mode = if parts.len() > 2 && parts[0] == DATA_PREFIX {
            parts.remove(0);
            ResourceMode::Data
        } else {
            ResourceMode::Managed
        };

        let (resource_type, name, index) = match parts.as_slice() {
            [resource_type, name] => (*resource_type, *name, None),
            [resource_type, name, index] => {
                let index = index.parse::<usize>().map_err(|_| invalid())?;
                (*resource_type, *name, Some(index))
            }
            _ => return Err(invalid()),
        };

        if resource_type.is_empty() || name.is_empty() {
            return Err(invalid());
        }

        Ok(ResourceAddress {
            module: module.clone(),
            mode,
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            index,
        })
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
