//! Lookup of providers by name.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;

use super::ResourceProvider;

/// Providers available to a planning run, keyed by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn ResourceProvider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Builder form of [`Self::register`].
    #[must_use]
    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn ResourceProvider>) -> Self {
        self.register(name, provider);
        self
    }

    /// Returns the provider registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if no provider has that name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn ResourceProvider>, ProviderError> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                name: name.to_string(),
            })
    }

    /// Returns the registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}
