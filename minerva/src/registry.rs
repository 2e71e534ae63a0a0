use crate::providers::{
    DeepSeekAdapter, GeminiAdapter, OpenAiCompatibleAdapter, ProviderAdapter, ProviderError,
    ProviderKind,
};
use crate::types::ConnectionConfig;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds an adapter for one connection.
pub type AdapterFactory = fn(ConnectionConfig) -> Result<Arc<dyn ProviderAdapter>, ProviderError>;

/// Maps provider identifiers to adapter constructors.
#[derive(Clone)]
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

fn openai_compatible(config: ConnectionConfig) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    Ok(Arc::new(OpenAiCompatibleAdapter::new(config)?))
}

fn gemini(config: ConnectionConfig) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    Ok(Arc::new(GeminiAdapter::new(config)?))
}

fn deepseek(config: ConnectionConfig) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    Ok(Arc::new(DeepSeekAdapter::new(config)?))
}

impl AdapterRegistry {
    /// A registry without any providers.
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Every built-in provider, plus `openai` as an alias of `v1`.
    pub fn builtin() -> Self {
        Self::empty()
            .with_adapter(ProviderKind::OpenAiCompatible.id(), openai_compatible)
            .with_adapter("openai", openai_compatible)
            .with_adapter(ProviderKind::Gemini.id(), gemini)
            .with_adapter(ProviderKind::DeepSeek.id(), deepseek)
    }

    /// Register (or replace) the factory for `id`. Ids are case-insensitive.
    pub fn with_adapter(mut self, id: &str, factory: AdapterFactory) -> Self {
        self.factories.insert(normalize(id), factory);
        self
    }

    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(&normalize(id))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Construct the adapter registered for `config.provider`.
    pub fn create(&self, config: ConnectionConfig) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
        let id = normalize(&config.provider);
        let factory = self
            .factories
            .get(&id)
            .ok_or_else(|| ProviderError::Config(format!("Unknown provider: {}", config.provider)))?;
        tracing::debug!(provider = %id, "creating adapter");
        factory(config)
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn normalize(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

/// Construct an adapter with the built-in registry.
pub fn create_adapter(config: ConnectionConfig) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    AdapterRegistry::builtin().create(config)
}
