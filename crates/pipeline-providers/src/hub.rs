//! Hub provider.
//!
//! A hub is registered under its own id and routes ids of the form
//! `hub>provider>model` to another provider in the same registry. It holds a
//! weak registry handle so registering a hub does not create a reference
//! cycle.

use crate::registry::{ProviderRegistry, WeakProviderRegistry};
use pipeline_core::{
    EmbeddingModel, ImageModel, LanguageModel, PipelineError, PipelineResult, Provider,
};
use std::sync::Arc;
use tracing::debug;

/// Provider that delegates `provider>model` ids to other registered providers
#[derive(Debug, Clone)]
pub struct HubProvider {
    hub_id: String,
    registry: WeakProviderRegistry,
}

impl HubProvider {
    /// Create a hub over `registry`
    #[must_use]
    pub fn new(hub_id: impl Into<String>, registry: &ProviderRegistry) -> Self {
        Self {
            hub_id: hub_id.into(),
            registry: registry.downgrade(),
        }
    }

    /// Create a hub and register it under its id
    pub fn install(hub_id: impl Into<String>, registry: &ProviderRegistry) -> PipelineResult<()> {
        let hub = Self::new(hub_id, registry);
        let id = hub.hub_id.clone();
        registry.register(id, Arc::new(hub))
    }

    /// Hub id
    #[must_use]
    pub fn hub_id(&self) -> &str {
        &self.hub_id
    }

    fn target(&self, model_id: &str) -> PipelineResult<(Arc<dyn Provider>, String)> {
        let registry = self
            .registry
            .upgrade()
            .ok_or_else(|| PipelineError::hub(&self.hub_id, "registry has been dropped"))?;

        let parts: Vec<&str> = model_id.split(registry.separator()).collect();
        let [provider_id, actual_model] = parts.as_slice() else {
            return Err(PipelineError::hub(
                &self.hub_id,
                format!(
                    "invalid hub model id '{model_id}', expected 'provider{}model'",
                    registry.separator()
                ),
            ));
        };
        if provider_id.is_empty() || actual_model.is_empty() {
            return Err(PipelineError::hub(
                &self.hub_id,
                format!("invalid hub model id '{model_id}'"),
            ));
        }
        if *provider_id == self.hub_id {
            return Err(PipelineError::hub(&self.hub_id, "hub cannot route to itself"));
        }

        let provider = registry.get_provider(provider_id).ok_or_else(|| {
            PipelineError::hub(
                &self.hub_id,
                format!("provider '{provider_id}' is not registered"),
            )
        })?;
        debug!(hub = %self.hub_id, provider = %provider_id, model = %actual_model, "Hub routing");
        Ok((provider, (*actual_model).to_string()))
    }
}

impl Provider for HubProvider {
    fn language_model(&self, model_id: &str) -> PipelineResult<Arc<dyn LanguageModel>> {
        let (provider, model) = self.target(model_id)?;
        provider.language_model(&model)
    }

    fn embedding_model(&self, model_id: &str) -> PipelineResult<Arc<dyn EmbeddingModel>> {
        let (provider, model) = self.target(model_id)?;
        provider.embedding_model(&model)
    }

    fn image_model(&self, model_id: &str) -> PipelineResult<Arc<dyn ImageModel>> {
        let (provider, model) = self.target(model_id)?;
        provider.image_model(&model)
    }
}
