//! Model id resolution.
//!
//! Turns a caller-supplied model id into a model handle. Ids that already
//! contain the registry separator are namespaced and resolved as is; plain
//! ids are prefixed with the fallback provider. Nothing is cached, so every
//! resolution reflects the latest registry snapshot.

use crate::registry::ProviderRegistry;
use pipeline_core::{EmbeddingModel, ImageModel, LanguageModel, PipelineError, PipelineResult};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Kind of model handle to resolve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    /// Chat / completion model
    Language,
    /// Embedding model
    Embedding,
    /// Image generation model
    Image,
}

impl ModelKind {
    /// Kind name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Language => "language",
            Self::Embedding => "embedding",
            Self::Image => "image",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "language" => Ok(Self::Language),
            "embedding" | "text-embedding" => Ok(Self::Embedding),
            "image" => Ok(Self::Image),
            other => Err(PipelineError::unsupported_kind(other, None)),
        }
    }
}

/// A resolved model handle of any kind
#[derive(Clone)]
pub enum ResolvedModel {
    /// Language model
    Language(Arc<dyn LanguageModel>),
    /// Embedding model
    Embedding(Arc<dyn EmbeddingModel>),
    /// Image model
    Image(Arc<dyn ImageModel>),
}

impl ResolvedModel {
    /// Kind of the handle
    #[must_use]
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Language(_) => ModelKind::Language,
            Self::Embedding(_) => ModelKind::Embedding,
            Self::Image(_) => ModelKind::Image,
        }
    }
}

impl fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (provider, model) = match self {
            Self::Language(m) => (m.provider_id(), m.model_id()),
            Self::Embedding(m) => (m.provider_id(), m.model_id()),
            Self::Image(m) => (m.provider_id(), m.model_id()),
        };
        f.debug_struct("ResolvedModel")
            .field("kind", &self.kind())
            .field("provider", &provider)
            .field("model", &model)
            .finish()
    }
}

/// Resolves model ids against a registry
#[derive(Debug, Clone)]
pub struct ModelResolver {
    registry: ProviderRegistry,
}

impl ModelResolver {
    /// Create a resolver over a registry
    #[must_use]
    pub fn new(registry: ProviderRegistry) -> Self {
        Self { registry }
    }

    /// The underlying registry
    #[must_use]
    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Whether `model_id` is already namespaced
    #[must_use]
    pub fn is_namespaced(&self, model_id: &str) -> bool {
        model_id.contains(self.registry.separator())
    }

    /// Build the fully namespaced id for a model
    #[must_use]
    pub fn namespaced_id(&self, model_id: &str, fallback_provider_id: &str) -> String {
        if self.is_namespaced(model_id) {
            model_id.to_string()
        } else {
            format!(
                "{fallback_provider_id}{}{model_id}",
                self.registry.separator()
            )
        }
    }

    /// Resolve a model of the given kind
    pub fn resolve(
        &self,
        model_id: &str,
        fallback_provider_id: &str,
        kind: ModelKind,
    ) -> PipelineResult<ResolvedModel> {
        let full_id = self.namespaced_id(model_id, fallback_provider_id);
        debug!(model = %model_id, resolved = %full_id, kind = %kind, "Resolving model");
        match kind {
            ModelKind::Language => self
                .registry
                .language_model(&full_id)
                .map(ResolvedModel::Language),
            ModelKind::Embedding => self
                .registry
                .embedding_model(&full_id)
                .map(ResolvedModel::Embedding),
            ModelKind::Image => self
                .registry
                .image_model(&full_id)
                .map(ResolvedModel::Image),
        }
    }

    /// Resolve a language model
    pub fn resolve_language_model(
        &self,
        model_id: &str,
        fallback_provider_id: &str,
    ) -> PipelineResult<Arc<dyn LanguageModel>> {
        self.registry
            .language_model(&self.namespaced_id(model_id, fallback_provider_id))
    }

    /// Resolve an embedding model
    pub fn resolve_embedding_model(
        &self,
        model_id: &str,
        fallback_provider_id: &str,
    ) -> PipelineResult<Arc<dyn EmbeddingModel>> {
        self.registry
            .embedding_model(&self.namespaced_id(model_id, fallback_provider_id))
    }

    /// Resolve an image model
    pub fn resolve_image_model(
        &self,
        model_id: &str,
        fallback_provider_id: &str,
    ) -> PipelineResult<Arc<dyn ImageModel>> {
        self.registry
            .image_model(&self.namespaced_id(model_id, fallback_provider_id))
    }
}
