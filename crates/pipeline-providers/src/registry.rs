//! Provider registry.
//!
//! Maps provider ids to provider instances. Every mutation builds a new
//! immutable [`RegistrySnapshot`] while holding a single writer lock, then
//! swaps it in atomically. Lookups load the current snapshot without locking,
//! so a reader sees either all of a batch registration or none of it.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use pipeline_core::{
    EmbeddingModel, ImageModel, LanguageModel, PipelineError, PipelineResult, Provider,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Default namespace separator
pub const DEFAULT_SEPARATOR: &str = ">";

/// A registered provider
#[derive(Clone)]
pub struct ProviderEntry {
    /// Registry id
    pub id: String,
    /// Provider instance
    pub instance: Arc<dyn Provider>,
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry").field("id", &self.id).finish()
    }
}

/// Immutable view of the registry at one version
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    version: u64,
    entries: Vec<ProviderEntry>,
    index: HashMap<String, usize>,
}

impl RegistrySnapshot {
    fn build(version: u64, entries: Vec<ProviderEntry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| (entry.id.clone(), pos))
            .collect();
        Self {
            version,
            entries,
            index,
        }
    }

    /// Snapshot version, bumped by every mutation
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Entries in registration order
    #[must_use]
    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    /// Look up an entry by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ProviderEntry> {
        self.index.get(id).map(|&pos| &self.entries[pos])
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct RegistryInner {
    separator: String,
    snapshot: ArcSwap<RegistrySnapshot>,
    write_lock: Mutex<()>,
}

/// Registry of providers addressed by id.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct ProviderRegistry {
    inner: Arc<RegistryInner>,
}

impl ProviderRegistry {
    /// Create an empty registry using `>` as separator
    #[must_use]
    pub fn new() -> Self {
        Self::build(DEFAULT_SEPARATOR.to_string())
    }

    /// Create an empty registry with a custom separator.
    ///
    /// The separator cannot be changed afterwards.
    pub fn with_separator(separator: impl Into<String>) -> PipelineResult<Self> {
        let separator = separator.into();
        if separator.is_empty() {
            return Err(PipelineError::Configuration(
                "registry separator must not be empty".to_string(),
            ));
        }
        Ok(Self::build(separator))
    }

    fn build(separator: String) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                separator,
                snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
                write_lock: Mutex::new(()),
            }),
        }
    }

    /// The namespace separator
    #[must_use]
    pub fn separator(&self) -> &str {
        &self.inner.separator
    }

    /// Load the current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.inner.snapshot.load_full()
    }

    /// Current snapshot version
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.snapshot.load().version
    }

    fn mutate<F>(&self, apply: F) -> u64
    where
        F: FnOnce(&mut Vec<ProviderEntry>),
    {
        let _guard = self.inner.write_lock.lock();
        let current = self.inner.snapshot.load();
        let mut entries = current.entries.clone();
        apply(&mut entries);
        let version = current.version + 1;
        self.inner
            .snapshot
            .store(Arc::new(RegistrySnapshot::build(version, entries)));
        version
    }

    fn upsert(entries: &mut Vec<ProviderEntry>, id: String, instance: Arc<dyn Provider>) {
        if let Some(existing) = entries.iter_mut().find(|e| e.id == id) {
            existing.instance = instance;
        } else {
            entries.push(ProviderEntry { id, instance });
        }
    }

    fn check_id(&self, id: &str) -> PipelineResult<()> {
        if id.is_empty() || id.contains(self.separator()) {
            return Err(PipelineError::invalid_model_id(
                id,
                format!(
                    "provider ids must be non-empty and must not contain '{}'",
                    self.separator()
                ),
            ));
        }
        Ok(())
    }

    /// Register a provider, replacing any provider with the same id
    pub fn register(
        &self,
        id: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> PipelineResult<()> {
        let id = id.into();
        self.check_id(&id)?;
        let version = self.mutate(|entries| Self::upsert(entries, id.clone(), provider));
        info!(provider = %id, version, "Provider registered");
        Ok(())
    }

    /// Register several providers as one atomic update
    pub fn register_batch<I, S>(&self, providers: I) -> PipelineResult<()>
    where
        I: IntoIterator<Item = (S, Arc<dyn Provider>)>,
        S: Into<String>,
    {
        let providers: Vec<(String, Arc<dyn Provider>)> = providers
            .into_iter()
            .map(|(id, provider)| (id.into(), provider))
            .collect();
        for (id, _) in &providers {
            self.check_id(id)?;
        }

        let count = providers.len();
        let version = self.mutate(|entries| {
            for (id, provider) in providers {
                Self::upsert(entries, id, provider);
            }
        });
        info!(count, version, "Provider batch registered");
        Ok(())
    }

    /// Remove a provider. Returns whether it was registered.
    pub fn unregister(&self, id: &str) -> bool {
        if self.inner.snapshot.load().get(id).is_none() {
            return false;
        }
        let mut removed = false;
        let version = self.mutate(|entries| {
            let before = entries.len();
            entries.retain(|e| e.id != id);
            removed = entries.len() != before;
        });
        if removed {
            info!(provider = %id, version, "Provider unregistered");
        }
        removed
    }

    /// Remove every provider
    pub fn clear(&self) {
        let version = self.mutate(Vec::clear);
        info!(version, "Provider registry cleared");
    }

    /// Get a provider instance by id
    pub fn get_provider(&self, id: &str) -> Option<Arc<dyn Provider>> {
        self.inner
            .snapshot
            .load()
            .get(id)
            .map(|entry| Arc::clone(&entry.instance))
    }

    /// Whether any provider is registered
    #[must_use]
    pub fn has_providers(&self) -> bool {
        !self.inner.snapshot.load().is_empty()
    }

    /// Registered ids in registration order
    #[must_use]
    pub fn list_ids(&self) -> Vec<String> {
        self.inner
            .snapshot
            .load()
            .entries
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }

    /// Number of registered providers
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.snapshot.load().entries.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_providers()
    }

    /// Weak handle that does not keep the registry alive
    #[must_use]
    pub fn downgrade(&self) -> WeakProviderRegistry {
        WeakProviderRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Split a namespaced id into provider and model on the first separator
    pub fn split_id<'a>(&self, namespaced_id: &'a str) -> PipelineResult<(&'a str, &'a str)> {
        match namespaced_id.split_once(self.separator()) {
            Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
                Ok((provider, model))
            }
            Some(_) => Err(PipelineError::invalid_model_id(
                namespaced_id,
                "provider and model parts must be non-empty",
            )),
            None => Err(PipelineError::invalid_model_id(
                namespaced_id,
                format!("expected 'provider{}model'", self.separator()),
            )),
        }
    }

    fn lookup<'a>(&self, namespaced_id: &'a str) -> PipelineResult<(ProviderEntry, &'a str)> {
        let snapshot = self.inner.snapshot.load();
        if snapshot.is_empty() {
            return Err(PipelineError::NoProviders);
        }
        let (provider_id, model_id) = self.split_id(namespaced_id)?;
        let entry = snapshot
            .get(provider_id)
            .cloned()
            .ok_or_else(|| PipelineError::ProviderNotFound(provider_id.to_string()))?;
        debug!(
            provider = %provider_id,
            model = %model_id,
            version = snapshot.version,
            "Resolved provider"
        );
        Ok((entry, model_id))
    }

    fn tag_provider(err: PipelineError, provider_id: &str) -> PipelineError {
        match err {
            PipelineError::UnsupportedModelKind {
                kind,
                provider: None,
            } => PipelineError::unsupported_kind(kind, Some(provider_id.to_string())),
            other => other,
        }
    }

    /// Get a language model for `provider>model`
    pub fn language_model(&self, namespaced_id: &str) -> PipelineResult<Arc<dyn LanguageModel>> {
        let (entry, model_id) = self.lookup(namespaced_id)?;
        entry
            .instance
            .language_model(model_id)
            .map_err(|e| Self::tag_provider(e, &entry.id))
    }

    /// Get an embedding model for `provider>model`
    pub fn embedding_model(&self, namespaced_id: &str) -> PipelineResult<Arc<dyn EmbeddingModel>> {
        let (entry, model_id) = self.lookup(namespaced_id)?;
        entry
            .instance
            .embedding_model(model_id)
            .map_err(|e| Self::tag_provider(e, &entry.id))
    }

    /// Get an image model for `provider>model`
    pub fn image_model(&self, namespaced_id: &str) -> PipelineResult<Arc<dyn ImageModel>> {
        let (entry, model_id) = self.lookup(namespaced_id)?;
        entry
            .instance
            .image_model(model_id)
            .map_err(|e| Self::tag_provider(e, &entry.id))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("separator", &self.inner.separator)
            .field("providers", &self.list_ids())
            .field("version", &self.version())
            .finish()
    }
}

/// Non-owning handle to a [`ProviderRegistry`]
#[derive(Clone)]
pub struct WeakProviderRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakProviderRegistry {
    /// Upgrade to a strong handle if the registry is still alive
    #[must_use]
    pub fn upgrade(&self) -> Option<ProviderRegistry> {
        self.inner.upgrade().map(|inner| ProviderRegistry { inner })
    }
}

impl fmt::Debug for WeakProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakProviderRegistry")
    }
}
