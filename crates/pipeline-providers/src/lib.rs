//! # Pipeline Providers
//!
//! Provider registry and model resolution for the AI Core plugin pipeline.
//!
//! - [`ProviderRegistry`]: id → provider mapping with atomic snapshot swaps
//! - [`ModelResolver`]: plain and namespaced model id resolution
//! - [`HubProvider`]: routes `hub>provider>model` ids to registered providers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod hub;
pub mod registry;
pub mod resolver;

pub use hub::HubProvider;
pub use registry::{
    ProviderEntry, ProviderRegistry, RegistrySnapshot, WeakProviderRegistry, DEFAULT_SEPARATOR,
};
pub use resolver::{ModelKind, ModelResolver, ResolvedModel};
