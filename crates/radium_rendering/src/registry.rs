//! Registry of named default render technique builders.

use crate::{parameters::ShaderParameterProvider, technique::RenderTechnique};
use anyhow::Result;
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, LazyLock},
};

/// Function configuring the passes of a technique for a material. The flag
/// tells whether the material is transparent.
pub type DefaultTechniqueBuilder = Arc<dyn Fn(&mut RenderTechnique, bool) + Send + Sync>;

/// Map from name to [`DefaultTechniqueBuilder`].
#[derive(Clone, Default)]
pub struct TechniqueRegistry {
    builders: HashMap<String, DefaultTechniqueBuilder>,
}

/// Process-wide [`TechniqueRegistry`] that material plugins register their
/// builders in.
#[derive(Debug)]
pub struct EngineRenderTechniques;

static ENGINE_TECHNIQUES: LazyLock<RwLock<TechniqueRegistry>> =
    LazyLock::new(|| RwLock::new(TechniqueRegistry::new()));

impl TechniqueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the given builder under the given name. Returns `false`
    /// without replacing anything if the name is taken.
    pub fn register(&mut self, name: impl Into<String>, builder: DefaultTechniqueBuilder) -> bool {
        let name = name.into();
        if self.builders.contains_key(&name) {
            radium_log::warn!("Render technique {} is already registered", name);
            return false;
        }
        radium_log::debug!("Registering render technique {}", name);
        self.builders.insert(name, builder);
        true
    }

    /// Removes the builder with the given name. Returns `false` if there was
    /// none.
    pub fn remove(&mut self, name: &str) -> bool {
        self.builders.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<DefaultTechniqueBuilder> {
        self.builders.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    /// The registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.builders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }

    pub fn clear(&mut self) {
        self.builders.clear();
    }
}

impl fmt::Debug for TechniqueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TechniqueRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl EngineRenderTechniques {
    /// Registers a builder in the process-wide registry. Returns `false` if
    /// the name is taken.
    pub fn register_default_technique(
        name: impl Into<String>,
        builder: DefaultTechniqueBuilder,
    ) -> bool {
        ENGINE_TECHNIQUES.write().register(name, builder)
    }

    pub fn remove_default_technique(name: &str) -> bool {
        ENGINE_TECHNIQUES.write().remove(name)
    }

    pub fn get_default_technique(name: &str) -> Option<DefaultTechniqueBuilder> {
        ENGINE_TECHNIQUES.read().get(name)
    }

    /// Removes every builder from the process-wide registry.
    pub fn cleanup() {
        ENGINE_TECHNIQUES.write().clear();
    }

    /// Calls the given closure with shared access to the process-wide
    /// registry.
    pub fn with_registry<R>(f: impl FnOnce(&TechniqueRegistry) -> R) -> R {
        f(&ENGINE_TECHNIQUES.read())
    }

    /// Calls the given closure with exclusive access to the process-wide
    /// registry.
    pub fn with_registry_mut<R>(f: impl FnOnce(&mut TechniqueRegistry) -> R) -> R {
        f(&mut ENGINE_TECHNIQUES.write())
    }

    /// Creates a technique with [`RenderTechnique::create_default`] from the
    /// process-wide registry.
    ///
    /// # Errors
    /// See [`RenderTechnique::create_default`].
    pub fn create_default_technique(
        provider: Arc<dyn ShaderParameterProvider>,
    ) -> Result<RenderTechnique> {
        // The builder runs outside the lock so it may itself use the registry
        let registry = ENGINE_TECHNIQUES.read().clone();
        RenderTechnique::create_default(&registry, provider)
    }
}
