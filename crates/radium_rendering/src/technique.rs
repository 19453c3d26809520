//! Per-pass shader configuration of render objects.

use crate::{
    parameters::ShaderParameterProvider,
    pass::{MAX_PASSES, PassIndex, PassSet},
    program::{ShaderBackend, ShaderProgram, ShaderProgramManager},
    registry::TechniqueRegistry,
    shader::ShaderConfiguration,
};
use anyhow::{Result, anyhow};
use std::{array, fmt, sync::Arc};

/// Name of the technique builder used by
/// [`RenderTechnique::create_default`].
pub const DEFAULT_TECHNIQUE_NAME: &str = "BlinnPhong";

/// The shader configuration, compiled program and parameter provider of each
/// rendering pass of a render object.
///
/// Every pass has a `configured` bit and a `dirty` bit. Setting a
/// configuration marks the pass as configured and dirty, and
/// [`update_gl`](Self::update_gl) fetches a program for every dirty pass and
/// clears its bit. [`shader`](Self::shader) only hands out a program for
/// passes that are configured and clean.
///
/// A technique is not thread-safe for concurrent configuration, and
/// [`update_gl`](Self::update_gl) must be called from the thread owning the
/// graphics context.
pub struct RenderTechnique {
    passes: Box<[PassConfiguration; MAX_PASSES]>,
    providers: Box<[Option<Arc<dyn ShaderParameterProvider>>; MAX_PASSES]>,
    configured: PassSet,
    dirty: PassSet,
    active_pass_count: usize,
}

#[derive(Clone, Debug, Default)]
struct PassConfiguration {
    configuration: ShaderConfiguration,
    program: Option<Arc<ShaderProgram>>,
}

impl RenderTechnique {
    /// Creates a technique with no configured passes. Every pass starts out
    /// dirty.
    pub fn new() -> Self {
        Self {
            passes: Box::new(array::from_fn(|_| PassConfiguration::default())),
            providers: Box::new(array::from_fn(|_| None)),
            configured: PassSet::EMPTY,
            dirty: PassSet::ALL,
            active_pass_count: 0,
        }
    }

    /// Creates a technique configured by the [`DEFAULT_TECHNIQUE_NAME`]
    /// builder of the given registry, with the given provider attached to
    /// every configured pass.
    ///
    /// # Errors
    /// Returns an error if the registry has no builder with that name.
    pub fn create_default(
        registry: &TechniqueRegistry,
        provider: Arc<dyn ShaderParameterProvider>,
    ) -> Result<Self> {
        let builder = registry.get(DEFAULT_TECHNIQUE_NAME).ok_or_else(|| {
            anyhow!(
                "Default render technique {} is not registered",
                DEFAULT_TECHNIQUE_NAME
            )
        })?;

        let mut technique = Self::new();
        builder(&mut technique, false);
        technique.set_parameters_provider(provider, None);

        Ok(technique)
    }

    /// Stores the given configuration for the given pass and marks the pass
    /// as configured and dirty.
    pub fn set_configuration(&mut self, configuration: ShaderConfiguration, pass: PassIndex) {
        let slot = &mut self.passes[pass.get()];
        slot.configuration = configuration;
        slot.program = None;

        self.configured.insert(pass);
        self.dirty.insert(pass);
        self.active_pass_count = self.active_pass_count.max(pass.get() + 1);
    }

    /// Returns the configuration of the given pass, or [`None`] if the pass
    /// is not configured.
    pub fn configuration(&self, pass: PassIndex) -> Option<&ShaderConfiguration> {
        self.has_configuration(pass)
            .then(|| &self.passes[pass.get()].configuration)
    }

    pub fn has_configuration(&self, pass: PassIndex) -> bool {
        self.configured.contains(pass)
    }

    /// Marks the given pass as configured without touching its stored
    /// configuration.
    pub fn set_configured(&mut self, pass: PassIndex) {
        self.configured.insert(pass);
    }

    /// Marks the given pass as not configured. The stored configuration and
    /// program are kept but no longer used.
    pub fn clear_configuration(&mut self, pass: PassIndex) {
        self.configured.remove(pass);
    }

    /// Returns the program of the given pass if the pass is configured and
    /// its program is up to date.
    pub fn shader(&self, pass: PassIndex) -> Option<&Arc<ShaderProgram>> {
        if self.has_configuration(pass) && !self.is_dirty(pass) {
            self.passes[pass.get()].program.as_ref()
        } else {
            None
        }
    }

    /// Attaches the given provider to the given pass, or to every configured
    /// pass if `pass` is [`None`]. The properties required by the provider
    /// are added to the configuration of the affected passes.
    ///
    /// Attaching a provider to a pass that is not configured, or to all
    /// passes when none is configured, is a programming error.
    pub fn set_parameters_provider(
        &mut self,
        provider: Arc<dyn ShaderParameterProvider>,
        pass: Option<PassIndex>,
    ) {
        let targets = self.target_passes(pass);
        if targets.is_empty() {
            radium_log::error!(
                "Cannot set parameters provider on {}: not configured",
                describe_target(pass)
            );
            debug_assert!(false, "parameters provider set before configuring a pass");
            return;
        }

        for target in targets.iter() {
            self.providers[target.get()] = Some(Arc::clone(&provider));
        }

        let properties = provider.property_list();
        if !properties.is_empty() {
            self.add_pass_properties(properties, pass);
        }
    }

    pub fn parameters_provider(&self, pass: PassIndex) -> Option<&Arc<dyn ShaderParameterProvider>> {
        self.providers[pass.get()].as_ref()
    }

    /// Adds the given properties to the configuration of the given pass, or
    /// of every configured pass if `pass` is [`None`], and marks the affected
    /// passes dirty. Passes that are not configured are left alone.
    pub fn add_pass_properties<I>(&mut self, properties: I, pass: Option<PassIndex>)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let properties: Vec<String> = properties.into_iter().map(Into::into).collect();

        for target in self.target_passes(pass).iter() {
            self.passes[target.get()]
                .configuration
                .add_properties(properties.iter().cloned());
            self.dirty.insert(target);
        }
    }

    /// Fetches an up-to-date program from the given manager for every
    /// configured pass that is dirty or has no program, clears the dirty bit
    /// of those passes and then lets each attached provider update its GPU
    /// state. Passes that are clean cause no work.
    pub fn update_gl<B: ShaderBackend>(&mut self, manager: &mut ShaderProgramManager<B>) {
        for pass in self.configured.iter() {
            let slot = &mut self.passes[pass.get()];
            if self.dirty.contains(pass) || slot.program.is_none() {
                slot.program = manager.get_program(&slot.configuration);
                self.dirty.remove(pass);
            }
        }

        let mut updated: Vec<&Arc<dyn ShaderParameterProvider>> = Vec::new();
        for provider in self.providers.iter().flatten() {
            if !updated.iter().any(|&seen| Arc::ptr_eq(seen, provider)) {
                provider.update_gl();
                updated.push(provider);
            }
        }
    }

    pub fn is_dirty(&self, pass: PassIndex) -> bool {
        self.dirty.contains(pass)
    }

    pub fn set_dirty(&mut self, pass: PassIndex) {
        self.dirty.insert(pass);
    }

    pub fn clear_dirty(&mut self, pass: PassIndex) {
        self.dirty.remove(pass);
    }

    /// One above the highest pass index ever configured, i.e. the number of
    /// passes a renderer must iterate over.
    pub fn active_pass_count(&self) -> usize {
        self.active_pass_count
    }

    pub fn configured_passes(&self) -> PassSet {
        self.configured
    }

    pub fn dirty_passes(&self) -> PassSet {
        self.dirty
    }

    fn target_passes(&self, pass: Option<PassIndex>) -> PassSet {
        match pass {
            Some(pass) if self.has_configuration(pass) => [pass].into_iter().collect(),
            Some(_) => PassSet::EMPTY,
            None => self.configured,
        }
    }
}

impl Default for RenderTechnique {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RenderTechnique {
    /// Copies the configured passes along with their programs and providers,
    /// without triggering any compilation. Both techniques share the same
    /// program objects.
    fn clone(&self) -> Self {
        let mut technique = Self::new();

        for pass in self.configured.iter() {
            if pass.get() < self.active_pass_count {
                technique.passes[pass.get()] = self.passes[pass.get()].clone();
                technique.providers[pass.get()] = self.providers[pass.get()].clone();
            }
        }

        technique.configured = self.configured;
        technique.dirty = self.dirty;
        technique.active_pass_count = self.active_pass_count;

        technique
    }
}

impl fmt::Debug for RenderTechnique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let configurations: Vec<_> = self
            .configured
            .iter()
            .map(|pass| (pass.get(), self.passes[pass.get()].configuration.name()))
            .collect();
        f.debug_struct("RenderTechnique")
            .field("configurations", &configurations)
            .field("configured", &self.configured)
            .field("dirty", &self.dirty)
            .field("active_pass_count", &self.active_pass_count)
            .finish_non_exhaustive()
    }
}

fn describe_target(pass: Option<PassIndex>) -> String {
    pass.map_or_else(|| "all passes".to_owned(), |pass| pass.to_string())
}
