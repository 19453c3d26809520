//! Shader parameters supplied at draw time.

use parking_lot::RwLock;
use std::{
    collections::BTreeMap,
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};

/// Value of a single uniform parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterValue {
    Bool(bool),
    Int(i32),
    UInt(u32),
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([f32; 16]),
    /// Name of a texture to bind.
    Texture(String),
}

/// A set of named uniform values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderParameters {
    values: BTreeMap<String, ParameterValue>,
}

/// An object supplying the uniform values a pass needs when drawing,
/// independently of the shader configuration of the pass.
pub trait ShaderParameterProvider: Send + Sync + fmt::Debug {
    /// Returns the current parameter values.
    fn parameters(&self) -> RenderParameters;

    /// Returns the shader properties this provider requires. They are added
    /// to the configuration of every pass the provider is attached to.
    fn property_list(&self) -> Vec<String> {
        Vec::new()
    }

    /// Brings any GPU-side state of the provider up to date. Called from the
    /// thread owning the graphics context.
    fn update_gl(&self) {}
}

/// A [`ShaderParameterProvider`] holding a fixed list of properties and a
/// set of parameters that can be modified at any time.
#[derive(Debug, Default)]
pub struct ParameterSet {
    parameters: RwLock<RenderParameters>,
    properties: Vec<String>,
    n_gl_updates: AtomicUsize,
}

impl RenderParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the given parameter, returning its previous value if any.
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: ParameterValue,
    ) -> Option<ParameterValue> {
        self.values.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&ParameterValue> {
        self.values.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ParameterValue> {
        self.values.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The parameters sorted by name.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterValue)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }

    /// Copies every parameter of `other` into this set, replacing existing
    /// values with the same name.
    pub fn merge_replace(&mut self, other: &Self) {
        self.values
            .extend(other.values.iter().map(|(name, value)| (name.clone(), value.clone())));
    }

    /// Copies the parameters of `other` that are not already present.
    pub fn merge_keep(&mut self, other: &Self) {
        for (name, value) in &other.values {
            self.values
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

impl ParameterSet {
    pub fn new(parameters: RenderParameters, properties: Vec<String>) -> Self {
        Self {
            parameters: RwLock::new(parameters),
            properties,
            n_gl_updates: AtomicUsize::new(0),
        }
    }

    /// Sets the given parameter, returning its previous value if any.
    pub fn set(&self, name: impl Into<String>, value: ParameterValue) -> Option<ParameterValue> {
        self.parameters.write().set(name, value)
    }

    /// Returns how many times [`update_gl`](ShaderParameterProvider::update_gl)
    /// has been called.
    pub fn n_gl_updates(&self) -> usize {
        self.n_gl_updates.load(Ordering::Relaxed)
    }
}

impl ShaderParameterProvider for ParameterSet {
    fn parameters(&self) -> RenderParameters {
        self.parameters.read().clone()
    }

    fn property_list(&self) -> Vec<String> {
        self.properties.clone()
    }

    fn update_gl(&self) {
        self.n_gl_updates.fetch_add(1, Ordering::Relaxed);
    }
}
