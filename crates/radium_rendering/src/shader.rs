//! Shader configurations.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    path::{Path, PathBuf},
};

/// The GLSL version used when no OpenGL version has been specified.
pub const DEFAULT_GLSL_VERSION: &str = "410";

/// A programmable stage of the graphics pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderType {
    Vertex,
    Fragment,
    Geometry,
    TessControl,
    TessEvaluation,
    Compute,
}

/// Where the code of a shader stage comes from.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderSource {
    File(PathBuf),
    Inline(String),
}

/// Everything needed to build a shader program: the code of each stage along
/// with the preprocessor properties and include directives injected into it.
///
/// Configurations compare equal when they would produce the same program, so
/// they serve directly as keys for caching compiled programs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderConfiguration {
    name: String,
    glsl_version: String,
    shaders: [Option<ShaderSource>; ShaderType::COUNT],
    properties: BTreeSet<String>,
    includes: Vec<(String, ShaderType)>,
    named_strings: Vec<(String, String)>,
}

/// Named [`ShaderConfiguration`]s shared between material modules, together
/// with the directory that shader file paths are resolved against.
#[derive(Clone, Debug)]
pub struct ShaderConfigurationLibrary {
    shader_root: PathBuf,
    glsl_version: String,
    configurations: HashMap<String, ShaderConfiguration>,
}

impl ShaderType {
    pub const COUNT: usize = 6;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Vertex,
        Self::Fragment,
        Self::Geometry,
        Self::TessControl,
        Self::TessEvaluation,
        Self::Compute,
    ];

    const fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ShaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Geometry => "geometry",
            Self::TessControl => "tessellation control",
            Self::TessEvaluation => "tessellation evaluation",
            Self::Compute => "compute",
        };
        f.write_str(name)
    }
}

impl ShaderConfiguration {
    /// Creates an empty configuration with the given name and the
    /// [`DEFAULT_GLSL_VERSION`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            glsl_version: DEFAULT_GLSL_VERSION.to_owned(),
            shaders: Default::default(),
            properties: BTreeSet::new(),
            includes: Vec::new(),
            named_strings: Vec::new(),
        }
    }

    /// Creates a configuration with a vertex and a fragment shader read from
    /// the given files.
    pub fn from_files(
        name: impl Into<String>,
        vertex_shader: impl Into<PathBuf>,
        fragment_shader: impl Into<PathBuf>,
    ) -> Self {
        let mut configuration = Self::new(name);
        configuration.add_shader(ShaderType::Vertex, vertex_shader);
        configuration.add_shader(ShaderType::Fragment, fragment_shader);
        configuration
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The GLSL version number, e.g. `"410"`.
    pub fn glsl_version(&self) -> &str {
        &self.glsl_version
    }

    pub fn set_glsl_version(&mut self, glsl_version: impl Into<String>) {
        self.glsl_version = glsl_version.into();
    }

    /// The `#version` line that starts every stage.
    pub fn version_directive(&self) -> String {
        format!("#version {}", self.glsl_version)
    }

    /// Sets the given stage to be read from the given file.
    pub fn add_shader(&mut self, shader_type: ShaderType, path: impl Into<PathBuf>) {
        self.shaders[shader_type.slot()] = Some(ShaderSource::File(path.into()));
    }

    /// Sets the given stage to the given source code.
    pub fn add_shader_source(&mut self, shader_type: ShaderType, source: impl Into<String>) {
        self.shaders[shader_type.slot()] = Some(ShaderSource::Inline(source.into()));
    }

    pub fn shader(&self, shader_type: ShaderType) -> Option<&ShaderSource> {
        self.shaders[shader_type.slot()].as_ref()
    }

    /// Returns each stage that has a shader, along with its source.
    pub fn shaders(&self) -> impl Iterator<Item = (ShaderType, &ShaderSource)> {
        ShaderType::ALL
            .into_iter()
            .filter_map(|shader_type| Some((shader_type, self.shader(shader_type)?)))
    }

    /// Adds a property that is injected as `#define <property>` into every
    /// stage. Returns `false` if the property was already present.
    pub fn add_property(&mut self, property: impl Into<String>) -> bool {
        self.properties.insert(property.into())
    }

    pub fn add_properties<I>(&mut self, properties: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(Into::into));
    }

    /// Returns `false` if the property was not present.
    pub fn remove_property(&mut self, property: &str) -> bool {
        self.properties.remove(property)
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.properties.contains(property)
    }

    /// The properties in sorted order.
    pub fn properties(&self) -> impl Iterator<Item = &str> {
        self.properties.iter().map(String::as_str)
    }

    /// Adds an `#include "<include>"` directive to the given stage.
    pub fn add_include(&mut self, include: impl Into<String>, shader_type: ShaderType) {
        let include = include.into();
        if !self
            .includes
            .iter()
            .any(|(existing, existing_type)| *existing == include && *existing_type == shader_type)
        {
            self.includes.push((include, shader_type));
        }
    }

    pub fn add_includes<I>(&mut self, includes: I, shader_type: ShaderType)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        for include in includes {
            self.add_include(include, shader_type);
        }
    }

    /// Returns `false` if the stage had no such include.
    pub fn remove_include(&mut self, include: &str, shader_type: ShaderType) -> bool {
        let n_includes = self.includes.len();
        self.includes
            .retain(|(existing, existing_type)| !(existing == include && *existing_type == shader_type));
        self.includes.len() != n_includes
    }

    pub fn includes(&self, shader_type: ShaderType) -> impl Iterator<Item = &str> {
        self.includes
            .iter()
            .filter(move |(_, include_type)| *include_type == shader_type)
            .map(|(include, _)| include.as_str())
    }

    /// Registers a string that shaders can include by the given name.
    pub fn add_named_string(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.named_strings.push((name.into(), content.into()));
    }

    pub fn named_strings(&self) -> impl Iterator<Item = (&str, &str)> {
        self.named_strings
            .iter()
            .map(|(name, content)| (name.as_str(), content.as_str()))
    }

    /// Returns the preprocessor header injected at the top of the given
    /// stage: the version directive, one `#define` per property and the
    /// stage's include directives.
    pub fn header(&self, shader_type: ShaderType) -> String {
        let mut header = self.version_directive();
        header.push('\n');
        for property in &self.properties {
            header.push_str("#define ");
            header.push_str(property);
            header.push('\n');
        }
        for include in self.includes(shader_type) {
            header.push_str("#include \"");
            header.push_str(include);
            header.push_str("\"\n");
        }
        header
    }

    /// Whether the configuration describes a program that can be linked,
    /// which requires a vertex and a fragment shader or a compute shader.
    pub fn is_complete(&self) -> bool {
        (self.shader(ShaderType::Vertex).is_some() && self.shader(ShaderType::Fragment).is_some())
            || self.shader(ShaderType::Compute).is_some()
    }
}

impl Default for ShaderConfiguration {
    fn default() -> Self {
        Self::new("")
    }
}

impl ShaderConfigurationLibrary {
    /// Creates an empty library resolving shader files against the given
    /// directory and creating configurations for the given GLSL version.
    pub fn new(shader_root: impl Into<PathBuf>, glsl_version: impl Into<String>) -> Self {
        Self {
            shader_root: shader_root.into(),
            glsl_version: glsl_version.into(),
            configurations: HashMap::new(),
        }
    }

    pub fn shader_root(&self) -> &Path {
        &self.shader_root
    }

    pub fn glsl_version(&self) -> &str {
        &self.glsl_version
    }

    /// Creates a configuration with a vertex and a fragment shader whose
    /// paths are relative to the shader root, using the library's GLSL
    /// version. The configuration is not added to the library.
    pub fn create_configuration(
        &self,
        name: impl Into<String>,
        vertex_shader: impl AsRef<Path>,
        fragment_shader: impl AsRef<Path>,
    ) -> ShaderConfiguration {
        let mut configuration = ShaderConfiguration::from_files(
            name,
            self.shader_root.join(vertex_shader),
            self.shader_root.join(fragment_shader),
        );
        configuration.set_glsl_version(self.glsl_version.clone());
        configuration
    }

    /// Adds the given configuration under its name, replacing any existing
    /// configuration with the same name. Returns `true` if a configuration
    /// was replaced.
    pub fn add_configuration(&mut self, configuration: ShaderConfiguration) -> bool {
        self.configurations
            .insert(configuration.name().to_owned(), configuration)
            .is_some()
    }

    pub fn configuration(&self, name: &str) -> Option<&ShaderConfiguration> {
        self.configurations.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.configurations.contains_key(name)
    }

    pub fn remove_configuration(&mut self, name: &str) -> Option<ShaderConfiguration> {
        self.configurations.remove(name)
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

/// Returns the GLSL version number matching the given OpenGL version, or
/// [`DEFAULT_GLSL_VERSION`] if the OpenGL version is unknown.
pub fn glsl_version_for_opengl(major: u32, minor: u32) -> &'static str {
    match (major, minor) {
        (2, 0) => "110",
        (2, 1) => "120",
        (3, 0) => "130",
        (3, 1) => "140",
        (3, 2) => "150",
        (3, 3) => "330",
        (4, 0) => "400",
        (4, 1) => "410",
        (4, 2) => "420",
        (4, 3) => "430",
        (4, 4) => "440",
        (4, 5) => "450",
        (4, 6) => "460",
        _ => DEFAULT_GLSL_VERSION,
    }
}
