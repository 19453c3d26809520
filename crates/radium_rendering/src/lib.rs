//! Render techniques, shader configurations and shader program management.

pub mod materials;
pub mod parameters;
pub mod pass;
pub mod program;
pub mod registry;
pub mod shader;
pub mod technique;

pub use parameters::{ParameterSet, ParameterValue, RenderParameters, ShaderParameterProvider};
pub use pass::{MAX_PASSES, PassIndex, PassSet};
pub use program::{ProgramHandle, ShaderBackend, ShaderProgram, ShaderProgramManager};
pub use registry::{DefaultTechniqueBuilder, EngineRenderTechniques, TechniqueRegistry};
pub use shader::{ShaderConfiguration, ShaderConfigurationLibrary, ShaderSource, ShaderType};
pub use technique::RenderTechnique;
