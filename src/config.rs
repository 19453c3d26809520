//! Engine configuration.

use crate::io;
use anyhow::Result;
use radium_rendering::shader::{self, ShaderConfigurationLibrary};
use radium_scheduling::TaskQueue;
use serde::{Deserialize, Serialize};
use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scheduling: SchedulingConfig,
    pub rendering: RenderingConfig,
    /// Number of frames the headless runner executes.
    pub frames: u64,
}

/// Configuration of per-frame task execution.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Number of worker threads. One less than the available parallelism
    /// (but at least one) if not specified.
    pub n_workers: Option<NonZeroUsize>,
    /// Execute the tasks of each frame on the thread running the frame
    /// instead of on the worker threads.
    pub run_on_main_thread: bool,
    /// Include per-task timings in frame reports.
    pub record_timings: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderingConfig {
    /// Directory that shader file paths are resolved against.
    pub shader_root: PathBuf,
    /// OpenGL version (major, minor) determining the GLSL version.
    pub opengl_version: (u32, u32),
}

impl EngineConfig {
    /// Parses the configuration from the RON file at the given path and
    /// resolves any specified paths.
    pub fn from_ron_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_path = file_path.as_ref();
        let mut config: Self = io::parse_ron_file(file_path)?;
        if let Some(root_path) = file_path.parent() {
            config.resolve_paths(root_path);
        }
        Ok(config)
    }

    /// Resolves all paths in the configuration by prepending the given root
    /// path to all paths.
    fn resolve_paths(&mut self, root_path: &Path) {
        self.rendering.resolve_paths(root_path);
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scheduling: SchedulingConfig::default(),
            rendering: RenderingConfig::default(),
            frames: 1,
        }
    }
}

impl SchedulingConfig {
    /// Creates a task queue with the configured number of workers.
    pub fn create_task_queue(&self) -> TaskQueue {
        match self.n_workers {
            Some(n_workers) => TaskQueue::new(n_workers),
            None => TaskQueue::with_default_worker_count(),
        }
    }
}

impl RenderingConfig {
    pub fn glsl_version(&self) -> &'static str {
        let (major, minor) = self.opengl_version;
        shader::glsl_version_for_opengl(major, minor)
    }

    /// Creates an empty shader configuration library rooted at the
    /// configured shader directory.
    pub fn create_shader_library(&self) -> ShaderConfigurationLibrary {
        ShaderConfigurationLibrary::new(self.shader_root.clone(), self.glsl_version())
    }

    fn resolve_paths(&mut self, root_path: &Path) {
        self.shader_root = root_path.join(&self.shader_root);
    }
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            shader_root: PathBuf::from("Shaders"),
            opengl_version: (4, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_default_values() {
        let config: EngineConfig =
            ron::from_str("(scheduling: (n_workers: Some(3)), frames: 10)").unwrap();

        assert_eq!(config.scheduling.n_workers, NonZeroUsize::new(3));
        assert!(!config.scheduling.run_on_main_thread);
        assert_eq!(config.frames, 10);
        assert_eq!(config.rendering.shader_root, PathBuf::from("Shaders"));
        assert_eq!(config.rendering.glsl_version(), "410");
    }

    #[test]
    fn shader_root_is_resolved_against_config_directory() {
        let mut config = EngineConfig::default();
        config.resolve_paths(Path::new("assets"));
        assert_eq!(
            config.rendering.shader_root,
            Path::new("assets").join("Shaders")
        );
    }

    #[test]
    fn shader_library_uses_configured_version() {
        let config = RenderingConfig {
            shader_root: PathBuf::from("shaders"),
            opengl_version: (4, 5),
        };
        let library = config.create_shader_library();
        assert_eq!(library.glsl_version(), "450");
        assert_eq!(library.shader_root(), Path::new("shaders"));
    }

    #[test]
    fn parsing_missing_file_fails_with_path_in_message() {
        let error = EngineConfig::from_ron_file("does/not/exist.ron").unwrap_err();
        assert!(format!("{error:#}").contains("does/not/exist.ron"));
    }
}
