//! Compiled shader programs and their cache.

use crate::shader::ShaderConfiguration;
use anyhow::Result;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

/// Opaque identifier of a program object owned by a [`ShaderBackend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

/// Something that can turn a [`ShaderConfiguration`] into a linked program
/// object, typically by talking to the graphics API. Must only be used from
/// the thread owning the graphics context.
pub trait ShaderBackend {
    /// Compiles and links the program described by the given configuration.
    ///
    /// # Errors
    /// Returns an error if any stage fails to compile or the program fails to
    /// link.
    fn compile_program(&mut self, configuration: &ShaderConfiguration) -> Result<ProgramHandle>;

    /// Releases a program object that is no longer used.
    fn release_program(&mut self, _handle: ProgramHandle) {}
}

/// A linked program together with the configuration it was built from.
///
/// Programs are shared through [`Arc`]s handed out by a
/// [`ShaderProgramManager`]. Reloading a program replaces its handle in
/// place, so holders of the [`Arc`] see the reloaded program.
#[derive(Debug)]
pub struct ShaderProgram {
    handle: AtomicU64,
    configuration: ShaderConfiguration,
}

/// Owner of every compiled [`ShaderProgram`], keyed by the configuration it
/// was built from.
///
/// Requesting a program whose configuration fails to compile yields the
/// default program instead, and the configuration is remembered so that
/// [`reload_not_compiled`](Self::reload_not_compiled) can retry it after the
/// shader sources have been fixed.
pub struct ShaderProgramManager<B> {
    backend: B,
    default_program: Option<Arc<ShaderProgram>>,
    programs: HashMap<ShaderConfiguration, Arc<ShaderProgram>>,
    not_compiled: HashSet<ShaderConfiguration>,
}

impl ShaderProgram {
    fn new(handle: ProgramHandle, configuration: ShaderConfiguration) -> Self {
        Self {
            handle: AtomicU64::new(handle.0),
            configuration,
        }
    }

    pub fn handle(&self) -> ProgramHandle {
        ProgramHandle(self.handle.load(Ordering::Acquire))
    }

    pub fn configuration(&self) -> &ShaderConfiguration {
        &self.configuration
    }

    fn replace_handle(&self, handle: ProgramHandle) -> ProgramHandle {
        ProgramHandle(self.handle.swap(handle.0, Ordering::AcqRel))
    }
}

impl<B: ShaderBackend> ShaderProgramManager<B> {
    /// Creates a manager without a default program.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            default_program: None,
            programs: HashMap::new(),
            not_compiled: HashSet::new(),
        }
    }

    /// Creates a manager whose default program is built from the given
    /// configuration.
    ///
    /// # Errors
    /// Returns an error if the default program fails to compile.
    pub fn with_default_program(backend: B, configuration: ShaderConfiguration) -> Result<Self> {
        let mut manager = Self::new(backend);
        manager.set_default_program(configuration)?;
        Ok(manager)
    }

    /// Compiles the given configuration and uses the result as the fallback
    /// for configurations that fail to compile.
    ///
    /// # Errors
    /// Returns an error if the program fails to compile, in which case the
    /// previous default program is kept.
    pub fn set_default_program(&mut self, configuration: ShaderConfiguration) -> Result<()> {
        let handle = self.backend.compile_program(&configuration)?;
        radium_log::debug!("Using shader program {} as default", configuration.name());
        self.default_program = Some(Arc::new(ShaderProgram::new(handle, configuration)));
        Ok(())
    }

    pub fn default_program(&self) -> Option<&Arc<ShaderProgram>> {
        self.default_program.as_ref()
    }

    /// Returns the program built from the given configuration, compiling it
    /// if this is the first request for it.
    ///
    /// If compilation fails, the error is logged and the default program (if
    /// any) is returned instead. The configuration is then not compiled again
    /// until [`reload_not_compiled`](Self::reload_not_compiled) is called.
    pub fn get_program(&mut self, configuration: &ShaderConfiguration) -> Option<Arc<ShaderProgram>> {
        if let Some(program) = self.programs.get(configuration) {
            return Some(Arc::clone(program));
        }

        if self.not_compiled.contains(configuration) {
            return self.default_program.clone();
        }

        match self.backend.compile_program(configuration) {
            Ok(handle) => {
                radium_log::debug!("Compiled shader program {}", configuration.name());
                let program = Arc::new(ShaderProgram::new(handle, configuration.clone()));
                self.programs
                    .insert(configuration.clone(), Arc::clone(&program));
                Some(program)
            }
            Err(error) => {
                radium_log::error!(
                    "Could not compile shader program {}, using default program instead: {:#}",
                    configuration.name(),
                    error
                );
                self.not_compiled.insert(configuration.clone());
                self.default_program.clone()
            }
        }
    }

    /// Whether the given configuration failed to compile and currently falls
    /// back to the default program.
    pub fn is_not_compiled(&self, configuration: &ShaderConfiguration) -> bool {
        self.not_compiled.contains(configuration)
    }

    /// Returns the number of successfully compiled programs, excluding the
    /// default program.
    pub fn n_programs(&self) -> usize {
        self.programs.len()
    }

    /// Recompiles every program in place. Programs that fail to recompile
    /// keep their previous handle. Returns the number of failures.
    pub fn reload_all(&mut self) -> usize {
        let mut n_failures = 0;

        if let Some(default_program) = &self.default_program {
            if !reload_program(&mut self.backend, default_program) {
                n_failures += 1;
            }
        }

        for program in self.programs.values() {
            if !reload_program(&mut self.backend, program) {
                n_failures += 1;
            }
        }

        radium_log::info!(
            "Reloaded {} shader programs ({} failed)",
            self.programs.len() + usize::from(self.default_program.is_some()),
            n_failures
        );

        n_failures
    }

    /// Retries compiling every configuration that previously failed. The
    /// ones that succeed are served as regular programs from now on, but
    /// render techniques must be marked dirty to pick them up. Returns the
    /// number of configurations that still fail.
    pub fn reload_not_compiled(&mut self) -> usize {
        let configurations: Vec<_> = self.not_compiled.drain().collect();

        for configuration in configurations {
            match self.backend.compile_program(&configuration) {
                Ok(handle) => {
                    radium_log::info!("Compiled shader program {}", configuration.name());
                    let program = Arc::new(ShaderProgram::new(handle, configuration.clone()));
                    self.programs.insert(configuration, program);
                }
                Err(error) => {
                    radium_log::error!(
                        "Shader program {} still does not compile: {:#}",
                        configuration.name(),
                        error
                    );
                    self.not_compiled.insert(configuration);
                }
            }
        }

        self.not_compiled.len()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B> fmt::Debug for ShaderProgramManager<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderProgramManager")
            .field("default_program", &self.default_program)
            .field("n_programs", &self.programs.len())
            .field("n_not_compiled", &self.not_compiled.len())
            .finish_non_exhaustive()
    }
}

fn reload_program(backend: &mut impl ShaderBackend, program: &ShaderProgram) -> bool {
    match backend.compile_program(program.configuration()) {
        Ok(handle) => {
            let old_handle = program.replace_handle(handle);
            backend.release_program(old_handle);
            true
        }
        Err(error) => {
            radium_log::error!(
                "Could not reload shader program {}: {:#}",
                program.configuration().name(),
                error
            );
            false
        }
    }
}
