use anyhow::{Context, Result, bail};
use clap::Parser;
use parking_lot::Mutex;
use radium::{
    Engine, EngineConfig, FrameInfo, System,
    rendering::{
        EngineRenderTechniques, ParameterSet, ParameterValue, ProgramHandle,
        RenderParameters, RenderTechnique, ShaderBackend, ShaderConfiguration,
        ShaderParameterProvider, ShaderProgramManager, ShaderType, materials,
    },
    scheduling::{FunctionTask, TaskQueue},
};
use std::{
    fs::File,
    io::{BufWriter, Write},
    num::NonZeroUsize,
    path::PathBuf,
    sync::Arc,
};

#[derive(Debug, Parser)]
#[command(about = "Runs Radium engine frames without a window", long_about = None)]
struct Cli {
    /// Path to RON configuration file to use
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Number of frames to run, overriding the configuration
    #[arg(short, long)]
    frames: Option<u64>,
    /// Number of task worker threads, overriding the configuration
    #[arg(short, long)]
    workers: Option<NonZeroUsize>,
    /// Path where the task graph of the first frame is written in Graphviz
    /// DOT format
    #[arg(long)]
    dot: Option<PathBuf>,
}

/// Backend that validates configurations and hands out program handles
/// without a graphics context.
#[derive(Debug, Default)]
struct HeadlessBackend {
    n_programs: u64,
}

#[derive(Debug)]
struct RenderState {
    technique: RenderTechnique,
    programs: ShaderProgramManager<HeadlessBackend>,
}

#[derive(Debug)]
struct AnimationSystem {
    angle: Arc<Mutex<f64>>,
}

#[derive(Debug)]
struct SkinningSystem {
    angle: Arc<Mutex<f64>>,
    skinned_angle: Arc<Mutex<f64>>,
}

#[derive(Debug)]
struct RenderSystem {
    state: Arc<Mutex<RenderState>>,
    material: Arc<ParameterSet>,
    skinned_angle: Arc<Mutex<f64>>,
}

impl ShaderBackend for HeadlessBackend {
    fn compile_program(&mut self, configuration: &ShaderConfiguration) -> Result<ProgramHandle> {
        if !configuration.is_complete() {
            bail!(
                "Shader program {} lacks a vertex or fragment stage",
                configuration.name()
            );
        }
        self.n_programs += 1;
        radium_log::debug!(
            "Linked shader program {} as {} with header:\n{}",
            configuration.name(),
            self.n_programs,
            configuration.header(ShaderType::Fragment)
        );
        Ok(ProgramHandle(self.n_programs))
    }
}

impl System for AnimationSystem {
    fn name(&self) -> &str {
        "Animation"
    }

    fn generate_tasks(&mut self, task_queue: &mut TaskQueue, frame: &FrameInfo) -> Result<()> {
        let angle = Arc::clone(&self.angle);
        let dt = frame.dt.as_secs_f64();
        task_queue.register_task(FunctionTask::new("Animate", move || {
            *angle.lock() += dt;
            Ok(())
        }))?;
        Ok(())
    }
}

impl System for SkinningSystem {
    fn name(&self) -> &str {
        "Skinning"
    }

    fn generate_tasks(&mut self, task_queue: &mut TaskQueue, _frame: &FrameInfo) -> Result<()> {
        let angle = Arc::clone(&self.angle);
        let skinned_angle = Arc::clone(&self.skinned_angle);
        let skin = task_queue.register_task(FunctionTask::new("Skin", move || {
            *skinned_angle.lock() = angle.lock().sin();
            Ok(())
        }))?;
        task_queue.add_pending_dependency("Animate", skin)?;
        Ok(())
    }
}

impl System for RenderSystem {
    fn name(&self) -> &str {
        "Render"
    }

    fn generate_tasks(&mut self, task_queue: &mut TaskQueue, frame: &FrameInfo) -> Result<()> {
        let state = Arc::clone(&self.state);
        let material = Arc::clone(&self.material);
        let skinned_angle = Arc::clone(&self.skinned_angle);
        let frame_index = frame.frame_index;

        let render = task_queue.register_task(FunctionTask::new("Render", move || {
            let tint = (*skinned_angle.lock()).abs() as f32;
            material.set("material.kd", ParameterValue::Vec4([tint, tint, tint, 1.0]));

            let mut state = state.lock();
            let RenderState { technique, programs } = &mut *state;
            technique.update_gl(programs);

            let n_drawn = technique
                .configured_passes()
                .iter()
                .filter(|&pass| technique.shader(pass).is_some())
                .count();
            radium_log::debug!(
                "Frame {}: drew {} passes with {} parameters",
                frame_index,
                n_drawn,
                material.parameters().len()
            );
            Ok(())
        }))?;

        if !task_queue.add_dependency_on_name("Skin", render)? {
            bail!("Render task requires the Skin task");
        }
        Ok(())
    }
}

fn create_render_system(
    config: &EngineConfig,
    skinned_angle: Arc<Mutex<f64>>,
) -> Result<RenderSystem> {
    let mut library = config.rendering.create_shader_library();
    EngineRenderTechniques::with_registry_mut(|registry| {
        materials::register_default_material_techniques(registry, &mut library)
    });

    let default_configuration = library
        .configuration("Plain")
        .cloned()
        .context("Missing Plain shader configuration")?;
    let programs =
        ShaderProgramManager::with_default_program(HeadlessBackend::default(), default_configuration)?;

    let material = Arc::new(ParameterSet::new(
        RenderParameters::new(),
        vec!["ENABLE_KD".to_owned()],
    ));
    let technique = EngineRenderTechniques::create_default_technique(material.clone())?;

    Ok(RenderSystem {
        state: Arc::new(Mutex::new(RenderState {
            technique,
            programs,
        })),
        material,
        skinned_angle,
    })
}

fn create_engine(config: EngineConfig) -> Result<Engine> {
    let angle = Arc::new(Mutex::new(0.0));
    let skinned_angle = Arc::new(Mutex::new(0.0));
    let render_system = create_render_system(&config, Arc::clone(&skinned_angle))?;

    let mut engine = Engine::new(config);
    engine.add_system(AnimationSystem {
        angle: Arc::clone(&angle),
    });
    engine.add_system(SkinningSystem {
        angle,
        skinned_angle,
    });
    engine.add_system(render_system);
    Ok(engine)
}

fn run(cli: Cli) -> Result<()> {
    let mut config = match cli.config {
        Some(file_path) => EngineConfig::from_ron_file(file_path)?,
        None => EngineConfig::default(),
    };
    if let Some(frames) = cli.frames {
        config.frames = frames;
    }
    if let Some(n_workers) = cli.workers {
        config.scheduling.n_workers = Some(n_workers);
    }

    let n_frames = config.frames;
    let mut engine = create_engine(config)?;

    for frame_index in 0..n_frames {
        let report = match (&cli.dot, frame_index) {
            (Some(dot_path), 0) => {
                let file = File::create(dot_path)
                    .with_context(|| format!("Could not create {}", dot_path.display()))?;
                let mut writer = BufWriter::new(file);
                let report = engine.run_frame_writing_task_graph(&mut writer)?;
                writer.flush()?;
                report
            }
            _ => engine.run_frame(),
        };

        radium_log::info!(
            "Frame {}: {} completed, {} failed, {} skipped",
            report.frame_index,
            report.completed.len(),
            report.failed.len(),
            report.skipped.len()
        );
        if let Some(error) = &report.graph_error {
            bail!("Could not run frame {}: {:#}", report.frame_index, error);
        }
    }

    EngineRenderTechniques::cleanup();

    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    run(Cli::parse())
}
