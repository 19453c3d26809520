//! Per-frame task scheduling and render technique management for the Radium
//! engine.

pub mod config;
pub mod engine;
pub mod io;
pub mod system;

pub use radium_rendering as rendering;
pub use radium_scheduling as scheduling;

pub use config::{EngineConfig, RenderingConfig, SchedulingConfig};
pub use engine::{Engine, FrameReport};
pub use system::{CouplingSystem, FrameInfo, System};
