//! Logging for the Radium engine.

#[macro_use]
mod macros;

pub use log::{debug, error, info, trace, warn};
