//! Headless SPH runner
//!
//! Loads a JSON run file, builds the CPU or GPU backend behind
//! [`sph_kernel::SimulationKernel`], and steps it while applying a schedule
//! of tunable adjustments.

pub mod config;
pub mod run;
pub mod stats;

pub use config::{Adjustment, BackendKind, RunConfig, RunConfigError};
pub use run::{build_kernel, run, run_kernel, RunError, RunReport};
pub use stats::{FrameTimeAverage, PositionSummary};
