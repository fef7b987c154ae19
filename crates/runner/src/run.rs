//! Headless run loop
//!
//! Builds the selected backend behind [`SimulationKernel`], steps it for the
//! configured number of steps while applying the adjustment schedule, and
//! logs the parameter block and averaged step time as it goes.

use serde::Serialize;
use sph_kernel::{ConfigError, CpuKernel, SimulationConfig, SimulationKernel};
use std::time::Instant;
use thiserror::Error;

use crate::config::{BackendKind, RunConfig};
use crate::stats::{FrameTimeAverage, PositionSummary};

/// Errors while building or running a simulation
#[derive(Debug, Error)]
pub enum RunError {
    /// Parameters rejected at construction or after an adjustment
    #[error("invalid simulation parameters: {0}")]
    Config(#[from] ConfigError),
    /// The compute backend could not be initialized
    #[cfg(feature = "gpu")]
    #[error(transparent)]
    Gpu(#[from] sph_kernel::GpuError),
    /// GPU backend requested from a build without the `gpu` feature
    #[error("the gpu backend is not compiled in; rebuild with --features gpu")]
    GpuDisabled,
}

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Run name from the config
    pub name: String,
    /// Backend that executed the steps
    pub backend: &'static str,
    /// Steps executed
    pub steps: u64,
    /// Parameter block after all adjustments
    pub final_params: SimulationConfig,
    /// Averaged step time in milliseconds
    pub average_step_ms: Option<f64>,
    /// First step run with grid cells narrower than `h`, if any
    pub narrow_cells_from_step: Option<u64>,
    /// Final particle positions
    pub positions: Option<PositionSummary>,
}

/// Construct the backend selected by `config`
pub fn build_kernel(config: &RunConfig) -> Result<Box<dyn SimulationKernel>, RunError> {
    match config.backend {
        BackendKind::Cpu => Ok(Box::new(CpuKernel::new(
            &config.bounds,
            &config.simulation,
        )?)),
        #[cfg(feature = "gpu")]
        BackendKind::Gpu => Ok(Box::new(sph_kernel::GpuKernel::new(
            &config.bounds,
            &config.simulation,
        )?)),
        #[cfg(not(feature = "gpu"))]
        BackendKind::Gpu => Err(RunError::GpuDisabled),
    }
}

/// Build the backend and run it to completion
pub fn run(config: &RunConfig) -> Result<RunReport, RunError> {
    let mut kernel = build_kernel(config)?;
    run_kernel(kernel.as_mut(), config)
}

/// Step an existing backend through the run described by `config`
pub fn run_kernel(
    kernel: &mut dyn SimulationKernel,
    config: &RunConfig,
) -> Result<RunReport, RunError> {
    let mut params = config.simulation.clone();
    let mut frame_time = FrameTimeAverage::new();
    let mut narrow_cells_from_step = None;

    tracing::info!(
        name = %config.name,
        backend = kernel.name(),
        particles = kernel.particle_count(),
        steps = config.steps,
        "starting run"
    );
    log_params(&params);

    for step in 0..config.steps {
        let mut adjusted = false;
        for adj in config.adjustments_at(step) {
            let value = params.scale(adj.tunable, adj.factor);
            tracing::info!(
                step,
                tunable = adj.tunable.name(),
                factor = adj.factor,
                value,
                "adjusted"
            );
            adjusted = true;
        }
        if adjusted {
            params.validate()?;
            log_params(&params);
            if sph_kernel::warn_if_cells_too_small(&config.bounds, &params) {
                narrow_cells_from_step.get_or_insert(step);
            }
        }

        let start = Instant::now();
        kernel.step(&config.bounds, &params);
        frame_time.push(kernel.last_step_time().unwrap_or_else(|| start.elapsed()));

        if (step + 1) % config.log_every == 0 {
            let summary = PositionSummary::from_view(&kernel.positions());
            match summary {
                Some(s) => tracing::info!(
                    step = step + 1,
                    avg_ms = frame_time.average_ms().unwrap_or(0.0),
                    min = ?s.min,
                    max = ?s.max,
                    mean = ?s.mean,
                    non_finite = s.non_finite,
                    "progress"
                ),
                None => tracing::warn!(step = step + 1, "no finite particle positions left"),
            }
        }
    }

    let report = RunReport {
        name: config.name.clone(),
        backend: kernel.name(),
        steps: config.steps,
        final_params: params,
        average_step_ms: frame_time.average_ms(),
        narrow_cells_from_step,
        positions: PositionSummary::from_view(&kernel.positions()),
    };
    tracing::info!(
        steps = report.steps,
        avg_ms = report.average_step_ms.unwrap_or(0.0),
        "run finished"
    );
    Ok(report)
}

fn log_params(params: &SimulationConfig) {
    tracing::info!(
        step = params.step,
        h = params.h,
        mass = params.mass,
        rest_density = params.rest_density,
        stiffness = params.stiffness,
        viscosity = params.viscosity,
        "parameters"
    );
}
