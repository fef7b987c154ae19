//! SPH Fluid Simulation Kernel
//!
//! Smoothed Particle Hydrodynamics in a closed box: particles carry position
//! and velocity, densities are kernel-weighted sums over a uniform-grid
//! neighborhood, and pressure, viscosity and gravity forces are integrated
//! with explicit Euler before elastic wall collisions.
//!
//! # Modules
//! - [`kernels`] -- Poly6, spiky-gradient and viscosity-Laplacian kernels.
//! - [`grid`] -- Cell assignment, sorted particle records, and per-cell ranges.
//! - [`solver`] -- Density, pressure, acceleration and integration passes.
//! - [`boundary`] -- Container box and elastic wall reflection.
//! - [`config`] -- Tunable parameter block and validation.
//! - [`particle`] -- Seeding and backend-neutral read views.
//! - [`double_buffer`] -- Ping-pong storage with current/scratch roles.
//! - [`sort`] -- Bitonic sorting network used by the compute backend.
//! - `gpu` (feature `gpu`) -- wgpu compute backend.

#![warn(missing_docs)]

pub mod boundary;
pub mod config;
pub mod double_buffer;
pub mod grid;
pub mod kernels;
pub mod particle;
pub mod solver;
pub mod sort;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

use std::time::{Duration, Instant};

use glam::Vec3;
use rand::rngs::StdRng;
use rand::SeedableRng;

pub use boundary::Bounds;
pub use config::{CollisionPolicy, ConfigError, SimulationConfig, Tunable};
pub use double_buffer::PingPong;
pub use grid::{CellRecord, GridLayout, ParticleRecord, SpatialIndex};
pub use particle::VectorView;

#[cfg(feature = "gpu")]
pub use gpu::{GpuError, GpuKernel};

// ---------------------------------------------------------------------------
// SimulationKernel trait
// ---------------------------------------------------------------------------

/// Contract shared by the CPU and GPU back-ends.
///
/// Each step runs the same phases:
///
/// 1. Spatial index rebuild (assign cells, sort, cell ranges, reorder)
/// 2. Density summation
/// 3. Pressure + viscosity + gravity forces, explicit Euler integration
/// 4. Wall collisions
///
/// `bounds` must be the box the kernel was built with. The size fields of
/// `config` (`particle_count`, `subdivisions`) are fixed at construction;
/// the tunables are read afresh every step.
pub trait SimulationKernel {
    /// Reseed every particle uniformly inside `bounds` with a unit-length
    /// velocity in a random direction.
    fn reset(&mut self, bounds: &Bounds, config: &SimulationConfig);

    /// Advance the simulation by `config.step` seconds.
    fn step(&mut self, bounds: &Bounds, config: &SimulationConfig);

    /// Current particle positions, in the kernel's current (cell-sorted) order.
    fn positions(&self) -> VectorView<'_>;

    /// Current particle velocities, parallel to [`positions`](Self::positions).
    fn velocities(&self) -> VectorView<'_>;

    /// Densities computed during the last step, in the order positions had
    /// at that time. Empty before the first step.
    fn densities(&self) -> &[f32];

    /// Number of particles in the simulation.
    fn particle_count(&self) -> usize;

    /// Duration of the most recent step that has been measured. May lag
    /// behind by a few steps on asynchronous back-ends.
    fn last_step_time(&self) -> Option<Duration>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// CpuKernel -- sequential reference implementation
// ---------------------------------------------------------------------------

/// Single-threaded implementation of [`SimulationKernel`].
///
/// Deterministic for a given seed: the spatial index uses a stable sort, so
/// particle order after every step depends only on positions.
pub struct CpuKernel {
    /// Particle positions (current / scratch).
    positions: PingPong<Vec<Vec3>>,
    /// Particle velocities (current / scratch).
    velocities: PingPong<Vec<Vec3>>,
    /// Densities from the last step.
    densities: Vec<f32>,
    /// Cell records, rebuilt every step.
    index: SpatialIndex,
    /// Particle count captured at construction.
    particle_count: usize,
    /// Grid resolution captured at construction.
    subdivisions: u32,
    /// Source of reset states; advances on every reset.
    rng: StdRng,
    /// Wall-clock duration of the last step.
    last_step_time: Option<Duration>,
}

impl CpuKernel {
    /// Validate `config` and `bounds`, allocate the particle buffers, and
    /// seed the initial state.
    pub fn new(bounds: &Bounds, config: &SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        bounds.validate()?;

        let n = config.particle_count as usize;
        let layout = GridLayout::new(bounds, config.subdivisions);
        warn_if_cells_too_small(bounds, config);
        tracing::info!(
            particles = n,
            subdivisions = config.subdivisions,
            cells = layout.cell_count(),
            "CPU kernel created"
        );

        let mut kernel = Self {
            positions: PingPong::filled(Vec::with_capacity(n)),
            velocities: PingPong::filled(Vec::with_capacity(n)),
            densities: Vec::new(),
            index: SpatialIndex::new(&layout, n),
            particle_count: n,
            subdivisions: config.subdivisions,
            rng: StdRng::seed_from_u64(config.seed),
            last_step_time: None,
        };
        kernel.reset(bounds, config);
        Ok(kernel)
    }

    /// Spatial index from the last step.
    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Grid layout this kernel lays over `bounds`.
    pub fn layout(&self, bounds: &Bounds) -> GridLayout {
        GridLayout::new(bounds, self.subdivisions)
    }
}

impl SimulationKernel for CpuKernel {
    fn reset(&mut self, bounds: &Bounds, _config: &SimulationConfig) {
        let (positions, velocities) =
            particle::seed_particles(bounds, self.particle_count, &mut self.rng);
        *self.positions.current_mut() = positions;
        *self.velocities.current_mut() = velocities;
        self.densities.clear();
    }

    fn step(&mut self, bounds: &Bounds, config: &SimulationConfig) {
        debug_assert_eq!(config.particle_count as usize, self.particle_count);
        debug_assert_eq!(config.subdivisions, self.subdivisions);
        let start = Instant::now();
        let layout = self.layout(bounds);

        // --- 1. Spatial index + reorder ---
        self.index.rebuild(&layout, &mut self.positions, &mut self.velocities);

        // --- 2. Density ---
        self.densities.resize(self.particle_count, 0.0);
        solver::compute_densities(
            &layout,
            &self.index,
            self.positions.current(),
            config,
            &mut self.densities,
        );

        // --- 3. Forces + integration into scratch ---
        let (pos, new_pos) = self.positions.split();
        let (vel, new_vel) = self.velocities.split();
        new_pos.resize(pos.len(), Vec3::ZERO);
        new_vel.resize(vel.len(), Vec3::ZERO);
        let non_finite = solver::integrate(
            &layout,
            &self.index,
            pos,
            vel,
            &self.densities,
            config,
            new_pos,
            new_vel,
        );
        if non_finite > 0 {
            tracing::warn!(
                non_finite,
                "particles with non-finite state after integration"
            );
        }
        self.positions.flip();
        self.velocities.flip();

        // --- 4. Wall collisions ---
        let reflected = boundary::collide(
            self.positions.current_mut(),
            self.velocities.current_mut(),
            bounds,
            config.step,
            config.collision,
        );

        let elapsed = start.elapsed();
        tracing::debug!(reflected, elapsed_us = elapsed.as_micros() as u64, "CPU step");
        self.last_step_time = Some(elapsed);
    }

    fn positions(&self) -> VectorView<'_> {
        VectorView::Packed(self.positions.current())
    }

    fn velocities(&self) -> VectorView<'_> {
        VectorView::Packed(self.velocities.current())
    }

    fn densities(&self) -> &[f32] {
        &self.densities
    }

    fn particle_count(&self) -> usize {
        self.particle_count
    }

    fn last_step_time(&self) -> Option<Duration> {
        self.last_step_time
    }

    fn name(&self) -> &'static str {
        "cpu"
    }
}

/// The 27-cell search only sees neighbors within one cell edge, so cells
/// narrower than `h` silently drop interactions. Logs a warning and returns
/// `true` in that case.
///
/// Backends check at construction; callers that change `h` or
/// `subdivisions` between steps should check again.
pub fn warn_if_cells_too_small(bounds: &Bounds, config: &SimulationConfig) -> bool {
    let cell = config.cell_size(bounds);
    let narrowest = cell.iter().copied().fold(f32::INFINITY, f32::min);
    let too_small = narrowest < config.h;
    if too_small {
        tracing::warn!(
            cell_size = narrowest,
            h = config.h,
            "grid cells are narrower than the kernel radius; neighbors beyond one cell are ignored"
        );
    }
    too_small
}
