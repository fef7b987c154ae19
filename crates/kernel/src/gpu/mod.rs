//! GPU (Vulkan/Metal/DX12 via wgpu) implementation of the SPH simulation kernel.
//!
//! `GpuKernel` implements `SimulationKernel` with wgpu compute shaders.
//!
//! # Architecture
//! Each step records one command buffer of compute passes:
//!   1. `assign_cells` -- (cell, particle) record per particle
//!   2. `bitonic_step` x log2(N)(log2(N)+1)/2 -- sort records by (cell, particle)
//!   3. `clear_cells` + `build_cell_ranges` -- per-cell (first, count)
//!   4. `reorder` -- permute position/velocity into the scratch buffers, flip
//!   5. `compute_density`
//!   6. `integrate` -- forces, Euler step and wall collisions into scratch, flip
//!
//! Every pass is its own compute pass, so wgpu places a storage barrier
//! between dependent passes. Particle data stays on the GPU; readback only
//! happens on demand, except in debug builds where every step reads the
//! state back to check it stays finite and that no density drops below
//! the particle mass.
//!
//! # Bind group layout
//! - Group 0: params (uniform), pos_in, vel_in, pos_out, vel_out, density,
//!   particle records, cell records. One bind group per ping-pong parity.
//! - Group 1: bitonic round parameters (uniform, dynamic offset).

pub mod buffers;
pub mod timer;

use std::cell::OnceCell;
use std::num::NonZeroU64;
use std::time::Duration;

use glam::Vec4;
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;

use buffers::{align_to, GpuBuffers, GpuParams, SORT_PARAMS_SIZE};
use timer::FrameTimer;

use crate::boundary::Bounds;
use crate::config::{ConfigError, SimulationConfig, WORKGROUP_SIZE};
use crate::grid::{CellRecord, GridLayout, ParticleRecord};
use crate::particle::{self, VectorView};
use crate::sort::bitonic_stages;
use crate::SimulationKernel;

/// Error returned when the GPU kernel cannot be created.
#[derive(Debug, Error)]
pub enum GpuError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no suitable GPU adapter found")]
    NoAdapter,
    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
}

/// Check whether a GPU adapter is available.
pub fn gpu_available() -> bool {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }));
    adapter.is_some()
}

/// GPU-accelerated SPH simulation kernel using wgpu compute shaders.
pub struct GpuKernel {
    // wgpu resources
    device: wgpu::Device,
    queue: wgpu::Queue,

    // Compute pipelines
    pipeline_assign_cells: wgpu::ComputePipeline,
    pipeline_bitonic: wgpu::ComputePipeline,
    pipeline_clear_cells: wgpu::ComputePipeline,
    pipeline_cell_ranges: wgpu::ComputePipeline,
    pipeline_reorder: wgpu::ComputePipeline,
    pipeline_density: wgpu::ComputePipeline,
    pipeline_integrate: wgpu::ComputePipeline,

    // Group 0 bind groups indexed by ping-pong parity; group 1 sort rounds.
    state_groups: [wgpu::BindGroup; 2],
    sort_group: wgpu::BindGroup,

    bufs: GpuBuffers,
    timer: Option<FrameTimer>,

    particle_count: u32,
    subdivisions: u32,
    rng: StdRng,
    has_stepped: bool,

    // Lazy host copies, cleared by every step/reset.
    cached_positions: OnceCell<Vec<Vec4>>,
    cached_velocities: OnceCell<Vec<Vec4>>,
    cached_densities: OnceCell<Vec<f32>>,
}

impl GpuKernel {
    /// Create a GPU kernel and seed its initial state.
    ///
    /// Returns `Err(GpuError::NoAdapter)` if no GPU is present, allowing
    /// callers to fall back to `CpuKernel`.
    pub fn new(bounds: &Bounds, config: &SimulationConfig) -> Result<Self, GpuError> {
        config.validate()?;
        bounds.validate()?;

        // --- Device initialization ---
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or(GpuError::NoAdapter)?;

        let timestamps = adapter.features().contains(wgpu::Features::TIMESTAMP_QUERY);
        tracing::info!(
            adapter = %adapter.get_info().name,
            timestamps,
            "GPU adapter selected"
        );

        let required_features = if timestamps {
            wgpu::Features::TIMESTAMP_QUERY
        } else {
            wgpu::Features::empty()
        };
        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("sph_gpu_device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::Performance,
            },
            None,
        ))?;

        crate::warn_if_cells_too_small(bounds, config);

        // --- Buffers ---
        let n = config.particle_count;
        let layout = GridLayout::new(bounds, config.subdivisions);
        let stages = bitonic_stages(n);
        let sort_stride = align_to(
            SORT_PARAMS_SIZE as u32,
            device.limits().min_uniform_buffer_offset_alignment,
        );
        let bufs = GpuBuffers::new(&device, n, layout.cell_count() as u32, &stages, sort_stride);
        tracing::info!(
            particles = n,
            subdivisions = config.subdivisions,
            sort_rounds = stages.len(),
            "GPU kernel buffers allocated"
        );

        // --- Shaders ---
        let grid_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("grid"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/grid.wgsl").into()),
        });
        let sph_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("sph"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/sph.wgsl").into()),
        });

        // --- Bind group layouts ---
        // Group 0: params(uniform), pos_in, vel_in, pos_out, vel_out, density, records, cells
        let bgl_state = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("state_bgl"),
            entries: &[
                bgl_uniform(0, false), // params
                bgl_storage_rw(1),     // pos_in
                bgl_storage_rw(2),     // vel_in
                bgl_storage_rw(3),     // pos_out
                bgl_storage_rw(4),     // vel_out
                bgl_storage_rw(5),     // density
                bgl_storage_rw(6),     // particle records
                bgl_storage_rw(7),     // cell records
            ],
        });
        // Group 1: one bitonic round, selected by dynamic offset
        let bgl_sort = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("sort_bgl"),
            entries: &[bgl_uniform(0, true)],
        });

        let pl_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("sph_pl"),
            bind_group_layouts: &[&bgl_state, &bgl_sort],
            push_constant_ranges: &[],
        });

        // --- Compute pipelines ---
        let pipeline = |module: &wgpu::ShaderModule, entry: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry),
                layout: Some(&pl_layout),
                module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let pipeline_assign_cells = pipeline(&grid_shader, "assign_cells");
        let pipeline_bitonic = pipeline(&grid_shader, "bitonic_step");
        let pipeline_clear_cells = pipeline(&grid_shader, "clear_cells");
        let pipeline_cell_ranges = pipeline(&grid_shader, "build_cell_ranges");
        let pipeline_reorder = pipeline(&grid_shader, "reorder");
        let pipeline_density = pipeline(&sph_shader, "compute_density");
        let pipeline_integrate = pipeline(&sph_shader, "integrate");

        // --- Bind groups ---
        // Parity p reads slot p and writes slot 1 - p.
        let state_group = |parity: usize| {
            let pos = bufs.positions.slots();
            let vel = bufs.velocities.slots();
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(if parity == 0 { "state_bg_0" } else { "state_bg_1" }),
                layout: &bgl_state,
                entries: &[
                    buf_entry(0, &bufs.params),
                    buf_entry(1, &pos[parity]),
                    buf_entry(2, &vel[parity]),
                    buf_entry(3, &pos[1 - parity]),
                    buf_entry(4, &vel[1 - parity]),
                    buf_entry(5, &bufs.density),
                    buf_entry(6, &bufs.particle_records),
                    buf_entry(7, &bufs.cell_records),
                ],
            })
        };
        let state_groups = [state_group(0), state_group(1)];

        let sort_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("sort_bg"),
            layout: &bgl_sort,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &bufs.sort_params,
                    offset: 0,
                    size: NonZeroU64::new(SORT_PARAMS_SIZE),
                }),
            }],
        });

        let timer = FrameTimer::new(&device, &queue);

        let mut kernel = Self {
            device,
            queue,
            pipeline_assign_cells,
            pipeline_bitonic,
            pipeline_clear_cells,
            pipeline_cell_ranges,
            pipeline_reorder,
            pipeline_density,
            pipeline_integrate,
            state_groups,
            sort_group,
            bufs,
            timer,
            particle_count: n,
            subdivisions: config.subdivisions,
            rng: StdRng::seed_from_u64(config.seed),
            has_stepped: false,
            cached_positions: OnceCell::new(),
            cached_velocities: OnceCell::new(),
            cached_densities: OnceCell::new(),
        };
        kernel.reset(bounds, config);
        Ok(kernel)
    }

    /// Device that owns the particle buffers, for renderers sharing them.
    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Queue the simulation submits to.
    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Device buffer holding the current positions as `vec4<f32>` (w = 0).
    ///
    /// Valid until the next `step` or `reset`.
    pub fn position_buffer(&self) -> &wgpu::Buffer {
        self.bufs.positions.current()
    }

    /// Wait for all submitted GPU work to complete.
    pub fn sync(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    /// Read back the sorted particle records of the last step (blocking).
    pub fn read_particle_records(&self) -> Vec<ParticleRecord> {
        self.bufs.read_particle_records(&self.device, &self.queue)
    }

    /// Read back the cell records of the last step (blocking).
    pub fn read_cell_records(&self) -> Vec<CellRecord> {
        self.bufs.read_cell_records(&self.device, &self.queue)
    }

    fn invalidate_cache(&mut self) {
        self.cached_positions.take();
        self.cached_velocities.take();
        self.cached_densities.take();
    }

    /// Blocking readback of the whole state after a step. The readback
    /// fills the caches, so a caller reading the views next pays nothing.
    #[cfg(debug_assertions)]
    fn check_state(&self, mass: f32) {
        let non_finite = count_non_finite(&self.positions(), &self.velocities());
        if non_finite > 0 {
            tracing::warn!(
                non_finite,
                "particles with non-finite state after integration"
            );
        }
        let below = first_density_below(self.densities(), mass);
        debug_assert!(
            below.is_none(),
            "density below particle mass {mass} at particle {below:?}"
        );
    }

    /// Encode one compute pass. Each call is a separate pass, and therefore
    /// separated from the previous one by a storage barrier.
    #[allow(clippy::too_many_arguments)]
    fn encode_pass(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        label: &str,
        pipeline: &wgpu::ComputePipeline,
        parity: usize,
        workgroups: u32,
        sort_offset: u32,
        timestamp_writes: Option<wgpu::ComputePassTimestampWrites<'_>>,
    ) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes,
        });
        pass.set_pipeline(pipeline);
        pass.set_bind_group(0, &self.state_groups[parity], &[]);
        pass.set_bind_group(1, &self.sort_group, &[sort_offset]);
        pass.dispatch_workgroups(workgroups, 1, 1);
    }
}

impl SimulationKernel for GpuKernel {
    fn reset(&mut self, bounds: &Bounds, _config: &SimulationConfig) {
        let (positions, velocities) =
            particle::seed_particles(bounds, self.particle_count as usize, &mut self.rng);
        self.bufs.upload_state(&self.queue, &positions, &velocities);
        self.has_stepped = false;
        self.invalidate_cache();
    }

    fn step(&mut self, bounds: &Bounds, config: &SimulationConfig) {
        debug_assert_eq!(config.particle_count, self.particle_count);
        debug_assert_eq!(config.subdivisions, self.subdivisions);

        // Pick up a finished timing sample without blocking.
        self.device.poll(wgpu::Maintain::Poll);
        if let Some(timer) = self.timer.as_mut() {
            timer.poll();
        }

        let params = GpuParams::new(bounds, config, self.particle_count, self.subdivisions);
        self.bufs.update_params(&self.queue, &params);

        let wg_particles = dispatch_size(self.particle_count, WORKGROUP_SIZE);
        let wg_cells = dispatch_size(self.bufs.cell_count, WORKGROUP_SIZE);
        let begin_writes = self.timer.as_ref().and_then(|t| t.begin_writes());
        let end_writes = self.timer.as_ref().and_then(|t| t.end_writes());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("sph_step"),
        });

        // --- Spatial index ---
        let parity = self.bufs.positions.parity();
        self.encode_pass(
            &mut encoder,
            "assign_cells",
            &self.pipeline_assign_cells,
            parity,
            wg_particles,
            0,
            begin_writes,
        );
        for k in 0..self.bufs.sort_stage_count {
            let offset = k * self.bufs.sort_stride;
            self.encode_pass(
                &mut encoder,
                "bitonic_step",
                &self.pipeline_bitonic,
                parity,
                wg_particles,
                offset,
                None,
            );
        }
        self.encode_pass(
            &mut encoder,
            "clear_cells",
            &self.pipeline_clear_cells,
            parity,
            wg_cells,
            0,
            None,
        );
        self.encode_pass(
            &mut encoder,
            "build_cell_ranges",
            &self.pipeline_cell_ranges,
            parity,
            wg_particles,
            0,
            None,
        );

        // --- Reorder into scratch ---
        self.encode_pass(
            &mut encoder,
            "reorder",
            &self.pipeline_reorder,
            parity,
            wg_particles,
            0,
            None,
        );
        let parity = 1 - parity;

        // --- Density, then integrate + collide into scratch ---
        self.encode_pass(
            &mut encoder,
            "density",
            &self.pipeline_density,
            parity,
            wg_particles,
            0,
            None,
        );
        self.encode_pass(
            &mut encoder,
            "integrate",
            &self.pipeline_integrate,
            parity,
            wg_particles,
            0,
            end_writes,
        );

        if let Some(timer) = self.timer.as_mut() {
            timer.resolve(&mut encoder);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(timer) = self.timer.as_mut() {
            timer.after_submit();
        }

        // Reorder and integrate each flipped the roles once.
        for _ in 0..2 {
            self.bufs.positions.flip();
            self.bufs.velocities.flip();
        }
        self.has_stepped = true;
        self.invalidate_cache();

        #[cfg(debug_assertions)]
        self.check_state(config.mass);
    }

    fn positions(&self) -> VectorView<'_> {
        VectorView::Padded(
            self.cached_positions
                .get_or_init(|| self.bufs.read_positions(&self.device, &self.queue)),
        )
    }

    fn velocities(&self) -> VectorView<'_> {
        VectorView::Padded(
            self.cached_velocities
                .get_or_init(|| self.bufs.read_velocities(&self.device, &self.queue)),
        )
    }

    fn densities(&self) -> &[f32] {
        if !self.has_stepped {
            return &[];
        }
        self.cached_densities
            .get_or_init(|| self.bufs.read_densities(&self.device, &self.queue))
    }

    fn particle_count(&self) -> usize {
        self.particle_count as usize
    }

    fn last_step_time(&self) -> Option<Duration> {
        self.timer.as_ref().and_then(FrameTimer::last)
    }

    fn name(&self) -> &'static str {
        "gpu"
    }
}

fn dispatch_size(total: u32, workgroup_size: u32) -> u32 {
    total.div_ceil(workgroup_size)
}

/// Particles whose position or velocity has a NaN or infinite component.
#[cfg(any(debug_assertions, test))]
fn count_non_finite(positions: &VectorView<'_>, velocities: &VectorView<'_>) -> usize {
    positions
        .iter()
        .zip(velocities.iter())
        .filter(|(p, v)| !(p.is_finite() && v.is_finite()))
        .count()
}

/// Index of the first density below `mass`. NaN densities count as below.
#[cfg(any(debug_assertions, test))]
fn first_density_below(densities: &[f32], mass: f32) -> Option<usize> {
    densities.iter().position(|&rho| rho < mass || rho.is_nan())
}

// ---- Bind group helpers ----

fn bgl_uniform(binding: u32, has_dynamic_offset: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset,
            min_binding_size: None,
        },
        count: None,
    }
}

fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn buf_entry(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}
