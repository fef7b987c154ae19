//! GPU buffer management for SPH particle data.
//!
//! Creates the device buffers for particle state (ping-ponged position and
//! velocity), densities, and the spatial index records, plus the uniform
//! blocks. Handles CPU->GPU upload and blocking GPU->CPU readback.

use glam::{Vec3, Vec4};
use wgpu::util::DeviceExt;

use crate::boundary::Bounds;
use crate::config::SimulationConfig;
use crate::double_buffer::PingPong;
use crate::grid::{CellRecord, ParticleRecord};
use crate::sort::BitonicStage;

/// Simulation parameters uniform buffer layout.
/// Must match the `Params` struct in `grid.wgsl` and `sph.wgsl` exactly.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuParams {
    pub bounds_min: [f32; 3],
    pub step: f32,
    pub bounds_max: [f32; 3],
    pub h: f32,
    pub mass: f32,
    pub rest_density: f32,
    pub stiffness: f32,
    pub viscosity: f32,
    pub subdivisions: u32,
    pub particle_count: u32,
    pub collision_policy: u32,
    pub _pad: u32,
}

impl GpuParams {
    pub fn new(
        bounds: &Bounds,
        config: &SimulationConfig,
        particle_count: u32,
        subdivisions: u32,
    ) -> Self {
        Self {
            bounds_min: bounds.min.to_array(),
            step: config.step,
            bounds_max: bounds.max.to_array(),
            h: config.h,
            mass: config.mass,
            rest_density: config.rest_density,
            stiffness: config.stiffness,
            viscosity: config.viscosity,
            subdivisions,
            particle_count,
            collision_policy: config.collision.as_u32(),
            _pad: 0,
        }
    }
}

/// One bitonic round, stored at a dynamic offset in the sort uniform buffer.
/// Must match `SortParams` in `grid.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuSortParams {
    pub block_len: u32,
    pub seq_len: u32,
    pub _pad0: u32,
    pub _pad1: u32,
}

/// Byte size of one `GpuSortParams` binding.
pub const SORT_PARAMS_SIZE: u64 = std::mem::size_of::<GpuSortParams>() as u64;

/// All GPU buffers needed for the simulation.
pub struct GpuBuffers {
    pub params: wgpu::Buffer,
    /// One `GpuSortParams` per bitonic round, `sort_stride` bytes apart.
    pub sort_params: wgpu::Buffer,
    pub sort_stride: u32,
    pub sort_stage_count: u32,

    pub positions: PingPong<wgpu::Buffer>,
    pub velocities: PingPong<wgpu::Buffer>,
    pub density: wgpu::Buffer,
    pub particle_records: wgpu::Buffer,
    pub cell_records: wgpu::Buffer,

    /// Shared staging buffer for readback, sized for the largest array.
    pub staging: wgpu::Buffer,

    pub particle_count: u32,
    pub cell_count: u32,
}

fn create_storage_buf(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::STORAGE
            | wgpu::BufferUsages::COPY_SRC
            | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Create a staging (MAP_READ) buffer for readback.
fn create_staging_buf(device: &wgpu::Device, label: &str, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some(label),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Copy mapped bytes into typed elements. Mapped ranges are only guaranteed
/// to be 8-byte aligned, so this copies instead of casting in place.
pub(crate) fn decode<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    bytemuck::pod_collect_to_vec(bytes)
}

/// Round `value` up to a multiple of `align`.
pub fn align_to(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

impl GpuBuffers {
    /// Allocate every buffer. Particle state starts zeroed; call
    /// [`upload_state`](Self::upload_state) before the first step.
    pub fn new(
        device: &wgpu::Device,
        particle_count: u32,
        cell_count: u32,
        stages: &[BitonicStage],
        sort_stride: u32,
    ) -> Self {
        let n = particle_count as u64;
        let vec4_bytes = n * std::mem::size_of::<Vec4>() as u64;
        let record_bytes = n * std::mem::size_of::<ParticleRecord>() as u64;
        let cell_bytes = cell_count as u64 * std::mem::size_of::<CellRecord>() as u64;
        let density_bytes = n * std::mem::size_of::<f32>() as u64;

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("params"),
            size: std::mem::size_of::<GpuParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Sort rounds never change for a given particle count: write them once.
        let sort_len = (stages.len().max(1) * sort_stride as usize).max(SORT_PARAMS_SIZE as usize);
        let mut sort_bytes = vec![0u8; sort_len];
        for (k, stage) in stages.iter().enumerate() {
            let entry = GpuSortParams {
                block_len: stage.block_len,
                seq_len: stage.seq_len,
                _pad0: 0,
                _pad1: 0,
            };
            let offset = k * sort_stride as usize;
            sort_bytes[offset..offset + SORT_PARAMS_SIZE as usize]
                .copy_from_slice(bytemuck::bytes_of(&entry));
        }
        let sort_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sort_params"),
            contents: &sort_bytes,
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let positions = PingPong::new(
            create_storage_buf(device, "positions_a", vec4_bytes),
            create_storage_buf(device, "positions_b", vec4_bytes),
        );
        let velocities = PingPong::new(
            create_storage_buf(device, "velocities_a", vec4_bytes),
            create_storage_buf(device, "velocities_b", vec4_bytes),
        );

        let staging_bytes = vec4_bytes.max(record_bytes).max(cell_bytes).max(density_bytes);

        Self {
            params,
            sort_params,
            sort_stride,
            sort_stage_count: stages.len() as u32,
            positions,
            velocities,
            density: create_storage_buf(device, "density", density_bytes),
            particle_records: create_storage_buf(device, "particle_records", record_bytes),
            cell_records: create_storage_buf(device, "cell_records", cell_bytes),
            staging: create_staging_buf(device, "readback_staging", staging_bytes),
            particle_count,
            cell_count,
        }
    }

    pub fn update_params(&self, queue: &wgpu::Queue, params: &GpuParams) {
        queue.write_buffer(&self.params, 0, bytemuck::bytes_of(params));
    }

    /// Write host particle state into the current position/velocity buffers.
    pub fn upload_state(&self, queue: &wgpu::Queue, positions: &[Vec3], velocities: &[Vec3]) {
        let pos: Vec<Vec4> = positions.iter().map(|p| p.extend(0.0)).collect();
        let vel: Vec<Vec4> = velocities.iter().map(|v| v.extend(0.0)).collect();
        queue.write_buffer(self.positions.current(), 0, bytemuck::cast_slice(&pos));
        queue.write_buffer(self.velocities.current(), 0, bytemuck::cast_slice(&vel));
    }

    pub fn read_positions(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Vec<Vec4> {
        self.read_buffer(
            device,
            queue,
            self.positions.current(),
            self.particle_count as usize,
        )
    }

    pub fn read_velocities(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Vec<Vec4> {
        self.read_buffer(
            device,
            queue,
            self.velocities.current(),
            self.particle_count as usize,
        )
    }

    pub fn read_densities(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Vec<f32> {
        self.read_buffer(device, queue, &self.density, self.particle_count as usize)
    }

    pub fn read_particle_records(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Vec<ParticleRecord> {
        self.read_buffer(
            device,
            queue,
            &self.particle_records,
            self.particle_count as usize,
        )
    }

    pub fn read_cell_records(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> Vec<CellRecord> {
        self.read_buffer(device, queue, &self.cell_records, self.cell_count as usize)
    }

    /// Copy `count` elements of `source` through the staging buffer.
    fn read_buffer<T: bytemuck::Pod>(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        source: &wgpu::Buffer,
        count: usize,
    ) -> Vec<T> {
        let byte_len = (count * std::mem::size_of::<T>()) as u64;
        if byte_len == 0 {
            return Vec::new();
        }
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback"),
        });
        encoder.copy_buffer_to_buffer(source, 0, &self.staging, 0, byte_len);
        queue.submit(std::iter::once(encoder.finish()));

        let slice = self.staging.slice(..byte_len);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        device.poll(wgpu::Maintain::Wait);
        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!("readback map failed: {e}");
                return Vec::new();
            }
            Err(_) => {
                tracing::error!("readback map callback dropped");
                return Vec::new();
            }
        }

        let result = {
            let data = slice.get_mapped_range();
            decode(&data)
        };
        self.staging.unmap();
        result
    }
}
