//! Uniform-grid spatial index rebuilt every step.
//!
//! Each particle is tagged with the id of the cell containing it, the
//! (cell, particle) records are stably sorted by cell id, and a scan over the
//! sorted records yields one `(first, count)` range per cell. Positions and
//! velocities are then permuted into sorted order, so the particles of one
//! cell are contiguous and a neighborhood is at most 27 index ranges.
//!
//! The layout maps directly onto the GPU buffers in `gpu/buffers.rs`; the
//! record structs share their memory layout with the WGSL declarations.

use std::ops::Range;

use glam::{IVec3, UVec3, Vec3};

use crate::boundary::Bounds;
use crate::double_buffer::PingPong;

/// (cell id, particle id) pair; sorting these orders the particles by cell.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "gpu", derive(bytemuck::Pod, bytemuck::Zeroable))]
pub struct ParticleRecord {
    /// Flattened cell id.
    pub cell: u32,
    /// Index of the particle before reordering.
    pub particle: u32,
}

/// Contiguous range of one cell's particles in sorted order.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "gpu", derive(bytemuck::Pod, bytemuck::Zeroable))]
pub struct CellRecord {
    /// Offset of the first particle of the cell.
    pub first: u32,
    /// Number of particles in the cell; zero for empty cells.
    pub count: u32,
}

impl CellRecord {
    /// Index range covered by this cell.
    pub fn range(&self) -> Range<usize> {
        let first = self.first as usize;
        first..first + self.count as usize
    }
}

/// Cell geometry: where the grid sits and how finely it is divided.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    min: Vec3,
    size: Vec3,
    subdivisions: u32,
}

impl GridLayout {
    /// Grid of `subdivisions^3` cells laid over `bounds`.
    pub fn new(bounds: &Bounds, subdivisions: u32) -> Self {
        Self {
            min: bounds.min,
            size: bounds.size(),
            subdivisions,
        }
    }

    /// Cells per axis.
    pub fn subdivisions(&self) -> u32 {
        self.subdivisions
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        let s = self.subdivisions as usize;
        s * s * s
    }

    /// Integer cell coordinates of `p`, clamped to the grid.
    #[inline]
    pub fn cell_coords(&self, p: Vec3) -> UVec3 {
        let s = self.subdivisions as f32;
        let c = ((p - self.min) / self.size * s).floor();
        let max = self.subdivisions as i32 - 1;
        // NaN casts to 0, which the clamp keeps in range.
        IVec3::new(c.x as i32, c.y as i32, c.z as i32)
            .clamp(IVec3::ZERO, IVec3::splat(max))
            .as_uvec3()
    }

    /// Flattened id `cx * S^2 + cy * S + cz`.
    #[inline]
    pub fn flatten(&self, c: UVec3) -> u32 {
        let s = self.subdivisions;
        c.x * s * s + c.y * s + c.z
    }

    /// Flattened id of the cell containing `p`.
    #[inline]
    pub fn cell_id(&self, p: Vec3) -> u32 {
        self.flatten(self.cell_coords(p))
    }

    /// Ids of the (up to) 27 cells around the cell containing `p`.
    ///
    /// Cells outside the grid are skipped, so corner cells yield 8 ids and
    /// face cells 12 or 18. Order is x-major, then y, then z.
    pub fn neighbor_cells(&self, p: Vec3) -> NeighborCells {
        let c = self.cell_coords(p).as_ivec3();
        let max = self.subdivisions as i32 - 1;
        let lo = (c - IVec3::ONE).max(IVec3::ZERO);
        let hi = (c + IVec3::ONE).min(IVec3::splat(max));

        let mut out = NeighborCells::default();
        for x in lo.x..=hi.x {
            for y in lo.y..=hi.y {
                for z in lo.z..=hi.z {
                    out.push(self.flatten(IVec3::new(x, y, z).as_uvec3()));
                }
            }
        }
        out
    }
}

/// Fixed-capacity list of neighborhood cell ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeighborCells {
    ids: [u32; 27],
    len: usize,
}

impl NeighborCells {
    fn push(&mut self, id: u32) {
        self.ids[self.len] = id;
        self.len += 1;
    }

    /// The cell ids.
    pub fn as_slice(&self) -> &[u32] {
        &self.ids[..self.len]
    }
}

/// Per-step particle and cell records.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    particles: Vec<ParticleRecord>,
    cells: Vec<CellRecord>,
}

impl SpatialIndex {
    /// Index with capacity for `particle_count` particles and `layout`'s cells.
    pub fn new(layout: &GridLayout, particle_count: usize) -> Self {
        Self {
            particles: Vec::with_capacity(particle_count),
            cells: vec![CellRecord::default(); layout.cell_count()],
        }
    }

    /// Sorted particle records from the last rebuild.
    pub fn particle_records(&self) -> &[ParticleRecord] {
        &self.particles
    }

    /// Cell records from the last rebuild, indexed by cell id.
    pub fn cell_records(&self) -> &[CellRecord] {
        &self.cells
    }

    /// Range of sorted particle indices in `cell`.
    #[inline]
    pub fn cell_range(&self, cell: u32) -> Range<usize> {
        self.cells[cell as usize].range()
    }

    /// Assign, sort, and scan, without touching particle data.
    pub fn build(&mut self, layout: &GridLayout, positions: &[Vec3]) {
        // --- 1. Assign cell ids ---
        self.particles.clear();
        self.particles.extend(positions.iter().enumerate().map(|(i, &p)| ParticleRecord {
            cell: layout.cell_id(p),
            particle: i as u32,
        }));

        // --- 2. Stable sort by cell id ---
        self.particles.sort_by_key(|r| r.cell);

        // --- 3. Scan sorted records into per-cell ranges ---
        self.cells.clear();
        self.cells.resize(layout.cell_count(), CellRecord::default());
        for (i, r) in self.particles.iter().enumerate() {
            let cell = &mut self.cells[r.cell as usize];
            if cell.count == 0 {
                cell.first = i as u32;
            }
            cell.count += 1;
        }
    }

    /// Rebuild the index and permute positions and velocities into sorted
    /// order. Both buffers end up with the sorted data as `current`.
    pub fn rebuild(
        &mut self,
        layout: &GridLayout,
        positions: &mut PingPong<Vec<Vec3>>,
        velocities: &mut PingPong<Vec<Vec3>>,
    ) {
        self.build(layout, positions.current());

        // --- 4. Reorder into scratch, then flip ---
        for buf in [positions, velocities] {
            let (src, dst) = buf.split();
            dst.clear();
            dst.extend(self.particles.iter().map(|r| src[r.particle as usize]));
            buf.flip();
        }
    }

    /// Call `f(j)` for every sorted particle index `j` in the neighborhood
    /// of `p`, including the particle at `p` itself.
    #[inline]
    pub fn for_each_neighbor<F: FnMut(usize)>(&self, layout: &GridLayout, p: Vec3, mut f: F) {
        for &cell in layout.neighbor_cells(p).as_slice() {
            for j in self.cell_range(cell) {
                f(j);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GridLayout {
        GridLayout::new(&Bounds::from_size(Vec3::ONE), 4)
    }

    #[test]
    fn cell_id_flattening() {
        let g = layout();
        assert_eq!(g.cell_id(Vec3::splat(0.1)), 0);
        // cx = 1, cy = 2, cz = 3
        assert_eq!(g.cell_id(Vec3::new(0.3, 0.6, 0.9)), 16 + 2 * 4 + 3);
    }

    #[test]
    fn out_of_bounds_positions_clamp() {
        let g = layout();
        assert_eq!(g.cell_coords(Vec3::splat(-5.0)), UVec3::ZERO);
        assert_eq!(g.cell_coords(Vec3::splat(5.0)), UVec3::splat(3));
        // The max corner itself falls in the last cell.
        assert_eq!(g.cell_coords(Vec3::ONE), UVec3::splat(3));
        assert_eq!(g.cell_coords(Vec3::new(f32::NAN, 0.5, 0.5)), UVec3::new(0, 2, 2));
    }

    #[test]
    fn neighbor_cell_counts() {
        let g = layout();
        assert_eq!(g.neighbor_cells(Vec3::splat(0.1)).as_slice().len(), 8);
        assert_eq!(g.neighbor_cells(Vec3::new(0.1, 0.4, 0.4)).as_slice().len(), 18);
        assert_eq!(g.neighbor_cells(Vec3::splat(0.4)).as_slice().len(), 27);
    }

    #[test]
    fn empty_index_has_empty_cells() {
        let g = layout();
        let mut index = SpatialIndex::new(&g, 0);
        index.build(&g, &[]);
        assert!(index.particle_records().is_empty());
        assert!(index.cell_records().iter().all(|c| c.count == 0));
    }

    #[test]
    fn build_sorts_and_counts() {
        let g = layout();
        let positions = vec![
            Vec3::splat(0.9),
            Vec3::splat(0.1),
            Vec3::splat(0.9),
            Vec3::new(0.1, 0.1, 0.3),
            Vec3::splat(0.1),
        ];
        let mut index = SpatialIndex::new(&g, positions.len());
        index.build(&g, &positions);

        let records = index.particle_records();
        assert!(records.windows(2).all(|w| w[0].cell <= w[1].cell));
        // Stable: equal cells keep particle order.
        let head: Vec<(u32, u32)> = records[..3].iter().map(|r| (r.cell, r.particle)).collect();
        assert_eq!(head, [(0, 1), (0, 4), (1, 3)]);

        let total: u32 = index.cell_records().iter().map(|c| c.count).sum();
        assert_eq!(total as usize, positions.len());
        assert_eq!(index.cell_range(0), 0..2);
        assert_eq!(index.cell_range(63), 3..5);
        assert_eq!(index.cell_range(5), 0..0);
    }

    #[test]
    fn rebuild_permutes_state_together() {
        let g = layout();
        let positions = vec![Vec3::splat(0.9), Vec3::splat(0.1), Vec3::splat(0.6)];
        let velocities = vec![Vec3::X, Vec3::Y, Vec3::Z];
        let mut pos = PingPong::new(positions, Vec::new());
        let mut vel = PingPong::new(velocities, Vec::new());
        let mut index = SpatialIndex::new(&g, 3);
        index.rebuild(&g, &mut pos, &mut vel);

        assert_eq!(pos.current(), &vec![Vec3::splat(0.1), Vec3::splat(0.6), Vec3::splat(0.9)]);
        assert_eq!(vel.current(), &vec![Vec3::Y, Vec3::Z, Vec3::X]);
    }

    #[test]
    fn for_each_neighbor_visits_adjacent_cells_only() {
        let g = layout();
        let positions = vec![Vec3::splat(0.1), Vec3::splat(0.3), Vec3::splat(0.9)];
        let mut index = SpatialIndex::new(&g, 3);
        index.build(&g, &positions);

        let mut seen = Vec::new();
        index.for_each_neighbor(&g, Vec3::splat(0.1), |j| seen.push(j));
        // Sorted order: cell 0, cell 21, cell 63.
        assert_eq!(seen, vec![0, 1]);
    }
}
