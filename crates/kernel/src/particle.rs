//! Particle state seeding and backend-neutral read views.

use glam::{Vec3, Vec4};
use rand::Rng;

use crate::boundary::Bounds;

/// Read-only view of one per-particle vector attribute.
///
/// The CPU backend stores packed `Vec3`s; the GPU backend stores `vec4`
/// padded records so the buffer matches WGSL array stride.
#[derive(Debug, Clone, Copy)]
pub enum VectorView<'a> {
    /// Tightly packed 3-component vectors.
    Packed(&'a [Vec3]),
    /// 4-component vectors; `w` is padding.
    Padded(&'a [Vec4]),
}

impl<'a> VectorView<'a> {
    /// Number of particles.
    pub fn len(&self) -> usize {
        match self {
            VectorView::Packed(v) => v.len(),
            VectorView::Padded(v) => v.len(),
        }
    }

    /// `true` if the view holds no particles.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector of particle `i`, ignoring padding.
    pub fn get(&self, i: usize) -> Vec3 {
        match self {
            VectorView::Packed(v) => v[i],
            VectorView::Padded(v) => v[i].truncate(),
        }
    }

    /// Iterate over all vectors, ignoring padding.
    pub fn iter(&self) -> impl Iterator<Item = Vec3> + 'a {
        let view = *self;
        (0..view.len()).map(move |i| view.get(i))
    }

    /// Copy into a packed vector.
    pub fn to_vec(&self) -> Vec<Vec3> {
        self.iter().collect()
    }
}

/// Fresh particle state: positions uniform in `bounds`, velocities of unit
/// length with uniformly distributed directions.
pub fn seed_particles<R: Rng>(
    bounds: &Bounds,
    count: usize,
    rng: &mut R,
) -> (Vec<Vec3>, Vec<Vec3>) {
    let size = bounds.size();
    let positions = (0..count)
        .map(|_| {
            let t = Vec3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>());
            // gen::<f32>() is in [0, 1), so the result stays inside the box.
            bounds.min + t * size
        })
        .collect();
    let velocities = (0..count).map(|_| random_unit_vector(rng)).collect();
    (positions, velocities)
}

/// Uniformly distributed direction by rejection sampling in the unit ball.
pub fn random_unit_vector<R: Rng>(rng: &mut R) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let len2 = v.length_squared();
        if len2 > 1e-6 && len2 <= 1.0 {
            return v / len2.sqrt();
        }
    }
}
