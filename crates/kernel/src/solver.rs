//! Density, force, and integration passes over sorted particle data.
//!
//! All functions here expect positions and velocities in the order produced
//! by [`SpatialIndex::rebuild`], and an index built from those positions.

use glam::Vec3;

use crate::config::{SimulationConfig, GRAVITY};
use crate::grid::{GridLayout, SpatialIndex};
use crate::kernels::{w_density, w_pressure_gradient, w_viscosity_laplacian};

/// World up direction; gravity acts along `-UP`.
pub const UP: Vec3 = Vec3::Y;

/// Density summation.
///
/// ```text
/// rho_i = m + sum_j m * W(x_i - x_j, h)     j over the 27-cell neighborhood, j = i included
/// ```
///
/// The leading `m` keeps every density at least `m`, so divisions by density
/// are always safe.
pub fn compute_densities(
    layout: &GridLayout,
    index: &SpatialIndex,
    positions: &[Vec3],
    config: &SimulationConfig,
    densities: &mut [f32],
) {
    debug_assert_eq!(positions.len(), densities.len());
    let (h, m) = (config.h, config.mass);
    for (i, &pi) in positions.iter().enumerate() {
        let mut rho = m;
        index.for_each_neighbor(layout, pi, |j| {
            rho += m * w_density(pi - positions[j], h);
        });
        debug_assert!(rho >= m, "density {rho} below particle mass {m} at particle {i}");
        densities[i] = rho;
    }
}

/// Linear equation of state `p = k (rho - rho0)`.
#[inline]
pub fn pressure(config: &SimulationConfig, density: f32) -> f32 {
    config.stiffness * (density - config.rest_density)
}

/// Total acceleration on particle `i`: pressure, viscosity, and gravity
/// forces divided by the particle's density.
///
/// ```text
/// f_p  = -sum_j m (p_i + p_j) / (2 rho_j) * gradW(x_i - x_j)
/// f_v  =  sum_j mu m (v_j - v_i) / rho_j * lapW(x_i - x_j)
/// f_g  = -UP * g * rho_i
/// a_i  = (f_p + f_v + f_g) / rho_i
/// ```
pub fn acceleration(
    i: usize,
    layout: &GridLayout,
    index: &SpatialIndex,
    positions: &[Vec3],
    velocities: &[Vec3],
    densities: &[f32],
    config: &SimulationConfig,
) -> Vec3 {
    let (h, m, mu) = (config.h, config.mass, config.viscosity);
    let pi = positions[i];
    let vi = velocities[i];
    let rho_i = densities[i];
    let p_i = pressure(config, rho_i);

    let mut f_pressure = Vec3::ZERO;
    let mut f_viscosity = Vec3::ZERO;
    index.for_each_neighbor(layout, pi, |j| {
        let r = pi - positions[j];
        let rho_j = densities[j];
        let p_j = pressure(config, rho_j);
        f_pressure -= m * (p_i + p_j) / (2.0 * rho_j) * w_pressure_gradient(r, h);
        f_viscosity += (velocities[j] - vi) * (mu * m / rho_j * w_viscosity_laplacian(r, h));
    });
    let f_gravity = -UP * GRAVITY * rho_i;

    (f_pressure + f_viscosity + f_gravity) / rho_i
}

/// Explicit Euler step of every particle into the output slices.
///
/// ```text
/// x' = x + v dt
/// v' = v + a dt
/// ```
///
/// Returns the number of particles whose new state is not finite.
#[allow(clippy::too_many_arguments)]
pub fn integrate(
    layout: &GridLayout,
    index: &SpatialIndex,
    positions: &[Vec3],
    velocities: &[Vec3],
    densities: &[f32],
    config: &SimulationConfig,
    out_positions: &mut [Vec3],
    out_velocities: &mut [Vec3],
) -> usize {
    let dt = config.step;
    let mut non_finite = 0;
    for i in 0..positions.len() {
        let a = acceleration(i, layout, index, positions, velocities, densities, config);
        debug_assert!(a.is_finite(), "non-finite acceleration {a} at particle {i}");
        out_positions[i] = positions[i] + velocities[i] * dt;
        out_velocities[i] = velocities[i] + a * dt;
        if !(out_positions[i].is_finite() && out_velocities[i].is_finite()) {
            non_finite += 1;
        }
    }
    non_finite
}
