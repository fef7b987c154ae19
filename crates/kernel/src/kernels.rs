//! Smoothing kernels shared by both backends.
//!
//! Müller et al. (2003) kernel set: poly6 for density, the spiky gradient for
//! pressure, and the viscosity Laplacian. Every kernel has compact support of
//! radius `h` and evaluates to exactly zero beyond it. The WGSL versions in
//! `gpu/shaders/sph.wgsl` mirror these operation-for-operation.

use std::f32::consts::PI;

use glam::Vec3;

/// Poly6 normalization numerator: 315 / (64 pi).
const POLY6_NORM: f32 = 315.0 / (64.0 * PI);

/// Spiky gradient and viscosity Laplacian numerator: 45 / pi.
const SPIKY_NORM: f32 = 45.0 / PI;

/// `h^6` and `h^9` by repeated multiplication, matching the shader.
#[inline]
fn h6_h9(h: f32) -> (f32, f32) {
    let h3 = h * h * h;
    let h6 = h3 * h3;
    (h6, h6 * h3)
}

/// Poly6 density kernel.
///
/// ```text
/// W(r, h) = 315 / (64 pi h^9) * (h^2 - |r|^2)^3    for |r| <= h
/// W(r, h) = 0                                       for |r| > h
/// ```
///
/// Finite at `r = 0`, so self-contributions are well defined.
#[inline]
pub fn w_density(r: Vec3, h: f32) -> f32 {
    let r2 = r.length_squared();
    if r2.sqrt() > h {
        return 0.0;
    }
    let (_, h9) = h6_h9(h);
    let d = h * h - r2;
    POLY6_NORM / h9 * d * d * d
}

/// Gradient of the spiky pressure kernel.
///
/// ```text
/// grad W(r, h) = -45 / (pi h^6) * (h - |r|)^2 * r / |r|    for 0 < |r| <= h
/// grad W(r, h) = 0                                          otherwise
/// ```
///
/// The gradient points from `r` back toward the origin; callers subtract it
/// so that positive pressure pushes particles apart. Coincident particles
/// (`r = 0`) get a zero gradient instead of a singular direction.
#[inline]
pub fn w_pressure_gradient(r: Vec3, h: f32) -> Vec3 {
    let len = r.length();
    if len <= 0.0 || len > h {
        return Vec3::ZERO;
    }
    let (h6, _) = h6_h9(h);
    let d = h - len;
    r * (-SPIKY_NORM / h6 * d * d / len)
}

/// Laplacian of the viscosity kernel.
///
/// ```text
/// lap W(r, h) = 45 / (pi h^6) * (h - |r|)    for |r| <= h
/// lap W(r, h) = 0                             for |r| > h
/// ```
#[inline]
pub fn w_viscosity_laplacian(r: Vec3, h: f32) -> f32 {
    let len = r.length();
    if len > h {
        return 0.0;
    }
    let (h6, _) = h6_h9(h);
    SPIKY_NORM / h6 * (h - len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: f32 = 0.1;

    #[test]
    fn zero_beyond_support() {
        let r = Vec3::new(H * 1.01, 0.0, 0.0);
        assert_eq!(w_density(r, H), 0.0);
        assert_eq!(w_pressure_gradient(r, H), Vec3::ZERO);
        assert_eq!(w_viscosity_laplacian(r, H), 0.0);
    }

    #[test]
    fn continuous_at_support_radius() {
        let inside = Vec3::new(0.0, H * (1.0 - 1e-4), 0.0);
        let at = Vec3::new(0.0, H, 0.0);
        // Every kernel vanishes at |r| = h, so approaching from inside must go to zero.
        assert_eq!(w_density(at, H), 0.0);
        assert_eq!(w_viscosity_laplacian(at, H), 0.0);
        assert_eq!(w_pressure_gradient(at, H), Vec3::ZERO);

        let peak_density = w_density(Vec3::ZERO, H);
        assert!(w_density(inside, H) < peak_density * 1e-6);
        let peak_lap = w_viscosity_laplacian(Vec3::ZERO, H);
        assert!(w_viscosity_laplacian(inside, H) < peak_lap * 1e-3);
    }

    #[test]
    fn density_peak_value() {
        let expected = 315.0 / (64.0 * PI * H.powi(9)) * H.powi(6);
        let got = w_density(Vec3::ZERO, H);
        assert!((got - expected).abs() / expected < 1e-5, "got {got}, expected {expected}");
    }

    #[test]
    fn gradient_at_zero_is_zero() {
        assert_eq!(w_pressure_gradient(Vec3::ZERO, H), Vec3::ZERO);
    }

    #[test]
    fn gradient_points_toward_origin() {
        let r = Vec3::new(0.03, 0.0, 0.04);
        let g = w_pressure_gradient(r, H);
        assert!(g.dot(r) < 0.0);
        // Parallel to r.
        assert!(g.cross(r).length() < 1e-3 * g.length() * r.length());

        let expected_mag = 45.0 / (PI * H.powi(6)) * (H - 0.05) * (H - 0.05);
        assert!((g.length() - expected_mag).abs() / expected_mag < 1e-4);
    }

    #[test]
    fn density_kernel_normalization_numerical() {
        // Midpoint quadrature over the support sphere; should integrate to ~1.
        let n = 60;
        let dx = 2.0 * H / n as f32;
        let mut sum = 0.0_f64;
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    let r = Vec3::new(
                        -H + (i as f32 + 0.5) * dx,
                        -H + (j as f32 + 0.5) * dx,
                        -H + (k as f32 + 0.5) * dx,
                    );
                    sum += w_density(r, H) as f64;
                }
            }
        }
        let integral = sum * (dx as f64).powi(3);
        assert!((integral - 1.0).abs() < 0.02, "poly6 integral = {integral}");
    }
}
