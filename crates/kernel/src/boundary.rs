//! Container box and elastic wall collisions.
//!
//! The box doubles as the domain of the spatial grid. A particle that ends a
//! step outside the box has its velocity mirrored about the normal of the
//! first violated face, tested in the order -x, +x, -y, +y, -z, +z.

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::config::{CollisionPolicy, ConfigError};

/// Axis-aligned container box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Minimum corner.
    pub min: Vec3,
    /// Maximum corner.
    pub max: Vec3,
}

impl Default for Bounds {
    fn default() -> Self {
        Self::from_size(Vec3::splat(2.0))
    }
}

impl Bounds {
    /// Box spanning `[min, max]`.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box spanning `[0, size]`.
    pub fn from_size(size: Vec3) -> Self {
        Self {
            min: Vec3::ZERO,
            max: size,
        }
    }

    /// Edge lengths.
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Rejects boxes with a non-positive or non-finite extent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let size = self.size();
        if self.min.is_finite() && self.max.is_finite() && size.min_element() > 0.0 {
            Ok(())
        } else {
            Err(ConfigError::InvalidBounds {
                min: self.min.to_array(),
                max: self.max.to_array(),
            })
        }
    }

    /// Closed containment test.
    pub fn contains(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// First face that `p` lies beyond, in priority order.
    pub fn violated_face(&self, p: Vec3) -> Option<Face> {
        Face::PRIORITY.into_iter().find(|face| match face {
            Face::MinX => p.x < self.min.x,
            Face::MaxX => p.x > self.max.x,
            Face::MinY => p.y < self.min.y,
            Face::MaxY => p.y > self.max.y,
            Face::MinZ => p.z < self.min.z,
            Face::MaxZ => p.z > self.max.z,
        })
    }
}

/// One of the six walls of the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Face {
    MinX,
    MaxX,
    MinY,
    MaxY,
    MinZ,
    MaxZ,
}

impl Face {
    /// Order in which faces are tested; the first violated face wins.
    pub const PRIORITY: [Face; 6] = [
        Face::MinX,
        Face::MaxX,
        Face::MinY,
        Face::MaxY,
        Face::MinZ,
        Face::MaxZ,
    ];

    /// Unit wall normal pointing into the box.
    pub fn normal(self) -> Vec3 {
        match self {
            Face::MinX => Vec3::X,
            Face::MaxX => Vec3::NEG_X,
            Face::MinY => Vec3::Y,
            Face::MaxY => Vec3::NEG_Y,
            Face::MinZ => Vec3::Z,
            Face::MaxZ => Vec3::NEG_Z,
        }
    }
}

/// Elastic reflection of `velocity` off a wall with inward normal `normal`.
///
/// ```text
/// d  = -v / |v|
/// v' = (2 (d . n) n - d) |v|
/// ```
///
/// Returns `None` when the velocity is zero, not finite, or already points
/// into the box (`v . n >= 0`); the velocity is then left as is.
pub fn reflect(velocity: Vec3, normal: Vec3) -> Option<Vec3> {
    let speed = velocity.length();
    if !(speed > 0.0 && speed.is_finite()) || velocity.dot(normal) >= 0.0 {
        return None;
    }
    let d = -velocity / speed;
    Some((2.0 * d.dot(normal) * normal - d) * speed)
}

/// Apply wall collisions to every particle.
///
/// With [`CollisionPolicy::StepBack`] a reflected particle first has its
/// last position update undone using its current velocity.
///
/// Positions are not clamped. Under [`CollisionPolicy::Reflect`] a particle
/// ends the step up to `|v| * step` outside the wall it crossed and moves
/// back in on the next step. Only the first violated face is handled, so a
/// particle crossing a corner can sink one more step through the other face.
/// Under [`CollisionPolicy::StepBack`] the overshoot is the velocity change
/// of the step times `step`.
///
/// Returns the number of particles that were reflected.
pub fn collide(
    positions: &mut [Vec3],
    velocities: &mut [Vec3],
    bounds: &Bounds,
    step: f32,
    policy: CollisionPolicy,
) -> usize {
    debug_assert_eq!(positions.len(), velocities.len());
    let mut reflected = 0;
    for (p, v) in positions.iter_mut().zip(velocities.iter_mut()) {
        let Some(face) = bounds.violated_face(*p) else {
            continue;
        };
        let Some(v_new) = reflect(*v, face.normal()) else {
            continue;
        };
        if policy == CollisionPolicy::StepBack {
            *p -= *v * step;
        }
        *v = v_new;
        reflected += 1;
    }
    reflected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Bounds {
        Bounds::from_size(Vec3::ONE)
    }

    #[test]
    fn inside_has_no_violation() {
        let b = unit_box();
        assert_eq!(b.violated_face(Vec3::splat(0.5)), None);
        assert_eq!(b.violated_face(Vec3::ZERO), None);
        assert_eq!(b.violated_face(Vec3::ONE), None);
    }

    #[test]
    fn face_priority_order() {
        let b = unit_box();
        // Outside through -x and -y at once: -x wins.
        assert_eq!(b.violated_face(Vec3::new(-0.1, -0.1, 0.5)), Some(Face::MinX));
        // +y and -z at once: +y wins.
        assert_eq!(b.violated_face(Vec3::new(0.5, 1.1, -0.1)), Some(Face::MaxY));
        assert_eq!(b.violated_face(Vec3::new(0.5, 0.5, 1.1)), Some(Face::MaxZ));
    }

    #[test]
    fn reflection_preserves_speed_and_heads_inward() {
        let n = Face::MinY.normal();
        for v in [
            Vec3::new(0.0, -2.0, 0.0),
            Vec3::new(0.3, -0.4, 0.5),
            Vec3::new(-1.0, -0.01, 2.0),
        ] {
            let r = reflect(v, n).unwrap();
            assert!((r.length() - v.length()).abs() < 1e-5);
            assert!(r.dot(n) >= 0.0);
            // Tangential part is unchanged.
            assert!((r.x - v.x).abs() < 1e-5 && (r.z - v.z).abs() < 1e-5);
        }
    }

    #[test]
    fn degenerate_velocities_untouched() {
        let n = Face::MaxX.normal();
        assert_eq!(reflect(Vec3::ZERO, n), None);
        assert_eq!(reflect(Vec3::new(f32::NAN, 0.0, 0.0), n), None);
        assert_eq!(reflect(Vec3::new(f32::INFINITY, 0.0, 0.0), n), None);
        // Already heading back in.
        assert_eq!(reflect(Vec3::new(-1.0, 0.0, 0.0), n), None);
    }

    #[test]
    fn collide_reflects_escaping_particle() {
        let b = unit_box();
        let mut pos = vec![Vec3::new(0.5, -0.01, 0.5), Vec3::splat(0.5)];
        let mut vel = vec![Vec3::new(0.0, -1.0, 0.0), Vec3::new(0.0, -1.0, 0.0)];
        let n = collide(&mut pos, &mut vel, &b, 0.01, CollisionPolicy::Reflect);
        assert_eq!(n, 1);
        assert_eq!(vel[0], Vec3::new(0.0, 1.0, 0.0));
        assert_eq!(pos[0], Vec3::new(0.5, -0.01, 0.5));
        assert_eq!(vel[1], Vec3::new(0.0, -1.0, 0.0));
    }

    #[test]
    fn corner_crossing_reflects_first_face_only() {
        let b = unit_box();
        let mut pos = vec![Vec3::new(-0.01, -0.01, 0.5)];
        let mut vel = vec![Vec3::new(-1.0, -1.0, 0.0)];
        collide(&mut pos, &mut vel, &b, 0.01, CollisionPolicy::Reflect);
        assert!((vel[0] - Vec3::new(1.0, -1.0, 0.0)).length() < 1e-5);
        // Still heading down through the floor; the next step sinks further.
        assert_eq!(pos[0], Vec3::new(-0.01, -0.01, 0.5));
    }

    #[test]
    fn step_back_undoes_last_move() {
        let b = unit_box();
        let mut pos = vec![Vec3::new(0.5, -0.01, 0.5)];
        let mut vel = vec![Vec3::new(0.0, -1.0, 0.0)];
        collide(&mut pos, &mut vel, &b, 0.02, CollisionPolicy::StepBack);
        assert!((pos[0].y - 0.01).abs() < 1e-6);
        assert_eq!(vel[0], Vec3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn invalid_bounds_rejected() {
        assert!(unit_box().validate().is_ok());
        assert!(Bounds::new(Vec3::ONE, Vec3::ONE).validate().is_err());
        assert!(Bounds::new(Vec3::ZERO, Vec3::new(1.0, f32::NAN, 1.0)).validate().is_err());
    }
}
