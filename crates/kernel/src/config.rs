//! Tunable parameter block and its validation.
//!
//! A [`SimulationConfig`] is owned by the caller and passed by reference into
//! every step. Backends read it but never write it; changing a tunable between
//! steps takes effect on the next step. `particle_count` and `subdivisions`
//! size the backend's buffers and are captured when the backend is built.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::boundary::Bounds;

/// Work-group width of the compute backend. Particle counts must be a
/// multiple of it, which a power of two at least this large always is.
pub const WORKGROUP_SIZE: u32 = 256;

/// Gravitational acceleration magnitude (m/s^2), applied along `-UP`.
pub const GRAVITY: f32 = 9.81;

/// How particles that left the box are brought back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Reflect the velocity only.
    #[default]
    Reflect,
    /// Undo the last position update (`pos -= vel * step`), then reflect.
    StepBack,
}

impl CollisionPolicy {
    /// Encoding used in the GPU parameter block.
    pub fn as_u32(self) -> u32 {
        match self {
            CollisionPolicy::Reflect => 0,
            CollisionPolicy::StepBack => 1,
        }
    }
}

/// Configuration errors. All of them are reported at backend construction.
#[derive(Debug, Error, PartialEq)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("particle count must be non-zero")]
    NoParticles,
    #[error("particle count {0} is not a power of two")]
    ParticleCountNotPowerOfTwo(u32),
    #[error("particle count {count} is below the work-group size {min}")]
    ParticleCountBelowWorkgroup { count: u32, min: u32 },
    #[error("subdivisions {0} must be a power of two >= 1")]
    InvalidSubdivisions(u32),
    #[error("bounds are empty or not finite: min {min:?}, max {max:?}")]
    InvalidBounds { min: [f32; 3], max: [f32; 3] },
    #[error("{name} must be {requirement}, got {value}")]
    InvalidTunable {
        name: &'static str,
        requirement: &'static str,
        value: f32,
    },
}

/// A parameter that can be scaled between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tunable {
    /// [`SimulationConfig::step`]
    Step,
    /// [`SimulationConfig::h`]
    H,
    /// [`SimulationConfig::mass`]
    Mass,
    /// [`SimulationConfig::rest_density`]
    RestDensity,
    /// [`SimulationConfig::stiffness`]
    Stiffness,
    /// [`SimulationConfig::viscosity`]
    Viscosity,
}

impl Tunable {
    /// Every tunable, in display order.
    pub const ALL: [Tunable; 6] = [
        Tunable::Step,
        Tunable::H,
        Tunable::Mass,
        Tunable::RestDensity,
        Tunable::Stiffness,
        Tunable::Viscosity,
    ];

    /// Field name as it appears in configuration files.
    pub fn name(self) -> &'static str {
        match self {
            Tunable::Step => "step",
            Tunable::H => "h",
            Tunable::Mass => "mass",
            Tunable::RestDensity => "rest_density",
            Tunable::Stiffness => "stiffness",
            Tunable::Viscosity => "viscosity",
        }
    }
}

/// SPH parameter block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Integration time delta (s).
    #[serde(default = "default_step")]
    pub step: f32,
    /// Kernel support radius.
    #[serde(default = "default_h")]
    pub h: f32,
    /// Mass of every particle.
    #[serde(default = "default_mass")]
    pub mass: f32,
    /// Density at which pressure is zero.
    #[serde(default = "default_rest_density")]
    pub rest_density: f32,
    /// Pressure stiffness `k` in `p = k (rho - rho0)`.
    #[serde(default = "default_stiffness")]
    pub stiffness: f32,
    /// Viscosity coefficient.
    #[serde(default = "default_viscosity")]
    pub viscosity: f32,
    /// Grid cells per axis; the grid has `subdivisions^3` cells.
    #[serde(default = "default_subdivisions")]
    pub subdivisions: u32,
    /// Number of particles.
    #[serde(default = "default_particle_count")]
    pub particle_count: u32,
    /// Seed for particle placement on reset.
    #[serde(default)]
    pub seed: u64,
    /// Wall response.
    #[serde(default)]
    pub collision: CollisionPolicy,
}

fn default_step() -> f32 {
    0.005
}

fn default_h() -> f32 {
    0.1
}

fn default_mass() -> f32 {
    32.0
}

fn default_rest_density() -> f32 {
    1.0
}

fn default_stiffness() -> f32 {
    2.4
}

fn default_viscosity() -> f32 {
    2048.0
}

fn default_subdivisions() -> u32 {
    8
}

fn default_particle_count() -> u32 {
    8192
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step: default_step(),
            h: default_h(),
            mass: default_mass(),
            rest_density: default_rest_density(),
            stiffness: default_stiffness(),
            viscosity: default_viscosity(),
            subdivisions: default_subdivisions(),
            particle_count: default_particle_count(),
            seed: 0,
            collision: CollisionPolicy::default(),
        }
    }
}

impl SimulationConfig {
    /// Check every field. Backends call this before allocating anything.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let n = self.particle_count;
        if n == 0 {
            return Err(ConfigError::NoParticles);
        }
        if !n.is_power_of_two() {
            return Err(ConfigError::ParticleCountNotPowerOfTwo(n));
        }
        if n < WORKGROUP_SIZE {
            return Err(ConfigError::ParticleCountBelowWorkgroup {
                count: n,
                min: WORKGROUP_SIZE,
            });
        }
        if !self.subdivisions.is_power_of_two() {
            return Err(ConfigError::InvalidSubdivisions(self.subdivisions));
        }

        positive("step", self.step)?;
        positive("h", self.h)?;
        positive("mass", self.mass)?;
        non_negative("rest_density", self.rest_density)?;
        non_negative("stiffness", self.stiffness)?;
        non_negative("viscosity", self.viscosity)?;
        Ok(())
    }

    /// Current value of a tunable.
    pub fn get(&self, tunable: Tunable) -> f32 {
        match tunable {
            Tunable::Step => self.step,
            Tunable::H => self.h,
            Tunable::Mass => self.mass,
            Tunable::RestDensity => self.rest_density,
            Tunable::Stiffness => self.stiffness,
            Tunable::Viscosity => self.viscosity,
        }
    }

    /// Multiply a tunable by `factor` and return the new value.
    ///
    /// Halving and doubling are the usual adjustments.
    pub fn scale(&mut self, tunable: Tunable, factor: f32) -> f32 {
        let slot = match tunable {
            Tunable::Step => &mut self.step,
            Tunable::H => &mut self.h,
            Tunable::Mass => &mut self.mass,
            Tunable::RestDensity => &mut self.rest_density,
            Tunable::Stiffness => &mut self.stiffness,
            Tunable::Viscosity => &mut self.viscosity,
        };
        *slot *= factor;
        *slot
    }

    /// Edge length of one grid cell along each axis.
    pub fn cell_size(&self, bounds: &Bounds) -> [f32; 3] {
        let size = bounds.size() / self.subdivisions as f32;
        size.to_array()
    }
}

fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidTunable {
            name,
            requirement: "finite and > 0",
            value,
        })
    }
}

fn non_negative(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidTunable {
            name,
            requirement: "finite and >= 0",
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(SimulationConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_particles_rejected() {
        let cfg = SimulationConfig {
            particle_count: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::NoParticles));
    }

    #[test]
    fn non_power_of_two_count_rejected() {
        let cfg = SimulationConfig {
            particle_count: 1000,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::ParticleCountNotPowerOfTwo(1000)));
    }

    #[test]
    fn count_below_workgroup_rejected() {
        let cfg = SimulationConfig {
            particle_count: 128,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ParticleCountBelowWorkgroup {
                count: 128,
                min: WORKGROUP_SIZE,
            })
        );
    }

    #[test]
    fn subdivisions_checked() {
        let cfg = SimulationConfig {
            subdivisions: 0,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSubdivisions(0)));
        let cfg = SimulationConfig {
            subdivisions: 6,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidSubdivisions(6)));
        let cfg = SimulationConfig {
            subdivisions: 1,
            ..Default::default()
        };
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn non_finite_tunable_rejected() {
        let cfg = SimulationConfig {
            h: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidTunable { name: "h", .. })
        ));
        let cfg = SimulationConfig {
            stiffness: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::InvalidTunable { name: "stiffness", .. })
        ));
    }

    #[test]
    fn scale_halves_and_doubles() {
        let mut cfg = SimulationConfig::default();
        assert_eq!(cfg.scale(Tunable::Viscosity, 0.5), 1024.0);
        assert_eq!(cfg.scale(Tunable::Step, 2.0), 0.01);
        assert_eq!(cfg.get(Tunable::Viscosity), 1024.0);
        assert_eq!(cfg.get(Tunable::Mass), 32.0);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: SimulationConfig =
            serde_json::from_str(r#"{ "particle_count": 1024, "collision": "step_back" }"#)
                .unwrap();
        assert_eq!(cfg.particle_count, 1024);
        assert_eq!(cfg.h, 0.1);
        assert_eq!(cfg.collision, CollisionPolicy::StepBack);
    }
}
