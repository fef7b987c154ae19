//! Run file parsing and validation

use serde::{Deserialize, Serialize};
use sph_kernel::{Bounds, ConfigError, SimulationConfig, Tunable};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors while loading a run file
#[derive(Debug, Error)]
pub enum RunConfigError {
    /// The file could not be read
    #[error("failed to read run file {path}: {source}")]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The file is not valid JSON for a [`RunConfig`]
    #[error("failed to parse run file: {0}")]
    Json(#[from] serde_json::Error),
    /// Parameters rejected by the kernel
    #[error("invalid simulation parameters: {0}")]
    Invalid(#[from] ConfigError),
    /// Adjustment schedule problems
    #[error("adjustment {index}: {reason}")]
    Adjustment {
        /// Position in the schedule
        index: usize,
        /// What is wrong with it
        reason: &'static str,
    },
    /// `log_every` of zero
    #[error("log_every must be at least 1")]
    LogCadence,
}

/// Which backend executes the steps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Sequential reference backend
    #[default]
    Cpu,
    /// wgpu compute backend (needs the `gpu` feature)
    Gpu,
}

/// A scheduled change of one tunable, applied before step `at_step`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adjustment {
    /// Step index (0-based) before which the change is applied
    pub at_step: u64,
    /// Parameter to change
    pub tunable: Tunable,
    /// Multiplier; 0.5 and 2.0 halve and double
    pub factor: f32,
}

/// Headless run description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Human-readable run name
    #[serde(default = "default_name")]
    pub name: String,
    /// Container box
    #[serde(default)]
    pub bounds: Bounds,
    /// SPH parameter block
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Backend selection
    #[serde(default)]
    pub backend: BackendKind,
    /// Number of steps to run
    #[serde(default = "default_steps")]
    pub steps: u64,
    /// Log statistics every this many steps
    #[serde(default = "default_log_every")]
    pub log_every: u64,
    /// Tunable changes applied during the run
    #[serde(default)]
    pub adjustments: Vec<Adjustment>,
}

fn default_name() -> String {
    "sph".to_string()
}

fn default_steps() -> u64 {
    1000
}

fn default_log_every() -> u64 {
    100
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            bounds: Bounds::default(),
            simulation: SimulationConfig::default(),
            backend: BackendKind::default(),
            steps: default_steps(),
            log_every: default_log_every(),
            adjustments: Vec::new(),
        }
    }
}

impl RunConfig {
    /// Load and validate a run file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RunConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| RunConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&contents)?;
        tracing::info!(path = %path.display(), name = %config.name, "loaded run file");
        Ok(config)
    }

    /// Parse and validate a run description from JSON text
    pub fn from_json(contents: &str) -> Result<Self, RunConfigError> {
        let config: RunConfig = serde_json::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), RunConfigError> {
        self.bounds.validate()?;
        self.simulation.validate()?;

        if self.log_every == 0 {
            return Err(RunConfigError::LogCadence);
        }

        // The kernel re-checks the scaled block, but a bad factor is easier
        // to report against the schedule entry that carries it.
        for (index, adj) in self.adjustments.iter().enumerate() {
            if !adj.factor.is_finite() || adj.factor <= 0.0 {
                return Err(RunConfigError::Adjustment {
                    index,
                    reason: "factor must be finite and > 0",
                });
            }
            if adj.at_step >= self.steps {
                return Err(RunConfigError::Adjustment {
                    index,
                    reason: "at_step is past the end of the run",
                });
            }
        }
        Ok(())
    }

    /// Adjustments due before step `step`, in schedule order
    pub fn adjustments_at(&self, step: u64) -> impl Iterator<Item = &Adjustment> {
        self.adjustments.iter().filter(move |a| a.at_step == step)
    }
}
