use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{correspondence::OutlierRejection, index::IndexBackend, parallel::ExecutionStrategy};

/// Errors produced while loading or validating a [`RegistrationConfig`].
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The configuration is not valid JSON for this schema.
    #[error("failed to parse registration config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A parameter is out of range.
    #[error("invalid registration config: {0}")]
    Invalid(String),
}

/// What to do when the correspondence covariance does not pin down a rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankPolicy {
    /// Skip the iteration and keep the previous estimate.
    #[default]
    Skip,
    /// Apply the rotation anyway.
    Accept,
}

/// When the registration loop stops iterating on its own.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Keep refining for as long as the loop is active.
    #[default]
    Continuous,
    /// Stop once an update moves the estimate by less than both tolerances,
    /// or after `max_iterations` ticks.
    Converge {
        /// Upper bound on the number of iterations of a session.
        max_iterations: usize,
        /// Rotation change in radians under which an update counts as converged.
        rotation_tolerance: f64,
        /// Translation change under which an update counts as converged.
        translation_tolerance: f64,
    },
}

/// Tunable parameters of a registration session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    /// Spatial index built over the reference cloud.
    pub backend: IndexBackend,
    /// How nearest-neighbor queries are dispatched.
    pub execution: ExecutionStrategy,
    /// Which correspondences take part in the estimate.
    pub outlier_rejection: OutlierRejection,
    /// Minimum number of correspondences needed to estimate motion, at least 3.
    pub min_correspondences: usize,
    /// Handling of rank-deficient covariance matrices.
    pub rank_policy: RankPolicy,
    /// Singular values below `rank_tolerance` times the largest count as zero.
    pub rank_tolerance: f64,
    /// Termination policy.
    pub stop: StopPolicy,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            backend: IndexBackend::default(),
            execution: ExecutionStrategy::default(),
            outlier_rejection: OutlierRejection::default(),
            min_correspondences: 3,
            rank_policy: RankPolicy::default(),
            rank_tolerance: 1e-6,
            stop: StopPolicy::default(),
        }
    }
}

impl RegistrationConfig {
    /// Parse and validate a JSON config. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Check every parameter range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.execution
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.min_correspondences < 3 {
            return Err(ConfigError::Invalid(format!(
                "min_correspondences must be >= 3, got {}",
                self.min_correspondences
            )));
        }

        if !(0.0..1.0).contains(&self.rank_tolerance) {
            return Err(ConfigError::Invalid(format!(
                "rank_tolerance must be in [0, 1), got {}",
                self.rank_tolerance
            )));
        }

        match self.outlier_rejection {
            OutlierRejection::MaxDistance(d) if d.is_nan() || d < 0.0 => {
                return Err(ConfigError::Invalid(format!(
                    "max distance must be >= 0, got {d}"
                )));
            }
            OutlierRejection::MedianAbsoluteDeviation { k } if k.is_nan() || k < 0.0 => {
                return Err(ConfigError::Invalid(format!(
                    "MAD multiplier must be >= 0, got {k}"
                )));
            }
            _ => {}
        }

        if let StopPolicy::Converge {
            max_iterations,
            rotation_tolerance,
            translation_tolerance,
        } = self.stop
        {
            if max_iterations == 0 {
                return Err(ConfigError::Invalid(
                    "max_iterations must be > 0".to_string(),
                ));
            }
            if rotation_tolerance.is_nan()
                || translation_tolerance.is_nan()
                || rotation_tolerance < 0.0
                || translation_tolerance < 0.0
            {
                return Err(ConfigError::Invalid(format!(
                    "convergence tolerances must be >= 0, got {rotation_tolerance} and {translation_tolerance}"
                )));
            }
        }

        Ok(())
    }
}
