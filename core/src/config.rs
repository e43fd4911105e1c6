//! Analysis configuration
//!
//! Every field has a default, so a JSON file only needs the values it
//! changes:
//!
//! ```json
//! { "dimensions": 2, "horizon": 12, "prune_criterion": "reach_unsafe" }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, MosaicError, StorageError};
use crate::geometry::check_precision;

/// Target set used when asking the model checker whether a state matters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneCriterion {
    /// Probability of reaching the state itself from the root
    #[default]
    ReachFromRoot,
    /// Probability of reaching a terminal state from the state
    ReachUnsafe,
}

/// Tunables of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub dimensions: usize,
    /// Decimal digits kept by canonicalization
    pub precision: u32,
    pub containment_epsilon: f64,
    /// Boxes with any width at or below this are discarded
    pub negligible_width: f64,
    /// Absolute tolerance of every area-conservation check
    pub area_tolerance: f64,
    pub relevance_threshold: f64,
    /// Maximum number of timesteps
    pub horizon: u32,
    pub workers: usize,
    pub complement_chunk_size: usize,
    pub step_chunk_size: usize,
    pub poll_interval_ms: u64,
    /// Model checker runs every this many timesteps; zero disables pruning
    pub prune_every: u32,
    pub prune_criterion: PruneCriterion,
    /// Classify/complement rounds allowed per timestep
    pub max_refinements: usize,
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            dimensions: 1,
            precision: 3,
            containment_epsilon: 1e-9,
            negligible_width: 1e-6,
            area_tolerance: 1e-8,
            relevance_threshold: 1e-6,
            horizon: 7,
            workers: num_cpus::get().max(1),
            complement_chunk_size: 300,
            step_chunk_size: 100,
            poll_interval_ms: 500,
            prune_every: 1,
            prune_criterion: PruneCriterion::default(),
            max_refinements: 16,
            checkpoint_dir: None,
        }
    }
}

impl AnalysisConfig {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            ..Self::default()
        }
    }

    /// Reads and validates a JSON configuration file
    pub fn from_json_file(path: &Path) -> Result<Self, MosaicError> {
        if !path.exists() {
            return Err(StorageError::MissingFile(path.to_path_buf()).into());
        }
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(StorageError::from)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions == 0 {
            return Err(ConfigError::InvalidDimensions(self.dimensions));
        }
        check_precision(self.precision)?;

        let non_negative = [
            ("containment_epsilon", self.containment_epsilon),
            ("negligible_width", self.negligible_width),
            ("area_tolerance", self.area_tolerance),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: format!("must be finite and non-negative, got {}", value),
                });
            }
        }
        if !(0.0..=1.0).contains(&self.relevance_threshold) {
            return Err(ConfigError::InvalidParameter {
                name: "relevance_threshold",
                reason: format!("must lie in [0, 1], got {}", self.relevance_threshold),
            });
        }

        let positive = [
            ("workers", self.workers),
            ("complement_chunk_size", self.complement_chunk_size),
            ("step_chunk_size", self.step_chunk_size),
            ("max_refinements", self.max_refinements),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidParameter {
                    name,
                    reason: "must be positive".to_string(),
                });
            }
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "poll_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Whether the model checker runs after `timestep`
    pub fn prunes_at(&self, timestep: u32) -> bool {
        self.prune_every > 0 && timestep % self.prune_every == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.precision, 3);
        assert_eq!(config.horizon, 7);
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert!(config.workers >= 1);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "dimensions": 2, "prune_criterion": "reach_unsafe", "prune_every": 3 }}"#).unwrap();

        let config = AnalysisConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.dimensions, 2);
        assert_eq!(config.prune_criterion, PruneCriterion::ReachUnsafe);
        assert_eq!(config.complement_chunk_size, 300);
        assert!(config.prunes_at(3) && !config.prunes_at(4));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let zero_dims = AnalysisConfig::with_dimensions(0);
        assert_eq!(zero_dims.validate(), Err(ConfigError::InvalidDimensions(0)));

        let config = AnalysisConfig {
            relevance_threshold: 1.5,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidParameter { name: "relevance_threshold", .. })
        ));

        let config = AnalysisConfig {
            step_chunk_size: 0,
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_pruning() {
        let config = AnalysisConfig {
            prune_every: 0,
            ..AnalysisConfig::default()
        };
        assert!(!config.prunes_at(0));
    }
}
