//! Training configuration, loadable from a (possibly partial) TOML file.

use crate::features::{CategoricalFeature, InteractionMode, NumericFeature};
use crate::forest::ForestParams;
use crate::preprocess::FeatureContract;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse TOML config: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Shuffled k-fold settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossValidationConfig {
    pub folds: usize,
    pub shuffle_seed: u64,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            shuffle_seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub experiment: String,
    pub forest: ForestParams,
    pub cross_validation: CrossValidationConfig,
    /// Pooled held-out R² a candidate must exceed to be promoted.
    pub acceptance_threshold: f64,
    /// |skewness| of the target above which the model is fitted on `log1p(cost)`.
    pub skew_threshold: f64,
    pub interaction: InteractionMode,
    /// Whether the interaction terms are fed to the scaler alongside the base numerics.
    pub include_interactions: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            experiment: "cost_prediction".to_string(),
            forest: ForestParams::default(),
            cross_validation: CrossValidationConfig::default(),
            acceptance_threshold: 0.85,
            skew_threshold: 1.0,
            interaction: InteractionMode::Smoker,
            include_interactions: true,
        }
    }
}

impl TrainingConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.experiment.trim().is_empty() {
            return Err(ConfigError::Invalid("experiment name must not be empty".into()));
        }
        if self.experiment.contains(['/', '\\']) || self.experiment.starts_with('.') {
            return Err(ConfigError::Invalid(format!(
                "experiment name '{}' cannot be used in an artifact path",
                self.experiment
            )));
        }
        if self.cross_validation.folds < 2 {
            return Err(ConfigError::Invalid(format!(
                "cross-validation needs at least 2 folds, got {}",
                self.cross_validation.folds
            )));
        }
        if !self.acceptance_threshold.is_finite() || !self.skew_threshold.is_finite() {
            return Err(ConfigError::Invalid("thresholds must be finite".into()));
        }
        self.forest
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// The column contract a model trained with this configuration consumes.
    pub fn feature_contract(&self) -> FeatureContract {
        let mut numeric = NumericFeature::BASE.to_vec();
        if self.include_interactions {
            numeric.extend_from_slice(self.interaction.interaction_features());
        }
        FeatureContract {
            numeric,
            categorical: CategoricalFeature::ALL.to_vec(),
        }
    }
}
