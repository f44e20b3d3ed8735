//! # Trained Model Artifact
//!
//! A [`TrainedModel`] is the immutable product of one training run: the fitted
//! preprocessor and forest ([`FittedPipeline`]) plus a [`ModelMetadata`] record
//! describing the feature contract. The two are persisted as separate TOML
//! files so serving code can rebuild features from the metadata alone, without
//! deserializing the forest.

use crate::features::{
    CategoricalFeature, EngineeredRecord, FEATURE_SCHEMA_VERSION, InteractionMode, NumericFeature,
};
use crate::forest::{ForestError, RandomForest};
use crate::preprocess::{FeatureContract, FittedPreprocessor, PreprocessError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Forest(#[from] ForestError),
    #[error("Model metadata does not match the fitted pipeline: {0}")]
    Inconsistent(String),
}

/// Monotonic transform applied to the target before fitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetTransform {
    #[default]
    None,
    Log1p,
}

impl TargetTransform {
    /// `Log1p` when the target's |skewness| exceeds `threshold`.
    pub fn for_skewness(skewness: f64, threshold: f64) -> Self {
        if skewness.abs() > threshold {
            TargetTransform::Log1p
        } else {
            TargetTransform::None
        }
    }

    pub fn forward(self, y: f64) -> f64 {
        match self {
            TargetTransform::None => y,
            TargetTransform::Log1p => y.ln_1p(),
        }
    }

    pub fn inverse(self, y: f64) -> f64 {
        match self {
            TargetTransform::None => y,
            TargetTransform::Log1p => y.exp_m1(),
        }
    }
}

/// The structured feature record stored next to every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Assigned by the registry when the artifact is written.
    pub model_id: Option<String>,
    pub experiment: String,
    pub schema_version: u32,
    pub interaction: InteractionMode,
    pub target_transform: TargetTransform,
    /// Raw input columns the model consumes, numeric then categorical.
    pub feature_columns: Vec<String>,
    /// Columns of the encoded matrix the forest was fitted on.
    pub encoded_columns: Vec<String>,
    pub numeric_features: Vec<NumericFeature>,
    pub categorical_features: Vec<CategoricalFeature>,
    /// Training vocabulary per categorical feature.
    pub vocabularies: BTreeMap<String, Vec<String>>,
}

impl ModelMetadata {
    pub fn describe(
        experiment: &str,
        interaction: InteractionMode,
        target_transform: TargetTransform,
        preprocessor: &FittedPreprocessor,
    ) -> Self {
        let contract = &preprocessor.contract;
        let vocabularies = contract
            .categorical
            .iter()
            .zip(&preprocessor.vocabularies)
            .map(|(f, vocab)| (f.as_str().to_string(), vocab.clone()))
            .collect();
        Self {
            model_id: None,
            experiment: experiment.to_string(),
            schema_version: FEATURE_SCHEMA_VERSION,
            interaction,
            target_transform,
            feature_columns: contract.feature_columns(),
            encoded_columns: preprocessor.output_columns(),
            numeric_features: contract.numeric.clone(),
            categorical_features: contract.categorical.clone(),
            vocabularies,
        }
    }

    pub fn contract(&self) -> FeatureContract {
        FeatureContract {
            numeric: self.numeric_features.clone(),
            categorical: self.categorical_features.clone(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        internal::write_toml(self, path, true)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        internal::read_toml(path)
    }
}

/// Fitted scaler/encoder followed by the forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPipeline {
    pub preprocessor: FittedPreprocessor,
    pub forest: RandomForest,
}

impl FittedPipeline {
    /// Predictions on the scale the forest was fitted on.
    pub fn predict_raw(&self, records: &[EngineeredRecord]) -> Result<Vec<f64>, ModelError> {
        let x = self.preprocessor.transform(records)?;
        Ok(self.forest.predict(x.view())?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        // Thousands of node arrays: keep them on one line each.
        internal::write_toml(self, path, false)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        internal::read_toml(path)
    }
}

/// The top-level, self-contained, trained model artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub metadata: ModelMetadata,
    pub pipeline: FittedPipeline,
}

impl TrainedModel {
    pub fn new(metadata: ModelMetadata, pipeline: FittedPipeline) -> Result<Self, ModelError> {
        let model = Self { metadata, pipeline };
        model.check_consistency()?;
        Ok(model)
    }

    /// Predictions in original currency units.
    pub fn predict_records(&self, records: &[EngineeredRecord]) -> Result<Vec<f64>, ModelError> {
        let transform = self.metadata.target_transform;
        let raw = self.pipeline.predict_raw(records)?;
        Ok(raw.into_iter().map(|y| transform.inverse(y)).collect())
    }

    /// Verifies that the metadata record describes the pipeline it ships with.
    pub fn check_consistency(&self) -> Result<(), ModelError> {
        let pre = &self.pipeline.preprocessor;
        if self.metadata.contract() != pre.contract {
            return Err(ModelError::Inconsistent(
                "feature lists differ from the preprocessor's contract".into(),
            ));
        }
        if self.metadata.encoded_columns != pre.output_columns() {
            return Err(ModelError::Inconsistent(
                "encoded column list differs from the preprocessor's output".into(),
            ));
        }
        if self.pipeline.forest.n_features != pre.n_output_columns() {
            return Err(ModelError::Inconsistent(format!(
                "forest expects {} columns, preprocessor produces {}",
                self.pipeline.forest.n_features,
                pre.n_output_columns()
            )));
        }
        self.pipeline.forest.validate()?;
        for (feature, vocab) in pre.contract.categorical.iter().zip(&pre.vocabularies) {
            if self.metadata.vocabularies.get(feature.as_str()) != Some(vocab) {
                return Err(ModelError::Inconsistent(format!(
                    "vocabulary for '{feature}' differs from the preprocessor's"
                )));
            }
        }
        Ok(())
    }

    pub fn save(&self, dir: &Path) -> Result<(), ModelError> {
        self.pipeline.save(&dir.join(PIPELINE_FILE))?;
        self.metadata.save(&dir.join(METADATA_FILE))
    }

    pub fn load(dir: &Path) -> Result<Self, ModelError> {
        let metadata = ModelMetadata::load(&dir.join(METADATA_FILE))?;
        let pipeline = FittedPipeline::load(&dir.join(PIPELINE_FILE))?;
        Self::new(metadata, pipeline)
    }
}

pub const PIPELINE_FILE: &str = "pipeline.toml";
pub const METADATA_FILE: &str = "metadata.toml";

pub(crate) mod internal {
    use super::*;

    /// Serializes `value` to `path` and flushes it to disk before returning.
    pub(crate) fn write_toml<T: Serialize>(
        value: &T,
        path: &Path,
        pretty: bool,
    ) -> Result<(), ModelError> {
        let toml_string = if pretty {
            toml::to_string_pretty(value)?
        } else {
            toml::to_string(value)?
        };
        let file = fs::File::create(path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(toml_string.as_bytes())?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        Ok(())
    }

    pub(crate) fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}
