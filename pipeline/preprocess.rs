//! # Preprocessing: Standard Scaling and Baseline One-Hot Encoding
//!
//! Fits once on training rows and is reused unchanged at prediction time. The
//! output column order is the contract between this transform and the forest:
//!
//! 1. Scaled numeric features, in the declared order of [`FeatureContract::numeric`].
//! 2. For each categorical feature in declared order, one indicator per
//!    vocabulary label except the first (the baseline).
//!
//! Vocabularies are the sorted labels observed at fit time. A label outside the
//! vocabulary fails the transform instead of encoding as all-zeros, which would
//! silently read as "baseline".

use crate::features::{CategoricalFeature, EngineeredRecord, NumericFeature};
use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreprocessError {
    #[error("Cannot fit the preprocessor on zero rows.")]
    EmptyInput,
    #[error(
        "Value '{value}' for feature '{feature}' was not seen during training (known: {known})."
    )]
    UnseenCategory {
        feature: String,
        value: String,
        known: String,
    },
    #[error("Row has {found} columns but the encoder produces {expected}.")]
    WidthMismatch { found: usize, expected: usize },
}

/// The ordered numeric/categorical columns a model consumes. Fixed at fit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureContract {
    pub numeric: Vec<NumericFeature>,
    pub categorical: Vec<CategoricalFeature>,
}

impl FeatureContract {
    pub fn numeric_names(&self) -> Vec<String> {
        self.numeric.iter().map(|f| f.as_str().to_string()).collect()
    }

    pub fn categorical_names(&self) -> Vec<String> {
        self.categorical.iter().map(|f| f.as_str().to_string()).collect()
    }

    /// Raw input columns, numeric then categorical.
    pub fn feature_columns(&self) -> Vec<String> {
        let mut columns = self.numeric_names();
        columns.extend(self.categorical_names());
        columns
    }
}

/// A fitted scaler + encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessor {
    pub contract: FeatureContract,
    pub means: Array1<f64>,
    pub scales: Array1<f64>,
    /// Sorted labels per categorical feature, parallel to `contract.categorical`.
    pub vocabularies: Vec<Vec<String>>,
}

impl FittedPreprocessor {
    /// Learns scaler statistics and vocabularies from `records` only.
    pub fn fit(
        records: &[EngineeredRecord],
        contract: &FeatureContract,
    ) -> Result<Self, PreprocessError> {
        if records.is_empty() {
            return Err(PreprocessError::EmptyInput);
        }
        let n = records.len() as f64;

        let mut means = Array1::zeros(contract.numeric.len());
        let mut scales = Array1::ones(contract.numeric.len());
        for (j, &feature) in contract.numeric.iter().enumerate() {
            let mean = records.iter().map(|r| r.numeric(feature)).sum::<f64>() / n;
            let var = records
                .iter()
                .map(|r| (r.numeric(feature) - mean).powi(2))
                .sum::<f64>()
                / n;
            means[j] = mean;
            // A constant column carries no information; leave it centred but unscaled.
            scales[j] = if var > 0.0 { var.sqrt() } else { 1.0 };
        }

        let vocabularies = contract
            .categorical
            .iter()
            .map(|&feature| {
                records
                    .iter()
                    .map(|r| r.categorical(feature))
                    .sorted_unstable()
                    .dedup()
                    .map(str::to_string)
                    .collect()
            })
            .collect();

        Ok(Self {
            contract: contract.clone(),
            means,
            scales,
            vocabularies,
        })
    }

    pub fn n_output_columns(&self) -> usize {
        self.contract.numeric.len()
            + self
                .vocabularies
                .iter()
                .map(|v| v.len().saturating_sub(1))
                .sum::<usize>()
    }

    /// Names of the matrix columns, e.g. `age`, `smoker_yes`, `region_southeast`.
    pub fn output_columns(&self) -> Vec<String> {
        let mut names = self.contract.numeric_names();
        for (feature, vocab) in self.contract.categorical.iter().zip(&self.vocabularies) {
            names.extend(vocab.iter().skip(1).map(|label| format!("{feature}_{label}")));
        }
        names
    }

    pub fn transform(&self, records: &[EngineeredRecord]) -> Result<Array2<f64>, PreprocessError> {
        let width = self.n_output_columns();
        let mut matrix = Array2::zeros((records.len(), width));
        for (i, record) in records.iter().enumerate() {
            let mut row = matrix.row_mut(i);
            for (j, &feature) in self.contract.numeric.iter().enumerate() {
                row[j] = (record.numeric(feature) - self.means[j]) / self.scales[j];
            }

            let mut offset = self.contract.numeric.len();
            for (&feature, vocab) in self.contract.categorical.iter().zip(&self.vocabularies) {
                let label = record.categorical(feature);
                let position = vocab.iter().position(|v| v == label).ok_or_else(|| {
                    PreprocessError::UnseenCategory {
                        feature: feature.as_str().to_string(),
                        value: label.to_string(),
                        known: vocab.join(", "),
                    }
                })?;
                if position > 0 {
                    row[offset + position - 1] = 1.0;
                }
                offset += vocab.len().saturating_sub(1);
            }
        }
        Ok(matrix)
    }

    /// Recovers the category of each categorical feature from one encoded row:
    /// the largest indicator in each block, or the baseline when the block is all zeros.
    pub fn decode_categories(&self, row: ArrayView1<f64>) -> Result<Vec<String>, PreprocessError> {
        if row.len() != self.n_output_columns() {
            return Err(PreprocessError::WidthMismatch {
                found: row.len(),
                expected: self.n_output_columns(),
            });
        }
        let mut offset = self.contract.numeric.len();
        let mut decoded = Vec::with_capacity(self.vocabularies.len());
        for vocab in &self.vocabularies {
            let block = vocab.len().saturating_sub(1);
            let best = (0..block)
                .map(|k| (k, row[offset + k]))
                .filter(|&(_, v)| v > 0.5)
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(k, _)| k + 1)
                .unwrap_or(0);
            decoded.push(vocab[best].clone());
            offset += block;
        }
        Ok(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PatientProfile, Region, Sex, Smoker};
    use crate::features::{InteractionMode, engineer};
    use approx::assert_abs_diff_eq;

    fn records() -> Vec<EngineeredRecord> {
        let rows = [
            (20.0, 17.0, Sex::Male, Smoker::No, Region::Southwest),
            (30.0, 22.0, Sex::Female, Smoker::Yes, Region::Northeast),
            (45.0, 27.0, Sex::Male, Smoker::No, Region::Southeast),
            (60.0, 33.0, Sex::Female, Smoker::No, Region::Northwest),
            (70.0, 41.0, Sex::Male, Smoker::Yes, Region::Southwest),
        ];
        rows.iter()
            .map(|&(age, bmi, sex, smoker, region)| {
                let profile = PatientProfile {
                    age,
                    bmi,
                    nb_children: 2.0,
                    sex,
                    smoker,
                    region,
                };
                engineer(&profile, InteractionMode::Smoker)
            })
            .collect()
    }

    fn contract() -> FeatureContract {
        FeatureContract {
            numeric: vec![NumericFeature::Age, NumericFeature::Bmi, NumericFeature::NbChildren],
            categorical: CategoricalFeature::ALL.to_vec(),
        }
    }

    #[test]
    fn scaled_columns_have_zero_mean_unit_variance() {
        let records = records();
        let pre = FittedPreprocessor::fit(&records, &contract()).unwrap();
        let x = pre.transform(&records).unwrap();
        for j in 0..2 {
            let col = x.column(j);
            assert_abs_diff_eq!(col.mean().unwrap(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(col.std(0.0), 1.0, epsilon = 1e-12);
        }
        // nb_children is constant: centred, scale left at one.
        assert_abs_diff_eq!(pre.scales[2], 1.0);
        assert!(x.column(2).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn output_layout_drops_first_label_of_each_vocabulary() {
        let pre = FittedPreprocessor::fit(&records(), &contract()).unwrap();
        let names = pre.output_columns();
        assert_eq!(&names[..3], &["age", "bmi", "nb_children"]);
        assert!(names.contains(&"sex_male".to_string()));
        assert!(!names.contains(&"sex_female".to_string()));
        assert!(names.contains(&"smoker_yes".to_string()));
        assert!(!names.contains(&"region_northeast".to_string()));
        // All four BMI categories and all five age groups are present in the fixture.
        let expected = 3 + 1 + 1 + 3 + 3 + 4;
        assert_eq!(names.len(), expected);
        assert_eq!(pre.n_output_columns(), expected);
    }

    #[test]
    fn one_hot_round_trip_recovers_categories() {
        let records = records();
        let pre = FittedPreprocessor::fit(&records, &contract()).unwrap();
        let x = pre.transform(&records).unwrap();
        for (i, record) in records.iter().enumerate() {
            let decoded = pre.decode_categories(x.row(i)).unwrap();
            let original: Vec<String> = CategoricalFeature::ALL
                .iter()
                .map(|&f| record.categorical(f).to_string())
                .collect();
            assert_eq!(decoded, original, "row {i}");
        }
    }

    #[test]
    fn unseen_category_fails_closed() {
        let records = records();
        let only_young: Vec<_> = records.iter().take(1).copied().collect();
        let pre = FittedPreprocessor::fit(&only_young, &contract()).unwrap();
        match pre.transform(&records[1..2]) {
            Err(PreprocessError::UnseenCategory { feature, value, .. }) => {
                assert_eq!(feature, "sex");
                assert_eq!(value, "female");
            }
            other => panic!("expected UnseenCategory, got {other:?}"),
        }
    }

    #[test]
    fn statistics_come_from_fit_rows_only() {
        let records = records();
        let pre = FittedPreprocessor::fit(&records[..2], &contract()).unwrap();
        assert_abs_diff_eq!(pre.means[0], 25.0);
        assert_abs_diff_eq!(pre.scales[0], 5.0);
    }

    #[test]
    fn empty_fit_is_rejected() {
        assert_eq!(
            FittedPreprocessor::fit(&[], &contract()).unwrap_err(),
            PreprocessError::EmptyInput
        );
    }
}
