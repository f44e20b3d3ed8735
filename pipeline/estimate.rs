// pipeline/estimate.rs

//! # Model Training and Cross-Validated Evaluation
//!
//! Orchestrates one training run from a loaded table to a [`TrainedModel`]:
//!
//! 1.  **Clean:** drop unlabelled rows, impute gaps, winsorize outliers.
//! 2.  **Target transform:** fit on `log1p(cost)` when the cost distribution is
//!     heavily skewed. Every metric is still computed in currency units, after
//!     inverting predictions with `expm1`.
//! 3.  **Cross-validate:** shuffled k-fold. Each fold fits its own scaler,
//!     encoder and forest on the training rows only, so no statistic leaks
//!     from the held-out rows.
//! 4.  **Refit:** the artifact is refitted on 100% of the rows with the same
//!     hyperparameters. Cross-validation only ever evaluates.
//!
//! Nothing is written to disk here. Persisting and promoting the outcome is
//! the registry's job, so a failed run can never leave a partial artifact.

use crate::cleaning::{self, CleaningError, CleaningSummary};
use crate::config::{ConfigError, TrainingConfig};
use crate::data::{Category, DataError, PatientTable};
use crate::features::{EngineeredRecord, engineer_all};
use crate::forest::{ForestError, RandomForest};
use crate::metrics::{RegressionMetrics, r2_score};
use crate::model::{FittedPipeline, ModelError, ModelMetadata, TargetTransform, TrainedModel};
use crate::preprocess::{FittedPreprocessor, PreprocessError};
use crate::stats;
use ndarray::Array1;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Train/held-out R² gap above which overfitting is reported.
pub const OVERFITTING_GAP: f64 = 0.1;
/// Gap above which regularization is recommended.
pub const SEVERE_OVERFITTING_GAP: f64 = 0.2;

const TOP_FEATURES_LOGGED: usize = 10;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Invalid training configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Training data failed validation: {0}")]
    Data(#[from] DataError),
    #[error("Cleaning failed: {0}")]
    Cleaning(#[from] CleaningError),
    #[error("{rows} labelled rows are not enough for {folds}-fold cross-validation.")]
    InsufficientRows { rows: usize, folds: usize },
    #[error("Cross-validation fold {fold} could not be encoded: {source}")]
    Fold {
        fold: usize,
        source: PreprocessError,
    },
    #[error("Preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),
    #[error("Forest fitting failed: {0}")]
    Forest(#[from] ForestError),
    #[error("Assembling the model artifact failed: {0}")]
    Model(#[from] ModelError),
}

/// Metric values for each fold, in fold order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FoldMetrics {
    pub r2: Vec<f64>,
    pub mse: Vec<f64>,
    pub rmse: Vec<f64>,
    pub mae: Vec<f64>,
}

impl FoldMetrics {
    fn push(&mut self, m: RegressionMetrics) {
        self.r2.push(m.r2);
        self.mse.push(m.mse);
        self.rmse.push(m.rmse);
        self.mae.push(m.mae);
    }

    /// Two population standard deviations of each metric across folds.
    pub fn half_widths(&self) -> RegressionMetrics {
        let hw = |v: &[f64]| 2.0 * stats::population_std(v).unwrap_or(0.0);
        RegressionMetrics {
            r2: hw(&self.r2),
            mse: hw(&self.mse),
            rmse: hw(&self.rmse),
            mae: hw(&self.mae),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverfittingLevel {
    None,
    Possible,
    Severe,
}

impl OverfittingLevel {
    pub fn from_gap(gap: f64) -> Self {
        if gap > SEVERE_OVERFITTING_GAP {
            OverfittingLevel::Severe
        } else if gap > OVERFITTING_GAP {
            OverfittingLevel::Possible
        } else {
            OverfittingLevel::None
        }
    }
}

/// Mean (± 2 std) train-fold versus held-out-fold R², both in currency units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverfittingDiagnostic {
    pub train_r2: f64,
    pub train_r2_half_width: f64,
    pub held_out_r2: f64,
    pub held_out_r2_half_width: f64,
    pub gap: f64,
    pub level: OverfittingLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupError {
    pub group: String,
    pub count: usize,
    pub mae: f64,
}

/// Distribution of absolute out-of-fold errors, overall and per segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorAnalysis {
    pub median_abs_error: f64,
    pub p75_abs_error: f64,
    pub p90_abs_error: f64,
    pub p95_abs_error: f64,
    pub by_smoker: Vec<GroupError>,
    pub by_age_group: Vec<GroupError>,
    pub by_bmi_category: Vec<GroupError>,
}

impl ErrorAnalysis {
    pub fn compute(records: &[EngineeredRecord], y_true: &[f64], y_pred: &[f64]) -> Self {
        let abs: Vec<f64> = y_true
            .iter()
            .zip(y_pred)
            .map(|(t, p)| (t - p).abs())
            .collect();
        let mut sorted = abs.clone();
        sorted.sort_by(f64::total_cmp);
        let q = |p: f64| stats::quantile_sorted(&sorted, p).unwrap_or(f64::NAN);

        let by = |label: &dyn Fn(&EngineeredRecord) -> &'static str| -> Vec<GroupError> {
            let mut groups: BTreeMap<&'static str, (usize, f64)> = BTreeMap::new();
            for (record, err) in records.iter().zip(&abs) {
                let entry = groups.entry(label(record)).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += err;
            }
            groups
                .into_iter()
                .map(|(group, (count, total))| GroupError {
                    group: group.to_string(),
                    count,
                    mae: total / count as f64,
                })
                .collect()
        };

        Self {
            median_abs_error: q(0.5),
            p75_abs_error: q(0.75),
            p90_abs_error: q(0.9),
            p95_abs_error: q(0.95),
            by_smoker: by(&|r| r.profile.smoker.as_str()),
            by_age_group: by(&|r| r.age_group.as_str()),
            by_bmi_category: by(&|r| r.bmi_category.as_str()),
        }
    }
}

/// Everything a reviewer needs to accept or reject a candidate. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub experiment: String,
    pub rows: usize,
    pub folds: usize,
    pub target_skewness: f64,
    pub target_transform: TargetTransform,
    /// Out-of-bag R² of the final forest, on the fitted scale.
    pub oob_r2: Option<f64>,
    /// Pooled over all out-of-fold predictions.
    pub metrics: RegressionMetrics,
    pub confidence_half_widths: RegressionMetrics,
    pub per_fold: FoldMetrics,
    pub overfitting: OverfittingDiagnostic,
    pub errors: ErrorAnalysis,
    pub cleaning: CleaningSummary,
    pub config: TrainingConfig,
    /// Mean importance across folds, most important first.
    pub feature_importances: Vec<FeatureImportance>,
}

impl EvaluationReport {
    /// The held-out R² the promotion gate compares against its threshold.
    pub fn held_out_r2(&self) -> f64 {
        self.metrics.r2
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        crate::model::internal::write_toml(self, path, true)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        crate::model::internal::read_toml(path)
    }
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub model: TrainedModel,
    pub report: EvaluationReport,
}

/// The main entry point for model training.
pub fn train(
    table: &PatientTable,
    config: &TrainingConfig,
) -> Result<TrainingOutcome, TrainingError> {
    config.validate()?;
    table.validate()?;
    log::info!(
        "Starting training run '{}' on {} rows.",
        config.experiment,
        table.len()
    );

    let cleaned = cleaning::clean(table)?;
    let n = cleaned.targets.len();
    let folds = config.cross_validation.folds;
    if n < 2 * folds {
        return Err(TrainingError::InsufficientRows { rows: n, folds });
    }
    cleaning::log_distributions(&cleaned.profiles, &cleaned.targets);

    let target_skewness = stats::skewness(&cleaned.targets).unwrap_or(0.0);
    let transform = TargetTransform::for_skewness(target_skewness, config.skew_threshold);
    match transform {
        TargetTransform::Log1p => log::info!(
            "Target skewness {target_skewness:.3} exceeds {}; fitting on log1p(cost).",
            config.skew_threshold
        ),
        TargetTransform::None => {
            log::info!("Target skewness {target_skewness:.3}; fitting on raw cost.")
        }
    }
    let y_fit: Vec<f64> = cleaned.targets.iter().map(|&y| transform.forward(y)).collect();

    let records = engineer_all(&cleaned.profiles, config.interaction);
    let contract = config.feature_contract();
    log_hyperparameters(config);

    let mut out_of_fold = vec![0.0; n];
    let mut per_fold = FoldMetrics::default();
    let mut train_r2 = Vec::with_capacity(folds);
    let mut importance_sums: BTreeMap<String, f64> = BTreeMap::new();

    let splits = kfold_indices(n, folds, config.cross_validation.shuffle_seed);
    for (fold, (train_idx, test_idx)) in splits.into_iter().enumerate() {
        let train_records = internal::select(&records, &train_idx);
        let test_records = internal::select(&records, &test_idx);
        let y_train_fit = Array1::from(internal::select(&y_fit, &train_idx));

        let preprocessor = FittedPreprocessor::fit(&train_records, &contract)
            .map_err(|source| TrainingError::Fold { fold, source })?;
        let x_train = preprocessor
            .transform(&train_records)
            .map_err(|source| TrainingError::Fold { fold, source })?;
        let x_test = preprocessor
            .transform(&test_records)
            .map_err(|source| TrainingError::Fold { fold, source })?;

        let forest = RandomForest::fit(x_train.view(), y_train_fit.view(), &config.forest)?;

        let to_currency = |preds: Vec<f64>| -> Vec<f64> {
            preds.into_iter().map(|p| transform.inverse(p)).collect()
        };
        let test_pred = to_currency(forest.predict(x_test.view())?);
        let train_pred = to_currency(forest.predict(x_train.view())?);
        let y_test = internal::select(&cleaned.targets, &test_idx);
        let y_train = internal::select(&cleaned.targets, &train_idx);

        let fold_metrics = RegressionMetrics::compute(&y_test, &test_pred);
        log::debug!(
            "Fold {}: held-out R² {:.3}, train R² {:.3}",
            fold + 1,
            fold_metrics.r2,
            r2_score(&y_train, &train_pred)
        );
        per_fold.push(fold_metrics);
        train_r2.push(r2_score(&y_train, &train_pred));

        for (&i, &p) in test_idx.iter().zip(&test_pred) {
            out_of_fold[i] = p;
        }
        for (name, imp) in preprocessor
            .output_columns()
            .into_iter()
            .zip(&forest.feature_importances)
        {
            *importance_sums.entry(name).or_insert(0.0) += imp;
        }
    }

    let metrics = RegressionMetrics::compute(&cleaned.targets, &out_of_fold);
    let confidence_half_widths = per_fold.half_widths();
    log_cv_results(&metrics, &confidence_half_widths);

    let overfitting = internal::overfitting_diagnostic(&train_r2, &per_fold.r2);
    log_overfitting(&overfitting);

    let mut feature_importances: Vec<FeatureImportance> = importance_sums
        .into_iter()
        .map(|(feature, total)| FeatureImportance {
            feature,
            importance: total / folds as f64,
        })
        .collect();
    feature_importances.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    log::info!("Top {TOP_FEATURES_LOGGED} most important features:");
    for fi in feature_importances.iter().take(TOP_FEATURES_LOGGED) {
        log::info!("  - {}: {:.3}", fi.feature, fi.importance);
    }

    let errors = ErrorAnalysis::compute(&records, &cleaned.targets, &out_of_fold);
    log::info!(
        "Absolute error: median {:.0}, p90 {:.0}, p95 {:.0}",
        errors.median_abs_error,
        errors.p90_abs_error,
        errors.p95_abs_error
    );

    // Final artifact: same hyperparameters, every row.
    log::info!("Refitting on all {n} rows.");
    let preprocessor = FittedPreprocessor::fit(&records, &contract)?;
    let x_all = preprocessor.transform(&records)?;
    let forest = RandomForest::fit(x_all.view(), Array1::from(y_fit).view(), &config.forest)?;
    if let Some(oob) = forest.oob_score {
        log::info!("Out-of-bag R² of the final forest: {oob:.3}");
    }
    let oob_r2 = forest.oob_score;

    let metadata = ModelMetadata::describe(
        &config.experiment,
        config.interaction,
        transform,
        &preprocessor,
    );
    let model = TrainedModel::new(
        metadata,
        FittedPipeline {
            preprocessor,
            forest,
        },
    )?;

    let report = EvaluationReport {
        experiment: config.experiment.clone(),
        rows: n,
        folds,
        target_skewness,
        target_transform: transform,
        oob_r2,
        metrics,
        confidence_half_widths,
        per_fold,
        overfitting,
        errors,
        cleaning: cleaned.summary,
        config: config.clone(),
        feature_importances,
    };

    Ok(TrainingOutcome { model, report })
}

/// Shuffled k-fold split of `0..n_samples`; the first `n % k` folds get one extra row.
pub fn kfold_indices(n_samples: usize, k: usize, seed: u64) -> Vec<(Vec<usize>, Vec<usize>)> {
    let mut indices: Vec<usize> = (0..n_samples).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let fold_size = n_samples / k;
    let remainder = n_samples % k;
    let mut splits = Vec::with_capacity(k);
    let mut start = 0;
    for fold in 0..k {
        let len = fold_size + usize::from(fold < remainder);
        let end = start + len;
        let test = indices[start..end].to_vec();
        let train = indices[..start]
            .iter()
            .chain(&indices[end..])
            .copied()
            .collect();
        splits.push((train, test));
        start = end;
    }
    splits
}

fn log_hyperparameters(config: &TrainingConfig) {
    let p = &config.forest;
    log::info!(
        "Evaluating with {}-fold cross-validation.",
        config.cross_validation.folds
    );
    log::info!("Model hyperparameters:");
    log::info!("  - n_estimators: {}", p.n_estimators);
    match p.max_depth {
        Some(depth) => log::info!("  - max_depth: {depth}"),
        None => log::info!("  - max_depth: unlimited"),
    }
    log::info!("  - min_samples_split: {}", p.min_samples_split);
    log::info!("  - min_samples_leaf: {}", p.min_samples_leaf);
    log::info!("  - max_features: {:?}", p.max_features);
}

fn log_cv_results(metrics: &RegressionMetrics, hw: &RegressionMetrics) {
    log::info!("=== Cross-validation results ===");
    log::info!("R² score: {:.3} (+/- {:.3})", metrics.r2, hw.r2);
    log::info!("Mean squared error: {:.0} (+/- {:.0})", metrics.mse, hw.mse);
    log::info!("Root mean squared error: {:.0} (+/- {:.0})", metrics.rmse, hw.rmse);
    log::info!("Mean absolute error: {:.0} (+/- {:.0})", metrics.mae, hw.mae);
}

fn log_overfitting(d: &OverfittingDiagnostic) {
    log::info!("R² train:    {:.3} (+/- {:.3})", d.train_r2, d.train_r2_half_width);
    log::info!("R² held-out: {:.3} (+/- {:.3})", d.held_out_r2, d.held_out_r2_half_width);
    log::info!("Train/held-out difference: {:.3}", d.gap);
    if d.level != OverfittingLevel::None {
        log::warn!("Possible overfitting detected (train/held-out gap {:.3}).", d.gap);
    }
    if d.level == OverfittingLevel::Severe {
        log::warn!("To reduce overfitting:");
        log::warn!("  1. Use fewer trees");
        log::warn!("  2. Increase min_samples_split / min_samples_leaf");
        log::warn!("  3. Lower max_depth");
    }
}

mod internal {
    use super::*;

    pub(super) fn select<T: Copy>(items: &[T], indices: &[usize]) -> Vec<T> {
        indices.iter().map(|&i| items[i]).collect()
    }

    pub(super) fn overfitting_diagnostic(
        train_r2: &[f64],
        held_out_r2: &[f64],
    ) -> OverfittingDiagnostic {
        let train = stats::mean(train_r2).unwrap_or(f64::NAN);
        let held_out = stats::mean(held_out_r2).unwrap_or(f64::NAN);
        let gap = train - held_out;
        OverfittingDiagnostic {
            train_r2: train,
            train_r2_half_width: 2.0 * stats::population_std(train_r2).unwrap_or(0.0),
            held_out_r2: held_out,
            held_out_r2_half_width: 2.0 * stats::population_std(held_out_r2).unwrap_or(0.0),
            gap,
            level: OverfittingLevel::from_gap(gap),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PatientProfile, Region, Sex, Smoker};
    use crate::forest::ForestParams;
    use crate::metrics::mean_squared_error;
    use approx::assert_abs_diff_eq;
    use rand::Rng;

    fn synthetic_table(n: usize, seed: u64) -> PatientTable {
        let mut rng = StdRng::seed_from_u64(seed);
        let records: Vec<(PatientProfile, f64)> = (0..n)
            .map(|i| {
                let age = rng.gen_range(18..=80) as f64;
                let bmi = rng.gen_range(16.0..45.0);
                let nb_children = rng.gen_range(0..=4) as f64;
                let smoker = if rng.gen_bool(0.25) { Smoker::Yes } else { Smoker::No };
                let profile = PatientProfile {
                    age,
                    bmi,
                    nb_children,
                    sex: if i % 2 == 0 { Sex::Male } else { Sex::Female },
                    smoker,
                    region: Region::ALL[i % 4],
                };
                let cost = 2000.0 + 250.0 * age + 120.0 * bmi + 20000.0 * smoker.indicator()
                    + rng.gen_range(-500.0..500.0);
                (profile, cost)
            })
            .collect();
        PatientTable::from_records(&records)
    }

    fn quick_config() -> TrainingConfig {
        TrainingConfig {
            forest: ForestParams {
                n_estimators: 25,
                ..ForestParams::default()
            },
            ..TrainingConfig::default()
        }
    }

    #[test]
    fn kfold_partitions_every_row_once() {
        let splits = kfold_indices(23, 5, 42);
        assert_eq!(splits.len(), 5);
        let sizes: Vec<usize> = splits.iter().map(|(_, t)| t.len()).collect();
        assert_eq!(sizes, [5, 5, 5, 4, 4]);
        let mut seen: Vec<usize> = splits.iter().flat_map(|(_, t)| t.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..23).collect::<Vec<_>>());
        for (train, test) in &splits {
            assert_eq!(train.len() + test.len(), 23);
            assert!(test.iter().all(|i| !train.contains(i)));
        }
        assert_eq!(kfold_indices(23, 5, 42), splits);
    }

    #[test]
    fn overfitting_levels_follow_the_gap() {
        assert_eq!(OverfittingLevel::from_gap(0.05), OverfittingLevel::None);
        assert_eq!(OverfittingLevel::from_gap(0.15), OverfittingLevel::Possible);
        assert_eq!(OverfittingLevel::from_gap(0.25), OverfittingLevel::Severe);
        let d = internal::overfitting_diagnostic(&[0.99, 0.97], &[0.8, 0.7]);
        assert_abs_diff_eq!(d.gap, 0.23, epsilon = 1e-12);
        assert_eq!(d.level, OverfittingLevel::Severe);
    }

    #[test]
    fn half_widths_are_two_standard_deviations() {
        let folds = FoldMetrics {
            r2: vec![0.8, 0.9],
            mse: vec![10.0, 10.0],
            rmse: vec![1.0, 3.0],
            mae: vec![2.0, 2.0],
        };
        let hw = folds.half_widths();
        assert_abs_diff_eq!(hw.r2, 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(hw.mse, 0.0);
        assert_abs_diff_eq!(hw.rmse, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn error_analysis_groups_by_segment() {
        let table = synthetic_table(12, 3);
        let profiles: Vec<PatientProfile> = (0..12)
            .map(|i| PatientProfile {
                age: table.age[i].unwrap(),
                bmi: table.bmi[i].unwrap(),
                nb_children: table.nb_children[i].unwrap(),
                sex: table.sex[i].unwrap(),
                smoker: if i < 4 { Smoker::Yes } else { Smoker::No },
                region: table.region[i].unwrap(),
            })
            .collect();
        let records = engineer_all(&profiles, crate::features::InteractionMode::Smoker);
        let y_true = vec![100.0; 12];
        let y_pred: Vec<f64> = (0..12).map(|i| if i < 4 { 130.0 } else { 90.0 }).collect();
        let analysis = ErrorAnalysis::compute(&records, &y_true, &y_pred);
        assert_eq!(analysis.by_smoker.len(), 2);
        let no = &analysis.by_smoker[0];
        let yes = &analysis.by_smoker[1];
        assert_eq!((no.group.as_str(), no.count), ("no", 8));
        assert_eq!((yes.group.as_str(), yes.count), ("yes", 4));
        assert_abs_diff_eq!(no.mae, 10.0);
        assert_abs_diff_eq!(yes.mae, 30.0);
        assert_abs_diff_eq!(analysis.median_abs_error, 10.0);
        let total: usize = analysis.by_age_group.iter().map(|g| g.count).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn log_and_raw_paths_agree_on_consistent_predictions() {
        // Metrics must be computed after inversion: feeding expm1(log1p(pred))
        // gives the same MSE as the untransformed path.
        let y_true = [1200.0, 5400.0, 31000.0, 760.0];
        let y_pred = [1000.0, 6000.0, 29000.0, 800.0];
        let raw = mean_squared_error(&y_true, &y_pred);
        let t = TargetTransform::Log1p;
        let via_log: Vec<f64> = y_pred.iter().map(|&p| t.inverse(t.forward(p))).collect();
        assert_abs_diff_eq!(mean_squared_error(&y_true, &via_log), raw, epsilon = 1e-6);
    }

    #[test]
    fn training_produces_a_consistent_artifact_and_report() {
        let table = synthetic_table(200, 11);
        let outcome = train(&table, &quick_config()).unwrap();
        let report = &outcome.report;

        assert_eq!(report.rows, 200);
        assert_eq!(report.per_fold.r2.len(), 5);
        assert!(report.metrics.r2 > 0.8, "pooled R² {}", report.metrics.r2);
        assert_abs_diff_eq!(report.metrics.rmse, report.metrics.mse.sqrt(), epsilon = 1e-6);
        let importance: f64 = report.feature_importances.iter().map(|f| f.importance).sum();
        assert_abs_diff_eq!(importance, 1.0, epsilon = 1e-9);
        assert!(
            report.feature_importances[..3]
                .iter()
                .any(|f| f.feature.contains("smoker")),
            "{:?}",
            &report.feature_importances[..3]
        );

        let model = &outcome.model;
        assert_eq!(model.metadata.target_transform, report.target_transform);
        assert_eq!(model.metadata.experiment, "cost_prediction");
        assert!(model.check_consistency().is_ok());
    }

    #[test]
    fn skewed_target_is_fitted_on_log_scale_but_reported_in_currency() {
        let mut table = synthetic_table(150, 5);
        // Exponential costs: strongly right-skewed.
        for (i, cost) in table.insurance_cost.iter_mut().enumerate() {
            *cost = Some(500.0 * (1.0 + (i % 30) as f64 / 4.0).exp());
        }
        let outcome = train(&table, &quick_config()).unwrap();
        assert_eq!(outcome.report.target_transform, TargetTransform::Log1p);
        assert!(outcome.report.target_skewness > 1.0);
        // MAE in currency units is far larger than anything on the log scale.
        assert!(outcome.report.metrics.mae > 50.0);
    }

    #[test]
    fn too_few_rows_for_the_fold_count() {
        let table = synthetic_table(12, 1);
        let config = TrainingConfig {
            cross_validation: crate::config::CrossValidationConfig {
                folds: 10,
                shuffle_seed: 42,
            },
            ..quick_config()
        };
        assert!(matches!(
            train(&table, &config),
            Err(TrainingError::InsufficientRows { rows: 12, folds: 10 })
        ));
    }

    #[test]
    fn report_survives_a_toml_round_trip() {
        let outcome = train(&synthetic_table(60, 8), &quick_config()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.toml");
        outcome.report.save(&path).unwrap();
        let loaded = EvaluationReport::load(&path).unwrap();
        assert_eq!(loaded.per_fold, outcome.report.per_fold);
        assert_eq!(loaded.feature_importances.len(), outcome.report.feature_importances.len());
    }
}
