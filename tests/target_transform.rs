use approx::assert_relative_eq;
use medcost::config::TrainingConfig;
use medcost::data::{Category, PatientProfile, PatientTable, Region, Sex, Smoker};
use medcost::estimate::train;
use medcost::forest::ForestParams;
use medcost::metrics::RegressionMetrics;
use medcost::model::TargetTransform;
use medcost::predict::Predictor;
use medcost::stats;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, LogNormal};
use std::sync::Arc;

#[test]
fn metrics_agree_whether_or_not_predictions_took_the_log_path() {
    let y_true = [1200.0, 4500.0, 9800.0, 31000.0, 52000.0];
    let y_pred = [1500.0, 4000.0, 11000.0, 28000.0, 47000.0];

    let transform = TargetTransform::Log1p;
    let round_tripped: Vec<f64> = y_pred
        .iter()
        .map(|&p| transform.inverse(transform.forward(p)))
        .collect();

    let direct = RegressionMetrics::compute(&y_true, &y_pred);
    let via_log = RegressionMetrics::compute(&y_true, &round_tripped);
    assert_relative_eq!(direct.mse, via_log.mse, max_relative = 1e-9);
    assert_relative_eq!(direct.mae, via_log.mae, max_relative = 1e-9);
    assert_relative_eq!(direct.r2, via_log.r2, max_relative = 1e-9);
}

#[test]
fn skewed_costs_are_fitted_in_log_space_and_reported_in_currency() {
    let mut rng = StdRng::seed_from_u64(5);
    let multiplier = LogNormal::new(0.0, 0.6).unwrap();
    let records: Vec<(PatientProfile, f64)> = (0..300)
        .map(|_| {
            let profile = PatientProfile {
                age: rng.gen_range(18..=64) as f64,
                bmi: rng.gen_range(170..=420) as f64 / 10.0,
                nb_children: rng.gen_range(0..=3) as f64,
                sex: Sex::ALL[rng.gen_range(0..2)],
                smoker: if rng.gen_bool(0.2) { Smoker::Yes } else { Smoker::No },
                region: Region::ALL[rng.gen_range(0..4)],
            };
            let base = 2000.0 + 80.0 * profile.age + 20000.0 * profile.smoker.indicator();
            (profile, base * multiplier.sample(&mut rng))
        })
        .collect();
    let costs: Vec<f64> = records.iter().map(|(_, c)| *c).collect();
    assert!(stats::skewness(&costs).unwrap() > 1.0);

    let config = TrainingConfig {
        forest: ForestParams {
            n_estimators: 40,
            ..ForestParams::default()
        },
        ..TrainingConfig::default()
    };
    let outcome = train(&PatientTable::from_records(&records), &config).unwrap();
    let report = &outcome.report;
    assert_eq!(report.target_transform, TargetTransform::Log1p);
    assert_eq!(outcome.model.metadata.target_transform, TargetTransform::Log1p);

    // Currency-scale errors: a log-scale MAE would be well below 10.
    assert!(report.metrics.mae > 100.0, "mae {}", report.metrics.mae);
    assert_relative_eq!(report.metrics.rmse.powi(2), report.metrics.mse, max_relative = 1e-9);

    let predictor = Predictor::from_model(Arc::new(outcome.model.clone())).unwrap();
    let profiles: Vec<PatientProfile> = records.iter().map(|(p, _)| *p).collect();
    let predictions = predictor.predict_profiles(&profiles).unwrap();
    let min_cost = costs.iter().copied().fold(f64::INFINITY, f64::min);
    let max_cost = costs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    assert!(
        predictions
            .iter()
            .all(|&p| p >= 0.5 * min_cost && p <= max_cost),
        "predictions left the currency range of the training costs"
    );
}
