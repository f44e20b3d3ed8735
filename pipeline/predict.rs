//! # Prediction Serving
//!
//! A [`Predictor`] wraps one resolved production model. Each request is checked
//! field by field against the model's feature contract, re-engineered with
//! the exact interaction mode and bin edges the model was trained with, and
//! scored. Nothing is imputed or coerced at serving time: a request that does
//! not match the contract is rejected with a [`MismatchReason`]. Rejection is
//! per request; the rest of a batch is still scored.

use crate::data::{self, Category, DataError, PatientProfile, Region, Sex, Smoker};
use crate::features::{EngineeredRecord, FEATURE_SCHEMA_VERSION, engineer};
use crate::model::{ModelError, TrainedModel};
use crate::registry::{Registry, RegistryError};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub const AGE_RANGE: (f64, f64) = (18.0, 100.0);
pub const BMI_RANGE: (f64, f64) = (10.0, 50.0);
pub const CHILDREN_RANGE: (f64, f64) = (0.0, 10.0);

/// One raw prediction request. Fields are optional so that an absent field is
/// reported as such instead of failing deserialization wholesale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub age: Option<f64>,
    pub bmi: Option<f64>,
    pub nb_children: Option<f64>,
    pub sex: Option<String>,
    pub smoker: Option<String>,
    pub region: Option<String>,
}

impl From<&PatientProfile> for PredictionRequest {
    fn from(p: &PatientProfile) -> Self {
        Self {
            age: Some(p.age),
            bmi: Some(p.bmi),
            nb_children: Some(p.nb_children),
            sex: Some(p.sex.as_str().to_string()),
            smoker: Some(p.smoker.as_str().to_string()),
            region: Some(p.region.as_str().to_string()),
        }
    }
}

/// Why a request does not fit the model's feature contract.
#[derive(Debug, Clone, PartialEq)]
pub enum MismatchReason {
    MissingField(&'static str),
    UnknownCategory {
        field: &'static str,
        value: String,
        allowed: String,
    },
    OutsideVocabulary {
        feature: String,
        value: String,
        known: String,
    },
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    NotAnInteger { field: &'static str, value: f64 },
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MismatchReason::MissingField(field) => {
                write!(f, "required field '{field}' is missing")
            }
            MismatchReason::UnknownCategory {
                field,
                value,
                allowed,
            } => write!(f, "'{value}' is not a valid {field} (expected one of: {allowed})"),
            MismatchReason::OutsideVocabulary {
                feature,
                value,
                known,
            } => write!(
                f,
                "{feature} '{value}' was never seen in training (known: {known})"
            ),
            MismatchReason::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(f, "{field} = {value} is outside [{min}, {max}]"),
            MismatchReason::NotAnInteger { field, value } => {
                write!(f, "{field} = {value} must be a whole number")
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("No model is loaded. Resolve the production model from the registry first.")]
    ModelNotLoaded,
    #[error("Request {index} does not match the model's feature contract: {reason}")]
    FeatureMismatch { index: usize, reason: MismatchReason },
    #[error("Model was built with feature schema v{artifact}, this build uses v{expected}.")]
    SchemaVersion { artifact: u32, expected: u32 },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Prediction failed: {0}")]
    Model(#[from] ModelError),
    #[error("Failed to read prediction input: {0}")]
    Data(#[from] DataError),
}

/// Serving handle. Cheap to clone; the model itself is shared and immutable.
#[derive(Debug, Clone, Default)]
pub struct Predictor {
    model: Option<Arc<TrainedModel>>,
}

impl Predictor {
    /// A predictor with no model. Every prediction fails with `ModelNotLoaded`
    /// until [`Predictor::load`] succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_model(model: Arc<TrainedModel>) -> Result<Self, PredictError> {
        let artifact = model.metadata.schema_version;
        if artifact != FEATURE_SCHEMA_VERSION {
            return Err(PredictError::SchemaVersion {
                artifact,
                expected: FEATURE_SCHEMA_VERSION,
            });
        }
        Ok(Self { model: Some(model) })
    }

    /// Resolves the registry's production model and swaps it in.
    pub fn load(&mut self, registry: &Registry) -> Result<(), PredictError> {
        *self = Self::from_model(registry.resolve()?)?;
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn model(&self) -> Option<&Arc<TrainedModel>> {
        self.model.as_ref()
    }

    /// Point estimates in currency units, one per request, in request order.
    ///
    /// The outer error means nothing could be scored (no model, model failure).
    /// Each inner result is that request's estimate or its `FeatureMismatch`;
    /// a rejected request does not affect the others.
    pub fn predict(
        &self,
        requests: &[PredictionRequest],
    ) -> Result<Vec<Result<f64, PredictError>>, PredictError> {
        let model = self.model.as_ref().ok_or(PredictError::ModelNotLoaded)?;

        let mut records = Vec::with_capacity(requests.len());
        let checked: Vec<Result<(), PredictError>> = requests
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let record = internal::check(model, request)
                    .map_err(|reason| PredictError::FeatureMismatch { index, reason })?;
                records.push(record);
                Ok(())
            })
            .collect();

        let scores = if records.is_empty() {
            Vec::new()
        } else {
            model.predict_records(&records)?
        };
        if scores.len() != records.len() {
            return Err(internal::no_prediction());
        }
        let rejected = requests.len() - records.len();
        if rejected > 0 {
            log::debug!("Scored {} requests, rejected {rejected}.", records.len());
        } else {
            log::debug!("Scored {} requests.", records.len());
        }

        let mut scores = scores.into_iter();
        Ok(checked
            .into_iter()
            .map(|check| check.and_then(|()| scores.next().ok_or_else(internal::no_prediction)))
            .collect())
    }

    pub fn predict_one(&self, request: &PredictionRequest) -> Result<f64, PredictError> {
        match self.predict(std::slice::from_ref(request))?.pop() {
            Some(prediction) => prediction,
            None => Err(internal::no_prediction()),
        }
    }

    /// All-or-nothing scoring of typed profiles: the first rejection is returned.
    pub fn predict_profiles(&self, profiles: &[PatientProfile]) -> Result<Vec<f64>, PredictError> {
        let requests: Vec<PredictionRequest> =
            profiles.iter().map(PredictionRequest::from).collect();
        self.predict(&requests)?.into_iter().collect()
    }
}

/// Builds one request per row of a frame. Missing columns or cells become
/// absent fields and are reported when the request is scored.
pub fn requests_from_frame(df: &DataFrame) -> Result<Vec<PredictionRequest>, DataError> {
    let n = df.height();
    let numeric = |name: &str| -> Result<Vec<Option<f64>>, DataError> {
        Ok(data::optional_numeric_column(df, name)?.unwrap_or_else(|| vec![None; n]))
    };
    let text = |name: &str| -> Result<Vec<Option<String>>, DataError> {
        Ok(data::optional_text_column(df, name)?.unwrap_or_else(|| vec![None; n]))
    };
    let (age, bmi, nb_children) = (numeric("age")?, numeric("bmi")?, numeric("nb_children")?);
    let (sex, smoker, region) = (text("sex")?, text("smoker")?, text("region")?);

    Ok((0..n)
        .map(|i| PredictionRequest {
            age: age[i],
            bmi: bmi[i],
            nb_children: nb_children[i],
            sex: sex[i].clone(),
            smoker: smoker[i].clone(),
            region: region[i].clone(),
        })
        .collect())
}

mod internal {
    use super::*;

    fn number(
        value: Option<f64>,
        field: &'static str,
        (min, max): (f64, f64),
        whole: bool,
    ) -> Result<f64, MismatchReason> {
        let value = value.ok_or(MismatchReason::MissingField(field))?;
        if !value.is_finite() || value < min || value > max {
            return Err(MismatchReason::OutOfRange {
                field,
                value,
                min,
                max,
            });
        }
        if whole && value.fract() != 0.0 {
            return Err(MismatchReason::NotAnInteger { field, value });
        }
        Ok(value)
    }

    fn category<C: Category>(value: Option<&str>) -> Result<C, MismatchReason> {
        let value = value.ok_or(MismatchReason::MissingField(C::COLUMN))?;
        C::parse(value).ok_or_else(|| MismatchReason::UnknownCategory {
            field: C::COLUMN,
            value: value.to_string(),
            allowed: C::allowed(),
        })
    }

    pub(super) fn no_prediction() -> PredictError {
        PredictError::Model(ModelError::Inconsistent(
            "the model returned no prediction for the request".into(),
        ))
    }

    /// Validates one request and engineers it against the model's contract.
    pub(super) fn check(
        model: &TrainedModel,
        request: &PredictionRequest,
    ) -> Result<EngineeredRecord, MismatchReason> {
        let profile = to_profile(request)?;
        let record = engineer(&profile, model.metadata.interaction);
        for &feature in &model.metadata.categorical_features {
            let value = record.categorical(feature);
            let known = model.metadata.vocabularies.get(feature.as_str());
            if !known.is_some_and(|vocab| vocab.iter().any(|v| v == value)) {
                return Err(MismatchReason::OutsideVocabulary {
                    feature: feature.as_str().to_string(),
                    value: value.to_string(),
                    known: known.map(|v| v.join(", ")).unwrap_or_default(),
                });
            }
        }
        Ok(record)
    }

    fn to_profile(request: &PredictionRequest) -> Result<PatientProfile, MismatchReason> {
        Ok(PatientProfile {
            age: number(request.age, "age", AGE_RANGE, true)?,
            bmi: number(request.bmi, "bmi", BMI_RANGE, false)?,
            nb_children: number(request.nb_children, "nb_children", CHILDREN_RANGE, true)?,
            sex: category::<Sex>(request.sex.as_deref())?,
            smoker: category::<Smoker>(request.smoker.as_deref())?,
            region: category::<Region>(request.region.as_deref())?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use crate::data::PatientTable;
    use crate::estimate::train;
    use crate::forest::ForestParams;
    use std::sync::OnceLock;

    fn model() -> Arc<TrainedModel> {
        static MODEL: OnceLock<Arc<TrainedModel>> = OnceLock::new();
        Arc::clone(MODEL.get_or_init(|| {
            // No northwest rows: that region is outside the training vocabulary.
            let regions = [Region::Southwest, Region::Southeast, Region::Northeast];
            let records: Vec<(PatientProfile, f64)> = (0..90)
                .map(|i| {
                    let smoker = if i % 3 == 0 { Smoker::Yes } else { Smoker::No };
                    let age = 18.0 + (i * 11 % 62) as f64;
                    let bmi = 16.0 + (i * 7 % 30) as f64;
                    let profile = PatientProfile {
                        age,
                        bmi,
                        nb_children: (i % 4) as f64,
                        sex: if i % 2 == 0 { Sex::Male } else { Sex::Female },
                        smoker,
                        region: regions[i % 3],
                    };
                    (profile, 2500.0 + 220.0 * age + 90.0 * bmi + 18000.0 * smoker.indicator())
                })
                .collect();
            let config = TrainingConfig {
                forest: ForestParams {
                    n_estimators: 30,
                    ..ForestParams::default()
                },
                ..TrainingConfig::default()
            };
            let outcome = train(&PatientTable::from_records(&records), &config).unwrap();
            Arc::new(outcome.model)
        }))
    }

    fn request() -> PredictionRequest {
        serde_json::from_str(
            r#"{"age": 30, "bmi": 25.0, "nb_children": 2,
                "sex": "male", "smoker": "no", "region": "southwest"}"#,
        )
        .unwrap()
    }

    fn reason(err: PredictError) -> MismatchReason {
        match err {
            PredictError::FeatureMismatch { reason, .. } => reason,
            other => panic!("expected FeatureMismatch, got {other:?}"),
        }
    }

    #[test]
    fn unloaded_predictor_refuses() {
        let predictor = Predictor::new();
        assert!(!predictor.is_loaded());
        assert!(matches!(predictor.predict_one(&request()), Err(PredictError::ModelNotLoaded)));
    }

    #[test]
    fn missing_score_is_a_model_error_not_a_missing_model() {
        let err = internal::no_prediction();
        assert!(matches!(err, PredictError::Model(ModelError::Inconsistent(_))));
        assert!(!err.to_string().contains("No model is loaded"));
    }

    #[test]
    fn dict_like_request_is_scored_in_currency_units() {
        let predictor = Predictor::from_model(model()).unwrap();
        let prediction = predictor.predict_one(&request()).unwrap();
        assert!(prediction > 5000.0 && prediction < 20000.0, "{prediction}");
    }

    #[test]
    fn batch_predictions_keep_request_order() {
        let predictor = Predictor::from_model(model()).unwrap();
        let mut smoker = request();
        smoker.smoker = Some("yes".into());
        let batch: Vec<f64> = predictor
            .predict(&[request(), smoker.clone()])
            .unwrap()
            .into_iter()
            .map(Result::unwrap)
            .collect();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], predictor.predict_one(&request()).unwrap());
        assert_eq!(batch[1], predictor.predict_one(&smoker).unwrap());
        assert!(batch[1] > batch[0]);
    }

    #[test]
    fn missing_field_is_a_feature_mismatch() {
        let predictor = Predictor::from_model(model()).unwrap();
        let request: PredictionRequest = serde_json::from_str(
            r#"{"age": 30, "bmi": 25.0, "sex": "male", "smoker": "no", "region": "southwest"}"#,
        )
        .unwrap();
        assert_eq!(
            reason(predictor.predict_one(&request).unwrap_err()),
            MismatchReason::MissingField("nb_children")
        );
    }

    #[test]
    fn invalid_and_unseen_categories_are_rejected() {
        let predictor = Predictor::from_model(model()).unwrap();

        let mut bad = request();
        bad.smoker = Some("sometimes".into());
        assert!(matches!(
            reason(predictor.predict_one(&bad).unwrap_err()),
            MismatchReason::UnknownCategory { field: "smoker", .. }
        ));

        let mut unseen = request();
        unseen.region = Some("northwest".into());
        assert!(matches!(
            reason(predictor.predict_one(&unseen).unwrap_err()),
            MismatchReason::OutsideVocabulary { .. }
        ));

        let mut shouting = request();
        shouting.smoker = Some("YES".into());
        assert!(matches!(
            reason(predictor.predict_one(&shouting).unwrap_err()),
            MismatchReason::UnknownCategory { field: "smoker", .. }
        ));
    }

    #[test]
    fn one_bad_request_does_not_sink_the_batch() {
        let predictor = Predictor::from_model(model()).unwrap();
        let mut mars = request();
        mars.region = Some("mars".into());
        let mut smoker = request();
        smoker.smoker = Some("yes".into());

        let results = predictor.predict(&[request(), smoker.clone(), mars]).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(
            *results[0].as_ref().unwrap(),
            predictor.predict_one(&request()).unwrap()
        );
        assert_eq!(
            *results[1].as_ref().unwrap(),
            predictor.predict_one(&smoker).unwrap()
        );
        assert!(matches!(
            &results[2],
            Err(PredictError::FeatureMismatch {
                index: 2,
                reason: MismatchReason::UnknownCategory { field: "region", .. }
            })
        ));
    }

    #[test]
    fn batch_of_only_rejections_still_reports_each_one() {
        let predictor = Predictor::from_model(model()).unwrap();
        let mut old = request();
        old.age = Some(130.0);
        let results = predictor.predict(&[old, PredictionRequest::default()]).unwrap();
        assert!(matches!(&results[0], Err(PredictError::FeatureMismatch { index: 0, .. })));
        assert!(matches!(&results[1], Err(PredictError::FeatureMismatch { index: 1, .. })));
        assert!(predictor.predict(&[]).unwrap().is_empty());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let predictor = Predictor::from_model(model()).unwrap();
        let mut old = request();
        old.age = Some(130.0);
        assert!(matches!(
            reason(predictor.predict_one(&old).unwrap_err()),
            MismatchReason::OutOfRange { field: "age", .. }
        ));
        let mut fractional = request();
        fractional.nb_children = Some(1.5);
        assert!(matches!(
            reason(predictor.predict_one(&fractional).unwrap_err()),
            MismatchReason::NotAnInteger { field: "nb_children", .. }
        ));
    }

    #[test]
    fn other_schema_versions_are_refused() {
        let mut stale = (*model()).clone();
        stale.metadata.schema_version = FEATURE_SCHEMA_VERSION + 1;
        let err = Predictor::from_model(Arc::new(stale)).unwrap_err();
        assert!(matches!(
            err,
            PredictError::SchemaVersion { artifact, expected }
                if artifact == FEATURE_SCHEMA_VERSION + 1 && expected == FEATURE_SCHEMA_VERSION
        ));
    }

    #[test]
    fn frame_rows_become_requests() {
        use polars::prelude::*;
        let df = df!(
            "age" => [30i64, 45],
            "bmi" => [25.0, 31.5],
            "sex" => ["male", "female"],
            "smoker" => ["no", "yes"],
            "region" => ["southwest", "northeast"]
        )
        .unwrap();
        let requests = requests_from_frame(&df).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].age, Some(45.0));
        assert_eq!(requests[1].smoker.as_deref(), Some("yes"));
        assert_eq!(requests[0].nb_children, None);
    }

    #[test]
    fn text_ages_in_a_frame_are_a_type_error() {
        use polars::prelude::*;
        let df = df!(
            "age" => ["30", "forty"],
            "bmi" => [25.0, 31.5],
            "nb_children" => [0i64, 1],
            "sex" => ["male", "female"],
            "smoker" => ["no", "yes"],
            "region" => ["southwest", "northeast"]
        )
        .unwrap();
        assert!(matches!(
            requests_from_frame(&df),
            Err(DataError::ColumnWrongType { column, .. }) if column == "age"
        ));
    }
}
