//! # Feature Engineering
//!
//! Derives the engineered view of a patient profile: BMI category, age group,
//! the smoker indicator and the configured interaction terms.
//!
//! The bin edges below are a versioned contract. Every trained artifact records
//! [`FEATURE_SCHEMA_VERSION`] and the [`InteractionMode`] it was trained with,
//! and serving refuses to run an artifact whose version differs from this code.
//! Changing any edge, label or formula here requires bumping the version.

use crate::data::{Category, PatientProfile, Region, Sex, Smoker};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Version of the bin edges, labels and interaction formulas in this module.
pub const FEATURE_SCHEMA_VERSION: u32 = 1;

/// Right-closed BMI bin upper edges: (0, 18.5], (18.5, 25], (25, 30], (30, inf).
pub const BMI_EDGES: [f64; 3] = [18.5, 25.0, 30.0];

/// Right-closed age bin upper edges: (0, 25], (25, 35], (35, 50], (50, 65], (65, inf).
pub const AGE_EDGES: [f64; 4] = [25.0, 35.0, 50.0, 65.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BmiCategory {
    Underweight,
    Normal,
    Overweight,
    Obese,
}

impl BmiCategory {
    pub const ALL: [BmiCategory; 4] = [
        BmiCategory::Underweight,
        BmiCategory::Normal,
        BmiCategory::Overweight,
        BmiCategory::Obese,
    ];

    pub fn from_bmi(bmi: f64) -> Self {
        let bin = BMI_EDGES.iter().take_while(|&&edge| bmi > edge).count();
        Self::ALL[bin]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BmiCategory::Underweight => "Underweight",
            BmiCategory::Normal => "Normal",
            BmiCategory::Overweight => "Overweight",
            BmiCategory::Obese => "Obese",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeGroup {
    Young,
    Adult,
    Middle,
    Senior,
    Elderly,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 5] = [
        AgeGroup::Young,
        AgeGroup::Adult,
        AgeGroup::Middle,
        AgeGroup::Senior,
        AgeGroup::Elderly,
    ];

    pub fn from_age(age: f64) -> Self {
        let bin = AGE_EDGES.iter().take_while(|&&edge| age > edge).count();
        Self::ALL[bin]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgeGroup::Young => "Young",
            AgeGroup::Adult => "Adult",
            AgeGroup::Middle => "Middle",
            AgeGroup::Senior => "Senior",
            AgeGroup::Elderly => "Elderly",
        }
    }
}

/// Which interaction terms are derived alongside the smoker indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    /// `bmi_smoker = bmi * smoker_indicator`, `age_smoker = age * smoker_indicator`.
    #[default]
    Smoker,
    /// `bmi_smoker = bmi * smoker_indicator`, `age_bmi = age * bmi`.
    AgeBmi,
    /// No interaction terms.
    None,
}

impl InteractionMode {
    /// Numeric interaction columns produced by this mode, in canonical order.
    pub fn interaction_features(self) -> &'static [NumericFeature] {
        match self {
            InteractionMode::Smoker => &[NumericFeature::BmiSmoker, NumericFeature::AgeSmoker],
            InteractionMode::AgeBmi => &[NumericFeature::BmiSmoker, NumericFeature::AgeBmi],
            InteractionMode::None => &[],
        }
    }
}

/// Numeric columns available to the preprocessing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericFeature {
    Age,
    Bmi,
    NbChildren,
    SmokerIndicator,
    BmiSmoker,
    AgeSmoker,
    AgeBmi,
}

impl NumericFeature {
    pub const BASE: [NumericFeature; 3] = [
        NumericFeature::Age,
        NumericFeature::Bmi,
        NumericFeature::NbChildren,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NumericFeature::Age => "age",
            NumericFeature::Bmi => "bmi",
            NumericFeature::NbChildren => "nb_children",
            NumericFeature::SmokerIndicator => "smoker_indicator",
            NumericFeature::BmiSmoker => "bmi_smoker",
            NumericFeature::AgeSmoker => "age_smoker",
            NumericFeature::AgeBmi => "age_bmi",
        }
    }
}

impl fmt::Display for NumericFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorical columns available to the preprocessing stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoricalFeature {
    Sex,
    Smoker,
    Region,
    BmiCategory,
    AgeGroup,
}

impl CategoricalFeature {
    pub const ALL: [CategoricalFeature; 5] = [
        CategoricalFeature::Sex,
        CategoricalFeature::Smoker,
        CategoricalFeature::Region,
        CategoricalFeature::BmiCategory,
        CategoricalFeature::AgeGroup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoricalFeature::Sex => "sex",
            CategoricalFeature::Smoker => "smoker",
            CategoricalFeature::Region => "region",
            CategoricalFeature::BmiCategory => "bmi_category",
            CategoricalFeature::AgeGroup => "age_group",
        }
    }

    /// Every label this column can take, in declaration order.
    pub fn labels(self) -> Vec<&'static str> {
        match self {
            CategoricalFeature::Sex => Sex::ALL.iter().map(|c| c.as_str()).collect(),
            CategoricalFeature::Smoker => Smoker::ALL.iter().map(|c| c.as_str()).collect(),
            CategoricalFeature::Region => Region::ALL.iter().map(|c| c.as_str()).collect(),
            CategoricalFeature::BmiCategory => {
                BmiCategory::ALL.iter().map(|c| c.as_str()).collect()
            }
            CategoricalFeature::AgeGroup => AgeGroup::ALL.iter().map(|c| c.as_str()).collect(),
        }
    }
}

impl fmt::Display for CategoricalFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A profile plus everything derived from it. Never stored on its own; it is
/// recomputed from the source profile whenever it is needed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineeredRecord {
    pub profile: PatientProfile,
    pub bmi_category: BmiCategory,
    pub age_group: AgeGroup,
    pub smoker_indicator: f64,
    pub bmi_smoker: f64,
    pub age_smoker: f64,
    pub age_bmi: f64,
}

impl EngineeredRecord {
    pub fn numeric(&self, feature: NumericFeature) -> f64 {
        match feature {
            NumericFeature::Age => self.profile.age,
            NumericFeature::Bmi => self.profile.bmi,
            NumericFeature::NbChildren => self.profile.nb_children,
            NumericFeature::SmokerIndicator => self.smoker_indicator,
            NumericFeature::BmiSmoker => self.bmi_smoker,
            NumericFeature::AgeSmoker => self.age_smoker,
            NumericFeature::AgeBmi => self.age_bmi,
        }
    }

    pub fn categorical(&self, feature: CategoricalFeature) -> &'static str {
        match feature {
            CategoricalFeature::Sex => self.profile.sex.as_str(),
            CategoricalFeature::Smoker => self.profile.smoker.as_str(),
            CategoricalFeature::Region => self.profile.region.as_str(),
            CategoricalFeature::BmiCategory => self.bmi_category.as_str(),
            CategoricalFeature::AgeGroup => self.age_group.as_str(),
        }
    }
}

/// Derives the engineered record for one profile. Interaction terms outside the
/// configured mode are zero, so a record never carries a formula the artifact
/// was not trained with.
pub fn engineer(profile: &PatientProfile, mode: InteractionMode) -> EngineeredRecord {
    let smoker_indicator = profile.smoker.indicator();
    let bmi_smoker = match mode {
        InteractionMode::None => 0.0,
        InteractionMode::Smoker | InteractionMode::AgeBmi => profile.bmi * smoker_indicator,
    };
    let age_smoker = match mode {
        InteractionMode::Smoker => profile.age * smoker_indicator,
        _ => 0.0,
    };
    let age_bmi = match mode {
        InteractionMode::AgeBmi => profile.age * profile.bmi,
        _ => 0.0,
    };

    EngineeredRecord {
        profile: *profile,
        bmi_category: BmiCategory::from_bmi(profile.bmi),
        age_group: AgeGroup::from_age(profile.age),
        smoker_indicator,
        bmi_smoker,
        age_smoker,
        age_bmi,
    }
}

pub fn engineer_all(profiles: &[PatientProfile], mode: InteractionMode) -> Vec<EngineeredRecord> {
    let records: Vec<_> = profiles.iter().map(|p| engineer(p, mode)).collect();
    log::debug!(
        "Engineered {} records (feature schema v{}, interactions {:?}).",
        records.len(),
        FEATURE_SCHEMA_VERSION,
        mode
    );
    records
}
