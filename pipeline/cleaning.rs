//! # Missing-Value Imputation and Outlier Winsorization
//!
//! Turns a loaded [`PatientTable`] (which may have holes) into complete
//! profiles and targets ready for feature engineering:
//!
//! 1. Rows without a target are dropped; a cost is never invented.
//! 2. Missing numeric features take the column median, missing categoricals
//!    the column mode, both computed over the whole table.
//! 3. `age`, `bmi` and `nb_children` are clipped to `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`.
//!    Rows are never removed for being outliers.
//!
//! None of this is an error: counts are logged and returned in a
//! [`CleaningSummary`] for the evaluation report.

use crate::data::{Category, PatientProfile, PatientTable, Region, Sex, Smoker};
use crate::stats;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

const IQR_MULTIPLIER: f64 = 1.5;

#[derive(Error, Debug)]
pub enum CleaningError {
    #[error("Column '{0}' has no observed values to impute from.")]
    NothingToImpute(&'static str),
    #[error("No rows with an observed insurance cost remain.")]
    NoLabelledRows,
}

/// Inclusive winsorization bounds derived from the interquartile range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IqrBounds {
    pub q1: f64,
    pub q3: f64,
    pub lower: f64,
    pub upper: f64,
}

impl IqrBounds {
    pub fn from_quartiles(q1: f64, q3: f64) -> Self {
        let iqr = q3 - q1;
        Self {
            q1,
            q3,
            lower: q1 - IQR_MULTIPLIER * iqr,
            upper: q3 + IQR_MULTIPLIER * iqr,
        }
    }

    pub fn from_values(values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let q1 = stats::quantile_sorted(&sorted, 0.25)?;
        let q3 = stats::quantile_sorted(&sorted, 0.75)?;
        Some(Self::from_quartiles(q1, q3))
    }

    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.lower, self.upper)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// What cleaning did to one numeric column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericColumnSummary {
    pub column: String,
    pub median: f64,
    pub imputed: usize,
    pub bounds: IqrBounds,
    pub clipped: usize,
}

/// What cleaning did to one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalColumnSummary {
    pub column: String,
    pub mode: String,
    pub imputed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningSummary {
    pub rows_in: usize,
    pub rows_dropped_missing_target: usize,
    pub numeric: Vec<NumericColumnSummary>,
    pub categorical: Vec<CategoricalColumnSummary>,
}

/// Complete, cleaned training rows.
#[derive(Debug, Clone)]
pub struct CleanedData {
    pub profiles: Vec<PatientProfile>,
    pub targets: Vec<f64>,
    pub summary: CleaningSummary,
}

pub fn clean(table: &PatientTable) -> Result<CleanedData, CleaningError> {
    let rows_in = table.len();
    let keep: Vec<usize> = (0..rows_in)
        .filter(|&i| table.insurance_cost[i].is_some())
        .collect();
    let dropped = rows_in - keep.len();
    if dropped > 0 {
        log::warn!("Dropping {dropped} rows without an observed insurance cost.");
    }
    if keep.is_empty() {
        return Err(CleaningError::NoLabelledRows);
    }

    let (age, age_summary) = clean_numeric("age", &select(&keep, &table.age))?;
    let (bmi, bmi_summary) = clean_numeric("bmi", &select(&keep, &table.bmi))?;
    let (nb_children, children_summary) =
        clean_numeric("nb_children", &select(&keep, &table.nb_children))?;

    let (sex, sex_summary) = impute_categorical::<Sex>(&select(&keep, &table.sex))?;
    let (smoker, smoker_summary) = impute_categorical::<Smoker>(&select(&keep, &table.smoker))?;
    let (region, region_summary) = impute_categorical::<Region>(&select(&keep, &table.region))?;

    let targets: Vec<f64> = keep.iter().filter_map(|&i| table.insurance_cost[i]).collect();
    let profiles: Vec<PatientProfile> = (0..keep.len())
        .map(|i| PatientProfile {
            age: age[i],
            bmi: bmi[i],
            nb_children: nb_children[i],
            sex: sex[i],
            smoker: smoker[i],
            region: region[i],
        })
        .collect();

    Ok(CleanedData {
        profiles,
        targets,
        summary: CleaningSummary {
            rows_in,
            rows_dropped_missing_target: dropped,
            numeric: vec![age_summary, bmi_summary, children_summary],
            categorical: vec![sex_summary, smoker_summary, region_summary],
        },
    })
}

fn select<T: Copy>(rows: &[usize], column: &[T]) -> Vec<T> {
    rows.iter().map(|&i| column[i]).collect()
}

/// Median-imputes then winsorizes one numeric column. Quartiles are taken after
/// imputation, over the full column.
fn clean_numeric(
    column: &'static str,
    values: &[Option<f64>],
) -> Result<(Vec<f64>, NumericColumnSummary), CleaningError> {
    let observed: Vec<f64> = values.iter().flatten().copied().collect();
    let median = stats::median(&observed).ok_or(CleaningError::NothingToImpute(column))?;
    let imputed = values.len() - observed.len();
    if imputed > 0 {
        log::info!("Replacing {imputed} missing values in '{column}' with the median {median:.3}.");
    }

    let filled: Vec<f64> = values.iter().map(|v| v.unwrap_or(median)).collect();
    let bounds = IqrBounds::from_values(&filled).ok_or(CleaningError::NothingToImpute(column))?;
    let clipped = filled.iter().filter(|&&v| !bounds.contains(v)).count();
    if clipped > 0 {
        log::warn!(
            "{clipped} outliers detected in '{column}'; clipping to [{:.3}, {:.3}].",
            bounds.lower,
            bounds.upper
        );
    }
    let winsorized = filled.into_iter().map(|v| bounds.clip(v)).collect();

    Ok((
        winsorized,
        NumericColumnSummary {
            column: column.to_string(),
            median,
            imputed,
            bounds,
            clipped,
        },
    ))
}

/// Mode-imputes one categorical column. Ties go to the alphabetically first label.
fn impute_categorical<C: Category>(
    values: &[Option<C>],
) -> Result<(Vec<C>, CategoricalColumnSummary), CleaningError> {
    let mut counts: BTreeMap<&'static str, (usize, C)> = BTreeMap::new();
    for value in values.iter().flatten() {
        counts.entry(value.as_str()).or_insert((0, *value)).0 += 1;
    }
    // BTreeMap iterates alphabetically; keep the first label reaching the max count.
    let mode = counts
        .values()
        .fold(None::<(usize, C)>, |best, &(count, value)| match best {
            Some((best_count, _)) if best_count >= count => best,
            _ => Some((count, value)),
        })
        .map(|(_, value)| value)
        .ok_or(CleaningError::NothingToImpute(C::COLUMN))?;

    let imputed = values.iter().filter(|v| v.is_none()).count();
    if imputed > 0 {
        log::info!(
            "Replacing {imputed} missing values in '{}' with the mode '{}'.",
            C::COLUMN,
            mode.as_str()
        );
    }
    let filled = values.iter().map(|v| v.unwrap_or(mode)).collect();
    Ok((
        filled,
        CategoricalColumnSummary {
            column: C::COLUMN.to_string(),
            mode: mode.as_str().to_string(),
            imputed,
        },
    ))
}

/// Logs skewness and excess kurtosis of every numeric column. Diagnostic only.
pub fn log_distributions(profiles: &[PatientProfile], targets: &[f64]) {
    let columns: [(&str, Vec<f64>); 4] = [
        ("age", profiles.iter().map(|p| p.age).collect()),
        ("nb_children", profiles.iter().map(|p| p.nb_children).collect()),
        ("bmi", profiles.iter().map(|p| p.bmi).collect()),
        ("insurance_cost", targets.to_vec()),
    ];
    for (name, values) in &columns {
        let skew = stats::skewness(values).unwrap_or(0.0);
        let kurt = stats::excess_kurtosis(values).unwrap_or(0.0);
        log::info!("Distribution of {name}: skewness {skew:.2}, kurtosis {kurt:.2}");
    }
}
