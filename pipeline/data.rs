//! # Data Loading and Validation Module
//!
//! The exclusive entry point for patient data. It reads the flat, already joined
//! patient table (age, nb_children, bmi, insurance_cost, sex, smoker, region),
//! validates it against a strict schema, and converts it into the typed
//! [`PatientTable`] the cleaning and feature stages consume.
//!
//! - Strict Schema: column names are fixed. Missing columns fail with
//!   [`DataError::MissingColumns`], a numeric column holding text (or the
//!   reverse) fails with [`DataError::ColumnWrongType`]. Extra columns are ignored.
//! - Closed Vocabularies: every categorical cell must be one of its enumerated
//!   labels. Anything else is a [`DataError::InvalidCategory`], never coerced.
//! - Missing cells are *not* errors here. They survive as `None` so the
//!   cleaning stage can impute them and report how many it touched.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Columns every training table must provide, with their semantic type.
pub const REQUIRED_COLUMNS: [(&str, ColumnKind); 7] = [
    ("age", ColumnKind::Numeric),
    ("nb_children", ColumnKind::Numeric),
    ("bmi", ColumnKind::Numeric),
    ("insurance_cost", ColumnKind::Numeric),
    ("sex", ColumnKind::Categorical),
    ("smoker", ColumnKind::Categorical),
    ("region", ColumnKind::Categorical),
];

/// Smallest table the trainer will accept.
pub const MINIMUM_ROWS: usize = 10;

/// Semantic type of an input column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

impl ColumnKind {
    fn describe(self) -> &'static str {
        match self {
            ColumnKind::Numeric => "numeric",
            ColumnKind::Categorical => "categorical (text)",
        }
    }
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Required columns are missing from the dataset: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("Column '{column}' must be {expected}, but has type {found}.")]
    ColumnWrongType {
        column: String,
        expected: &'static str,
        found: String,
    },
    #[error("Column '{column}' row {row} holds '{value}', which is not one of: {allowed}.")]
    InvalidCategory {
        column: String,
        row: usize,
        value: String,
        allowed: String,
    },
    #[error("Non-finite value (NaN or Infinity) in column '{column}' at row {row}.")]
    NonFiniteValue { column: String, row: usize },
    #[error("Negative insurance cost {value} at row {row}; costs must be >= 0.")]
    NegativeTarget { row: usize, value: f64 },
    #[error("Dataset contains only {found} rows, but at least {required} are required.")]
    InsufficientRows { found: usize, required: usize },
    #[error("Column '{column}' has {found} values, expected {expected}.")]
    RaggedColumn {
        column: &'static str,
        found: usize,
        expected: usize,
    },
}

/// Closed vocabulary shared by the categorical columns.
pub trait Category: Copy + Sized + 'static {
    const COLUMN: &'static str;
    const ALL: &'static [Self];
    fn as_str(self) -> &'static str;

    /// Exact match against the lowercase labels; no case folding or trimming.
    fn parse(value: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_str() == value)
    }

    fn allowed() -> String {
        Self::ALL
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

macro_rules! category_enum {
    ($name:ident, $column:literal, { $($variant:ident => $label:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl Category for $name {
            const COLUMN: &'static str = $column;
            const ALL: &'static [Self] = &[$($name::$variant),+];

            fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$name as Category>::parse(s).ok_or_else(|| {
                    format!(
                        "'{}' is not a valid {} (expected one of: {})",
                        s,
                        $column,
                        <$name as Category>::allowed()
                    )
                })
            }
        }
    };
}

category_enum!(Sex, "sex", { Male => "male", Female => "female" });
category_enum!(Smoker, "smoker", { Yes => "yes", No => "no" });
category_enum!(Region, "region", {
    Southwest => "southwest",
    Southeast => "southeast",
    Northwest => "northwest",
    Northeast => "northeast",
});

impl Smoker {
    pub fn indicator(self) -> f64 {
        match self {
            Smoker::Yes => 1.0,
            Smoker::No => 0.0,
        }
    }
}

/// One complete patient profile: the model inputs without the target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatientProfile {
    pub age: f64,
    pub bmi: f64,
    pub nb_children: f64,
    pub sex: Sex,
    pub smoker: Smoker,
    pub region: Region,
}

/// Column-oriented patient table as loaded. `None` marks a missing cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientTable {
    pub age: Vec<Option<f64>>,
    pub nb_children: Vec<Option<f64>>,
    pub bmi: Vec<Option<f64>>,
    pub insurance_cost: Vec<Option<f64>>,
    pub sex: Vec<Option<Sex>>,
    pub smoker: Vec<Option<Smoker>>,
    pub region: Vec<Option<Region>>,
}

impl PatientTable {
    /// Builds a complete table from profiles and their observed costs.
    pub fn from_records(records: &[(PatientProfile, f64)]) -> Self {
        let mut table = PatientTable::default();
        for (profile, cost) in records {
            table.age.push(Some(profile.age));
            table.nb_children.push(Some(profile.nb_children));
            table.bmi.push(Some(profile.bmi));
            table.insurance_cost.push(Some(*cost));
            table.sex.push(Some(profile.sex));
            table.smoker.push(Some(profile.smoker));
            table.region.push(Some(profile.region));
        }
        table
    }

    pub fn len(&self) -> usize {
        self.age.len()
    }

    pub fn is_empty(&self) -> bool {
        self.age.is_empty()
    }

    /// Checks the value-level invariants that the schema check cannot see:
    /// equal column lengths, finite numerics, and non-negative costs.
    pub fn validate(&self) -> Result<(), DataError> {
        let n = self.len();
        let lengths: [(&'static str, usize); 7] = [
            ("age", self.age.len()),
            ("nb_children", self.nb_children.len()),
            ("bmi", self.bmi.len()),
            ("insurance_cost", self.insurance_cost.len()),
            ("sex", self.sex.len()),
            ("smoker", self.smoker.len()),
            ("region", self.region.len()),
        ];
        for (column, found) in lengths {
            if found != n {
                return Err(DataError::RaggedColumn {
                    column,
                    found,
                    expected: n,
                });
            }
        }

        for (column, values) in [
            ("age", &self.age),
            ("nb_children", &self.nb_children),
            ("bmi", &self.bmi),
            ("insurance_cost", &self.insurance_cost),
        ] {
            if let Some(row) = values
                .iter()
                .position(|v| v.is_some_and(|x| !x.is_finite()))
            {
                return Err(DataError::NonFiniteValue {
                    column: column.to_string(),
                    row: row + 1,
                });
            }
        }

        if let Some((row, value)) = self
            .insurance_cost
            .iter()
            .enumerate()
            .find_map(|(i, v)| v.filter(|x| *x < 0.0).map(|x| (i + 1, x)))
        {
            return Err(DataError::NegativeTarget { row, value });
        }
        Ok(())
    }
}

/// Confirms the seven required columns exist and carry the right semantic
/// type. Purely diagnostic: the frame is not modified.
pub fn validate_schema(df: &DataFrame) -> Result<(), DataError> {
    let present: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();

    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|(name, _)| !present.contains(*name))
        .map(|(name, _)| name.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(DataError::MissingColumns(missing));
    }

    for (name, kind) in REQUIRED_COLUMNS {
        let dtype = df.column(name)?.dtype().clone();
        let ok = match kind {
            ColumnKind::Numeric => is_numeric_dtype(&dtype) || dtype == DataType::Null,
            ColumnKind::Categorical => dtype == DataType::String || dtype == DataType::Null,
        };
        if !ok {
            return Err(DataError::ColumnWrongType {
                column: name.to_string(),
                expected: kind.describe(),
                found: format!("{dtype:?}"),
            });
        }
    }

    log::info!("Schema validation passed: all required columns present with expected types.");
    Ok(())
}

fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

/// Validates a frame and converts it into a typed [`PatientTable`].
pub fn table_from_frame(df: &DataFrame) -> Result<PatientTable, DataError> {
    validate_schema(df)?;
    internal::typed_table(df)
}

/// Loads and validates a training table from a delimited file
/// (tab-separated for `.tsv`, comma-separated otherwise). Schema problems
/// are reported before the row count is checked.
pub fn load_training_table(path: &Path) -> Result<PatientTable, DataError> {
    let df = read_delimited(path)?;
    validate_schema(&df)?;
    if df.height() < MINIMUM_ROWS {
        return Err(DataError::InsufficientRows {
            found: df.height(),
            required: MINIMUM_ROWS,
        });
    }
    let table = internal::typed_table(&df)?;
    log::info!("Loaded {} patient rows from '{}'.", table.len(), path.display());
    Ok(table)
}

/// Reads a delimited file into a polars frame. Null cells stay null.
pub fn read_delimited(path: &Path) -> Result<DataFrame, DataError> {
    let separator = match path.extension().and_then(|e| e.to_str()) {
        Some("tsv") | Some("tab") => b'\t',
        _ => b',',
    };
    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_parse_options(CsvParseOptions::default().with_separator(separator)),
        )
        .finish()?;
    Ok(df)
}

/// Reads a column as `f64` cells, or `None` when the frame does not have it.
/// Used for prediction requests, where absent fields are reported per request.
pub fn optional_numeric_column(
    df: &DataFrame,
    name: &str,
) -> Result<Option<Vec<Option<f64>>>, DataError> {
    if !internal::has_column(df, name) {
        return Ok(None);
    }
    internal::numeric_column(df, name).map(Some)
}

/// Reads a column as raw text cells, or `None` when the frame does not have it.
pub fn optional_text_column(
    df: &DataFrame,
    name: &str,
) -> Result<Option<Vec<Option<String>>>, DataError> {
    if !internal::has_column(df, name) {
        return Ok(None);
    }
    let casted = df.column(name)?.cast(&DataType::String)?;
    let cells = casted
        .as_materialized_series()
        .str()?
        .into_iter()
        .map(|cell| cell.map(str::to_string))
        .collect();
    Ok(Some(cells))
}

mod internal {
    use super::*;

    pub(super) fn has_column(df: &DataFrame, name: &str) -> bool {
        df.get_column_names().iter().any(|c| c.as_str() == name)
    }

    /// Expects a frame that already passed `validate_schema`.
    pub(super) fn typed_table(df: &DataFrame) -> Result<PatientTable, DataError> {
        let table = PatientTable {
            age: numeric_column(df, "age")?,
            nb_children: numeric_column(df, "nb_children")?,
            bmi: numeric_column(df, "bmi")?,
            insurance_cost: numeric_column(df, "insurance_cost")?,
            sex: categorical_column::<Sex>(df)?,
            smoker: categorical_column::<Smoker>(df)?,
            region: categorical_column::<Region>(df)?,
        };
        table.validate()?;
        Ok(table)
    }

    /// Only numeric (or all-null) columns are accepted; text is never parsed
    /// into numbers.
    pub(super) fn numeric_column(
        df: &DataFrame,
        name: &str,
    ) -> Result<Vec<Option<f64>>, DataError> {
        let column = df.column(name)?;
        let dtype = column.dtype();
        if !(is_numeric_dtype(dtype) || *dtype == DataType::Null) {
            return Err(DataError::ColumnWrongType {
                column: name.to_string(),
                expected: ColumnKind::Numeric.describe(),
                found: format!("{dtype:?}"),
            });
        }
        let casted = column.cast(&DataType::Float64)?;
        let values: Vec<Option<f64>> = casted.f64()?.into_iter().collect();
        Ok(values)
    }

    pub(super) fn categorical_column<C: Category>(
        df: &DataFrame,
    ) -> Result<Vec<Option<C>>, DataError> {
        let column = df.column(C::COLUMN)?;
        let casted = column.cast(&DataType::String)?;
        let series = casted.as_materialized_series();
        let chunked = series.str()?;
        chunked
            .into_iter()
            .enumerate()
            .map(|(i, cell)| match cell {
                None => Ok(None),
                Some(raw) if raw.trim().is_empty() => Ok(None),
                Some(raw) => C::parse(raw).map(Some).ok_or_else(|| DataError::InvalidCategory {
                    column: C::COLUMN.to_string(),
                    row: i + 1,
                    value: raw.to_string(),
                    allowed: C::allowed(),
                }),
            })
            .collect()
    }
}
