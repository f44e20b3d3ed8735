#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]

//! Insurance-cost prediction: data validation, feature engineering, cleaning,
//! preprocessing, random-forest training with cross-validated evaluation, a
//! file-system model registry and a serving-side predictor.

pub mod cleaning;
pub mod config;
pub mod data;
pub mod estimate;
pub mod features;
pub mod forest;
pub mod metrics;
pub mod model;
pub mod predict;
pub mod preprocess;
pub mod registry;
pub mod stats;
