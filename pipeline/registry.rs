//! # Model Registry
//!
//! File-system registry of trained artifacts with a single production pointer.
//!
//! ```text
//! <root>/artifacts/<model_id>/pipeline.toml
//! <root>/artifacts/<model_id>/metadata.toml
//! <root>/artifacts/<model_id>/report.toml
//! <root>/PRODUCTION
//! ```
//!
//! Writes are ordered so a reader never sees a torn state:
//!
//! 1. All artifact files are written and synced inside a hidden staging
//!    directory, which is then renamed to `artifacts/<model_id>`.
//! 2. The pointer is written to a uniquely named temporary file and renamed
//!    over `PRODUCTION`. This is always the last step.
//!
//! A crash before step 2 leaves the previous pointer (if any) untouched and
//! still referencing a complete artifact. Concurrent promotions each use their
//! own temporary names; the last rename wins.

use crate::estimate::{EvaluationReport, TrainingOutcome};
use crate::model::{
    FittedPipeline, METADATA_FILE, ModelError, ModelMetadata, PIPELINE_FILE, TrainedModel,
};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const POINTER_FILE: &str = "PRODUCTION";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const REPORT_FILE: &str = "report.toml";

const STAGING_PREFIX: &str = ".staging-";
const MAX_ID_ATTEMPTS: usize = 64;

/// Distinguishes temporary names created by one process in the same nanosecond.
static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("No production model is registered in '{0}'.")]
    ModelNotFound(String),
    #[error("Production model '{id}' cannot be loaded: {reason}")]
    ModelCorrupt { id: String, reason: String },
    #[error("Registry I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to serialize artifact: {0}")]
    Serialize(#[from] ModelError),
}

/// Result of a promotion attempt. A rejection is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PromotionOutcome {
    Promoted { model_id: String, r2: f64 },
    Rejected { r2: f64, threshold: f64 },
}

#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    /// Opens (creating if needed) a registry rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let root = root.into();
        fs::create_dir_all(root.join(ARTIFACTS_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, id: &str) -> PathBuf {
        self.root.join(ARTIFACTS_DIR).join(id)
    }

    /// Registers `outcome` as production if its held-out R² exceeds `threshold`.
    /// Otherwise nothing is written and the current production model stays.
    pub fn promote(
        &self,
        outcome: &TrainingOutcome,
        threshold: f64,
    ) -> Result<PromotionOutcome, RegistryError> {
        let r2 = outcome.report.held_out_r2();
        if !(r2 > threshold) {
            log::warn!(
                "Model not registered: held-out R² {r2:.3} does not exceed the acceptance \
                 threshold {threshold:.2}."
            );
            return Ok(PromotionOutcome::Rejected { r2, threshold });
        }
        let model_id = self.write_artifact(&outcome.model, &outcome.report)?;
        self.publish(&model_id)?;
        log::info!("Model '{model_id}' promoted to production (R² {r2:.3}).");
        Ok(PromotionOutcome::Promoted { model_id, r2 })
    }

    /// Writes a complete artifact under a fresh id and returns the id. Does not
    /// touch the production pointer.
    pub fn write_artifact(
        &self,
        model: &TrainedModel,
        report: &EvaluationReport,
    ) -> Result<String, RegistryError> {
        let base_id = internal::new_model_id(&model.metadata.experiment);
        let mut model_id = base_id.clone();
        let mut attempt = 1;
        while self.artifact_dir(&model_id).exists() {
            model_id = format!("{base_id}-{attempt}");
            attempt += 1;
        }

        let staging = self
            .root
            .join(ARTIFACTS_DIR)
            .join(format!("{STAGING_PREFIX}{}", internal::unique_suffix()));
        fs::create_dir_all(&staging)?;

        let written = (|| -> Result<(), RegistryError> {
            let mut metadata = model.metadata.clone();
            metadata.model_id = Some(model_id.clone());
            model.pipeline.save(&staging.join(PIPELINE_FILE))?;
            metadata.save(&staging.join(METADATA_FILE))?;
            report.save(&staging.join(REPORT_FILE))?;
            internal::sync_dir(&staging)
        })();
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        // Another writer may claim the same id between the check and the rename.
        loop {
            match fs::rename(&staging, self.artifact_dir(&model_id)) {
                Ok(()) => break,
                Err(_) if attempt < MAX_ID_ATTEMPTS && self.artifact_dir(&model_id).exists() => {
                    model_id = format!("{base_id}-{attempt}");
                    attempt += 1;
                    let mut metadata = model.metadata.clone();
                    metadata.model_id = Some(model_id.clone());
                    if let Err(e) = metadata.save(&staging.join(METADATA_FILE)) {
                        let _ = fs::remove_dir_all(&staging);
                        return Err(e.into());
                    }
                }
                Err(e) => {
                    let _ = fs::remove_dir_all(&staging);
                    return Err(e.into());
                }
            }
        }
        internal::sync_dir(&self.root.join(ARTIFACTS_DIR))?;
        log::debug!("Wrote artifact '{model_id}'.");
        Ok(model_id)
    }

    /// Atomically points production at an existing, complete artifact.
    pub fn publish(&self, model_id: &str) -> Result<(), RegistryError> {
        if !self.artifact_dir(model_id).join(METADATA_FILE).is_file() {
            return Err(RegistryError::ModelCorrupt {
                id: model_id.to_string(),
                reason: "refusing to publish an artifact without metadata".into(),
            });
        }
        let tmp = self
            .root
            .join(format!(".{POINTER_FILE}.{}.tmp", internal::unique_suffix()));
        {
            let mut file = fs::File::create(&tmp)?;
            writeln!(file, "{model_id}")?;
            file.sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, self.root.join(POINTER_FILE)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        internal::sync_dir(&self.root)
    }

    /// The id the production pointer currently holds, if any.
    pub fn production_id(&self) -> Result<Option<String>, RegistryError> {
        let text = match fs::read_to_string(self.root.join(POINTER_FILE)) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let id = text.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(RegistryError::ModelCorrupt {
                id: id.to_string(),
                reason: "production pointer does not hold a valid model id".into(),
            });
        }
        Ok(Some(id.to_string()))
    }

    /// Resolves the production pointer to an immutable, shareable model handle.
    pub fn resolve(&self) -> Result<Arc<TrainedModel>, RegistryError> {
        let id = self
            .production_id()?
            .ok_or_else(|| RegistryError::ModelNotFound(self.root.display().to_string()))?;
        let model = self.load_artifact(&id)?;
        log::info!(
            "Resolved production model '{id}' ({} trees, {} encoded columns).",
            model.pipeline.forest.trees.len(),
            model.metadata.encoded_columns.len()
        );
        Ok(Arc::new(model))
    }

    pub fn load_artifact(&self, id: &str) -> Result<TrainedModel, RegistryError> {
        let dir = self.artifact_dir(id);
        let corrupt = |reason: String| RegistryError::ModelCorrupt {
            id: id.to_string(),
            reason,
        };
        let metadata = self.load_metadata(id)?;
        let pipeline = FittedPipeline::load(&dir.join(PIPELINE_FILE))
            .map_err(|e| corrupt(format!("pipeline: {e}")))?;
        TrainedModel::new(metadata, pipeline).map_err(|e| corrupt(e.to_string()))
    }

    /// Reads an artifact's feature record without touching the forest.
    pub fn load_metadata(&self, id: &str) -> Result<ModelMetadata, RegistryError> {
        ModelMetadata::load(&self.artifact_dir(id).join(METADATA_FILE)).map_err(|e| {
            RegistryError::ModelCorrupt {
                id: id.to_string(),
                reason: format!("metadata: {e}"),
            }
        })
    }

    pub fn load_report(&self, id: &str) -> Result<EvaluationReport, RegistryError> {
        EvaluationReport::load(&self.artifact_dir(id).join(REPORT_FILE)).map_err(|e| {
            RegistryError::ModelCorrupt {
                id: id.to_string(),
                reason: format!("report: {e}"),
            }
        })
    }

    /// Ids of all complete artifacts, sorted. Staging directories are skipped.
    pub fn list_artifacts(&self) -> Result<Vec<String>, RegistryError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(ARTIFACTS_DIR))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                ids.push(name);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Caller-owned cache of the resolved production model. It reloads only when
/// the pointer moves or after [`ModelCache::invalidate`].
#[derive(Debug)]
pub struct ModelCache {
    registry: Registry,
    current: Option<(String, Arc<TrainedModel>)>,
}

impl ModelCache {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            current: None,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn get(&mut self) -> Result<Arc<TrainedModel>, RegistryError> {
        let id = self
            .registry
            .production_id()?
            .ok_or_else(|| RegistryError::ModelNotFound(self.registry.root.display().to_string()))?;
        if let Some((cached_id, model)) = &self.current {
            if *cached_id == id {
                return Ok(Arc::clone(model));
            }
        }
        let model = Arc::new(self.registry.load_artifact(&id)?);
        log::info!("Model cache loaded '{id}'.");
        self.current = Some((id, Arc::clone(&model)));
        Ok(model)
    }

    pub fn invalidate(&mut self) {
        self.current = None;
    }

    pub fn cached_id(&self) -> Option<&str> {
        self.current.as_ref().map(|(id, _)| id.as_str())
    }
}

mod internal {
    use super::*;

    fn nanos() -> u128 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0)
    }

    pub(super) fn new_model_id(experiment: &str) -> String {
        format!("{experiment}-{}", nanos())
    }

    /// Unique within this process and, via the pid, across processes.
    pub(super) fn unique_suffix() -> String {
        let n = WRITE_COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{n}", std::process::id(), nanos())
    }

    /// Persists directory entries (renames) on platforms that support it.
    pub(super) fn sync_dir(dir: &Path) -> Result<(), RegistryError> {
        #[cfg(unix)]
        fs::File::open(dir)?.sync_all()?;
        #[cfg(not(unix))]
        let _ = dir;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use crate::data::{PatientProfile, PatientTable, Region, Sex, Smoker};
    use crate::estimate::train;
    use crate::forest::ForestParams;
    use tempfile::tempdir;

    fn outcome() -> TrainingOutcome {
        let records: Vec<(PatientProfile, f64)> = (0..60)
            .map(|i| {
                let smoker = if i % 4 == 0 { Smoker::Yes } else { Smoker::No };
                let age = 18.0 + (i * 7 % 60) as f64;
                let bmi = 17.0 + (i * 3 % 25) as f64;
                let profile = PatientProfile {
                    age,
                    bmi,
                    nb_children: (i % 3) as f64,
                    sex: if i % 2 == 0 { Sex::Male } else { Sex::Female },
                    smoker,
                    region: [Region::Southwest, Region::Northeast][i % 2],
                };
                (profile, 3000.0 + 200.0 * age + 15000.0 * smoker.indicator())
            })
            .collect();
        let config = TrainingConfig {
            forest: ForestParams {
                n_estimators: 8,
                ..ForestParams::default()
            },
            ..TrainingConfig::default()
        };
        train(&PatientTable::from_records(&records), &config).unwrap()
    }

    #[test]
    fn empty_registry_has_no_production_model() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        assert_eq!(registry.production_id().unwrap(), None);
        assert!(matches!(registry.resolve(), Err(RegistryError::ModelNotFound(_))));
    }

    #[test]
    fn promotion_writes_artifact_then_pointer() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        let outcome = outcome();
        let PromotionOutcome::Promoted { model_id, .. } =
            registry.promote(&outcome, f64::NEG_INFINITY).unwrap()
        else {
            panic!("expected promotion");
        };
        assert_eq!(registry.production_id().unwrap().as_deref(), Some(model_id.as_str()));
        assert!(model_id.starts_with("cost_prediction-"));
        let resolved = registry.resolve().unwrap();
        assert_eq!(resolved.metadata.model_id.as_deref(), Some(model_id.as_str()));
        assert_eq!(resolved.pipeline, outcome.model.pipeline);
        assert_eq!(registry.load_report(&model_id).unwrap().rows, 60);
    }

    #[test]
    fn rejected_candidate_leaves_production_untouched() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        let outcome = outcome();
        registry.promote(&outcome, f64::NEG_INFINITY).unwrap();
        let before = registry.production_id().unwrap();
        let artifacts_before = registry.list_artifacts().unwrap();

        let result = registry.promote(&outcome, 1.0).unwrap();
        assert!(matches!(result, PromotionOutcome::Rejected { threshold, .. } if threshold == 1.0));
        assert_eq!(registry.production_id().unwrap(), before);
        assert_eq!(registry.list_artifacts().unwrap(), artifacts_before);
    }

    #[test]
    fn corrupt_artifacts_are_reported_as_such() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        let PromotionOutcome::Promoted { model_id, .. } =
            registry.promote(&outcome(), f64::NEG_INFINITY).unwrap()
        else {
            panic!("expected promotion");
        };
        let artifact = dir.path().join(ARTIFACTS_DIR).join(&model_id);
        fs::write(artifact.join(PIPELINE_FILE), "trees = \"truncated").unwrap();
        assert!(matches!(registry.resolve(), Err(RegistryError::ModelCorrupt { .. })));

        fs::remove_file(artifact.join(METADATA_FILE)).unwrap();
        assert!(matches!(registry.resolve(), Err(RegistryError::ModelCorrupt { .. })));
    }

    #[test]
    fn well_formed_toml_with_a_broken_tree_is_corrupt() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        let PromotionOutcome::Promoted { model_id, .. } =
            registry.promote(&outcome(), f64::NEG_INFINITY).unwrap()
        else {
            panic!("expected promotion");
        };
        let path = dir.path().join(ARTIFACTS_DIR).join(&model_id).join(PIPELINE_FILE);
        let mut pipeline = FittedPipeline::load(&path).unwrap();
        pipeline.forest.trees[0].children_left[0] = 99_999;
        pipeline.save(&path).unwrap();

        assert!(matches!(registry.resolve(), Err(RegistryError::ModelCorrupt { .. })));
        let mut cache = ModelCache::new(registry.clone());
        assert!(matches!(cache.get(), Err(RegistryError::ModelCorrupt { .. })));
    }

    #[test]
    fn garbage_pointer_is_corrupt_not_missing() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        fs::write(dir.path().join(POINTER_FILE), "../../etc\n").unwrap();
        assert!(matches!(registry.production_id(), Err(RegistryError::ModelCorrupt { .. })));
    }

    #[test]
    fn cache_reloads_only_when_the_pointer_moves() {
        let dir = tempdir().unwrap();
        let registry = Registry::open(dir.path()).unwrap();
        let outcome = outcome();
        registry.promote(&outcome, f64::NEG_INFINITY).unwrap();

        let mut cache = ModelCache::new(registry.clone());
        let first = cache.get().unwrap();
        let again = cache.get().unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        cache.invalidate();
        assert_eq!(cache.cached_id(), None);
        let reloaded = cache.get().unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));

        let PromotionOutcome::Promoted { model_id, .. } =
            registry.promote(&outcome, f64::NEG_INFINITY).unwrap()
        else {
            panic!("expected promotion");
        };
        let newer = cache.get().unwrap();
        assert_eq!(cache.cached_id(), Some(model_id.as_str()));
        assert!(!Arc::ptr_eq(&reloaded, &newer));
    }
}
