//! # Model Registry
//!
//! Keeps track of every model the service can predict with, together with its
//! running usage statistics and health.
//!
//! Models are discovered from a directory where each subdirectory is a model
//! ID that may carry a `metadata.json`. Unreadable metadata falls back to a
//! synthesized default, and an empty directory yields a single placeholder
//! model so that the service stays up in a degraded state.

use std::{
    collections::{BTreeMap, HashMap},
    fmt, fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    config::ModelConfig,
    error::{ClassifierError, Result},
    file::{self, ModelFiles},
    labels::default_classes,
};

pub const PLACEHOLDER_MODEL_ID: &str = "dummy";
const PLACEHOLDER_CLASSES: usize = 50;

/// Static description of a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_shape: Vec<usize>,
    #[serde(default)]
    pub output_shape: Vec<usize>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default = "Utc::now")]
    pub loaded_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ModelInfo {
    /// Metadata synthesized for a model directory without usable metadata.
    pub fn synthesized(model_id: &str, version: &str) -> Self {
        let classes = default_classes();
        Self {
            id: model_id.to_string(),
            name: format!("Model {}", model_id),
            version: version.to_string(),
            description: "Image classification model".to_string(),
            input_shape: vec![224, 224, 3],
            output_shape: vec![classes.len()],
            classes,
            loaded_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// The placeholder model used when no model could be found at all.
    pub fn placeholder() -> Self {
        let classes: Vec<String> = default_classes().into_iter().take(PLACEHOLDER_CLASSES).collect();
        Self {
            id: PLACEHOLDER_MODEL_ID.to_string(),
            name: "Dummy Model".to_string(),
            version: "1.0.0".to_string(),
            description: "Development dummy model for testing".to_string(),
            input_shape: vec![224, 224, 3],
            output_shape: vec![classes.len()],
            classes,
            loaded_at: Utc::now(),
            metadata: HashMap::from([("type".to_string(), "dummy".to_string())]),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.metadata.get("type").map(String::as_str) == Some("dummy")
    }

    /// Number of scores the model emits per image.
    pub fn output_dim(&self) -> usize {
        self.output_shape.iter().product()
    }

    /// Target `(width, height)` from an `[H, W, C]` or `[1, H, W, C]` input shape.
    pub fn input_dims(&self) -> Option<(u32, u32)> {
        let dims = match self.input_shape.as_slice() {
            [h, w, 3] | [1, h, w, 3] => (*w, *h),
            _ => return None,
        };
        Some((u32::try_from(dims.0).ok()?, u32::try_from(dims.1).ok()?))
    }

    /// Rejects metadata whose class list does not line up with the output.
    pub fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(ClassifierError::InvalidModel {
                id: self.id.clone(),
                reason: "model has no class labels".to_string(),
            });
        }
        if self.output_dim() != self.classes.len() {
            return Err(ClassifierError::InvalidModel {
                id: self.id.clone(),
                reason: format!(
                    "output dimension {} does not match {} class labels",
                    self.output_dim(),
                    self.classes.len()
                ),
            });
        }
        Ok(())
    }
}

/// Health tier derived from a model's error rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// `healthy` up to 10% errors, `degraded` up to 50%, `unhealthy` beyond.
    pub fn from_error_rate(rate: f64) -> Self {
        if rate > 0.5 {
            HealthStatus::Unhealthy
        } else if rate > 0.1 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Usage counters and health of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHealth {
    pub status: HealthStatus,
    pub last_used: DateTime<Utc>,
    pub predictions: u64,
    pub avg_time_ms: f64,
    pub errors: u64,
}

impl Default for ModelHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            last_used: Utc::now(),
            predictions: 0,
            avg_time_ms: 0.0,
            errors: 0,
        }
    }
}

impl ModelHealth {
    pub fn error_rate(&self) -> f64 {
        if self.predictions == 0 {
            0.0
        } else {
            self.errors as f64 / self.predictions as f64
        }
    }
}

/// A model known to the registry.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub info: ModelInfo,
    pub health: ModelHealth,
    pub total_time_ms: f64,
}

impl LoadedModel {
    pub fn new(info: ModelInfo) -> Self {
        Self {
            info,
            health: ModelHealth::default(),
            total_time_ms: 0.0,
        }
    }

    fn record(&mut self, elapsed_ms: f64, success: bool) {
        let health = &mut self.health;
        health.last_used = Utc::now();
        health.predictions += 1;
        self.total_time_ms += elapsed_ms;

        if success {
            health.avg_time_ms = self.total_time_ms / health.predictions as f64;
        } else {
            health.errors += 1;
        }
        health.status = HealthStatus::from_error_rate(health.error_rate());
    }
}

/// Counts and per-model health, as reported by [`ModelRegistry::status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Models currently served, the placeholder included.
    pub loaded_models: usize,
    /// Model directories on disk, including ones that failed to load.
    pub total_models: usize,
    pub models: BTreeMap<String, ModelHealth>,
}

/// Per-model health plus the aggregate system status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// `healthy` or `degraded`.
    pub status: HealthStatus,
    pub models: BTreeMap<String, ModelHealth>,
}

#[derive(Debug, Default)]
struct Inner {
    models: HashMap<String, LoadedModel>,
    default_model: Option<String>,
}

impl Inner {
    /// Repoints the default after `model_id` left the map.
    fn drop_default(&mut self, model_id: &str) {
        if self.models.is_empty() {
            insert_placeholder(self);
        } else if self.default_model.as_deref() == Some(model_id) {
            self.default_model = self.models.keys().min().cloned();
        }
    }
}

fn insert_placeholder(inner: &mut Inner) {
    inner.models.insert(
        PLACEHOLDER_MODEL_ID.to_string(),
        LoadedModel::new(ModelInfo::placeholder()),
    );
    inner.default_model = Some(PLACEHOLDER_MODEL_ID.to_string());
    info!("created placeholder model");
}

/// Thread-safe registry of loaded models.
#[derive(Debug)]
pub struct ModelRegistry {
    root: PathBuf,
    version: String,
    inner: RwLock<Inner>,
}

impl ModelRegistry {
    /// Creates an empty registry reading models from `root`.
    pub fn new<P: AsRef<Path>>(root: P, version: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            version: version.to_string(),
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(&config.path, &config.version)
    }

    /// Creates a registry and loads everything under `root`.
    pub fn open<P: AsRef<Path>>(root: P, version: &str) -> Self {
        let registry = Self::new(root, version);
        registry.load_all();
        registry
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Scans the model directory and loads every model found. Returns the
    /// number of models loaded from disk; zero means the placeholder was
    /// installed instead.
    pub fn load_all(&self) -> usize {
        self.remove_placeholder();
        let ids = match file::model_ids(&self.root) {
            Ok(ids) => ids,
            Err(e) => {
                error!(path = %self.root.display(), error = %e, "failed to read model directory");
                Vec::new()
            }
        };
        if ids.is_empty() {
            warn!(path = %self.root.display(), "no model directories found");
        }

        let mut loaded = 0;
        for id in ids {
            match self.load(&id) {
                Ok(_) => loaded += 1,
                Err(e) => error!(model_id = %id, error = %e, "failed to load model"),
            }
        }
        info!(count = loaded, "loaded models");

        if loaded == 0 {
            self.install_placeholder();
        }
        loaded
    }

    /// Loads (or replaces) a single model from its directory.
    pub fn load(&self, model_id: &str) -> Result<LoadedModel> {
        let info = self.read_model_info(model_id)?;
        info.validate()?;

        let model = LoadedModel::new(info);
        info!(
            model_id = %model_id,
            name = %model.info.name,
            version = %model.info.version,
            "loaded model"
        );

        let mut inner = self.inner.write();
        inner.models.insert(model_id.to_string(), model.clone());
        if inner.default_model.is_none() {
            inner.default_model = Some(model_id.to_string());
        }
        Ok(model)
    }

    fn read_model_info(&self, model_id: &str) -> Result<ModelInfo> {
        let files = ModelFiles::new(&self.root, model_id);
        if !files.exists() {
            return Err(ClassifierError::ModelNotFound(model_id.to_string()));
        }

        let info = match read_metadata(&files.metadata()) {
            Ok(mut info) => {
                info.id = model_id.to_string();
                info.loaded_at = Utc::now();
                if info.name.is_empty() {
                    info.name = format!("Model {}", model_id);
                }
                if info.version.is_empty() {
                    info.version = self.version.clone();
                }
                if info.input_shape.is_empty() {
                    info.input_shape = vec![224, 224, 3];
                }
                if info.output_shape.is_empty() {
                    info.output_shape = vec![info.classes.len()];
                }
                info
            }
            Err(e) => {
                warn!(model_id = %model_id, error = %e, "failed to load metadata, using defaults");
                ModelInfo::synthesized(model_id, &self.version)
            }
        };
        Ok(info)
    }

    fn install_placeholder(&self) {
        insert_placeholder(&mut self.inner.write());
    }

    fn remove_placeholder(&self) {
        let mut inner = self.inner.write();
        if inner.models.remove(PLACEHOLDER_MODEL_ID).is_some()
            && inner.default_model.as_deref() == Some(PLACEHOLDER_MODEL_ID)
        {
            inner.default_model = None;
        }
    }

    /// Returns a snapshot of the model with the given ID.
    pub fn get(&self, model_id: &str) -> Result<LoadedModel> {
        self.inner
            .read()
            .models
            .get(model_id)
            .cloned()
            .ok_or_else(|| ClassifierError::ModelNotFound(model_id.to_string()))
    }

    /// Like [`get`](Self::get), but an absent or empty ID selects the default model.
    pub fn resolve(&self, model_id: Option<&str>) -> Result<LoadedModel> {
        match model_id.filter(|id| !id.is_empty()) {
            Some(id) => self.get(id),
            None => self.default_model(),
        }
    }

    pub fn default_model(&self) -> Result<LoadedModel> {
        let inner = self.inner.read();
        let id = inner
            .default_model
            .as_deref()
            .ok_or_else(|| ClassifierError::ModelNotFound("no default model".to_string()))?;
        inner
            .models
            .get(id)
            .cloned()
            .ok_or_else(|| ClassifierError::ModelNotFound(id.to_string()))
    }

    pub fn default_id(&self) -> Option<String> {
        self.inner.read().default_model.clone()
    }

    /// All loaded models, ordered by ID.
    pub fn list(&self) -> Vec<ModelInfo> {
        let inner = self.inner.read();
        let mut infos: Vec<ModelInfo> = inner.models.values().map(|m| m.info.clone()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    pub fn len(&self) -> usize {
        self.inner.read().models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records the outcome of one prediction attempt against `model_id`.
    pub fn record_outcome(&self, model_id: &str, elapsed_ms: f64, success: bool) {
        let mut inner = self.inner.write();
        let Some(model) = inner.models.get_mut(model_id) else {
            debug!(model_id = %model_id, "outcome for unknown model ignored");
            return;
        };
        let before = model.health.status;
        model.record(elapsed_ms, success);
        if model.health.status != before {
            warn!(
                model_id = %model_id,
                from = %before,
                to = %model.health.status,
                error_rate = model.health.error_rate(),
                "model health changed"
            );
        }
    }

    pub fn is_healthy(&self, model_id: &str) -> bool {
        self.inner
            .read()
            .models
            .get(model_id)
            .is_some_and(|m| m.health.status == HealthStatus::Healthy)
    }

    /// Drops the in-memory entry and loads the model again from disk.
    ///
    /// Between the two steps a concurrent `get` sees `ModelNotFound`. The
    /// placeholder has no directory and is rebuilt in place instead. When the
    /// load fails the default moves on as in [`unload`](Self::unload).
    pub fn reload(&self, model_id: &str) -> Result<LoadedModel> {
        if model_id == PLACEHOLDER_MODEL_ID {
            let mut inner = self.inner.write();
            if !inner.models.contains_key(model_id) {
                return Err(ClassifierError::ModelNotFound(model_id.to_string()));
            }
            let model = LoadedModel::new(ModelInfo::placeholder());
            inner.models.insert(model_id.to_string(), model.clone());
            info!(model_id = %model_id, "reset placeholder model");
            return Ok(model);
        }

        self.inner.write().models.remove(model_id);
        match self.load(model_id) {
            Ok(model) => {
                info!(model_id = %model_id, "reloaded model");
                Ok(model)
            }
            Err(e) => {
                let mut inner = self.inner.write();
                inner.drop_default(model_id);
                warn!(
                    model_id = %model_id,
                    default = ?inner.default_model,
                    error = %e,
                    "reload failed, model removed"
                );
                Err(e)
            }
        }
    }

    /// Removes a model. If it was the default, the lowest remaining ID takes
    /// over; removing the last model installs the placeholder.
    pub fn unload(&self, model_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.models.remove(model_id).is_none() {
            return Err(ClassifierError::ModelNotFound(model_id.to_string()));
        }
        inner.drop_default(model_id);
        info!(model_id = %model_id, "unloaded model");
        Ok(())
    }

    pub fn status(&self) -> ModelStatus {
        let total_models = file::model_ids(&self.root).map(|ids| ids.len()).unwrap_or(0);
        let inner = self.inner.read();
        ModelStatus {
            loaded_models: inner.models.len(),
            total_models,
            models: inner
                .models
                .iter()
                .map(|(id, m)| (id.clone(), m.health.clone()))
                .collect(),
        }
    }

    /// Per-model health and the aggregate status. The system is `degraded`
    /// when any model is not healthy or only the placeholder is loaded.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let inner = self.inner.read();
        let models: BTreeMap<String, ModelHealth> = inner
            .models
            .iter()
            .map(|(id, m)| (id.clone(), m.health.clone()))
            .collect();

        let placeholder_only = inner.models.values().all(|m| m.info.is_placeholder());
        let any_unhealthy = models.values().any(|h| h.status != HealthStatus::Healthy);
        let status = if placeholder_only || any_unhealthy {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        HealthSnapshot { status, models }
    }

    /// Sum of predictions and the prediction-weighted mean latency.
    pub fn totals(&self) -> (u64, f64) {
        let inner = self.inner.read();
        let predictions: u64 = inner.models.values().map(|m| m.health.predictions).sum();
        let total_time: f64 = inner.models.values().map(|m| m.total_time_ms).sum();
        let avg = if predictions == 0 {
            0.0
        } else {
            total_time / predictions as f64
        };
        (predictions, avg)
    }
}

fn read_metadata(path: &Path) -> Result<ModelInfo> {
    let json = fs::read_to_string(path)?;
    let info: ModelInfo = serde_json::from_str(&json)?;
    Ok(info)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn write_metadata(root: &Path, id: &str, json: &str) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("metadata.json"), json).unwrap();
    }

    #[test]
    fn test_health_thresholds() {
        assert_eq!(HealthStatus::from_error_rate(0.0), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_error_rate(0.1), HealthStatus::Healthy);
        assert_eq!(HealthStatus::from_error_rate(0.11), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(0.5), HealthStatus::Degraded);
        assert_eq!(HealthStatus::from_error_rate(0.51), HealthStatus::Unhealthy);
    }

    #[test]
    fn test_input_dims() {
        let mut info = ModelInfo::placeholder();
        assert_eq!(info.input_dims(), Some((224, 224)));
        info.input_shape = vec![1, 128, 256, 3];
        assert_eq!(info.input_dims(), Some((256, 128)));
        info.input_shape = vec![3, 224, 224];
        assert_eq!(info.input_dims(), None);
    }

    #[test]
    fn test_load_metadata_forces_directory_id() {
        let root = tempdir().unwrap();
        write_metadata(
            root.path(),
            "pets",
            r#"{"id": "other", "name": "Pets", "version": "2.1", "classes": ["cat", "dog"]}"#,
        );

        let registry = ModelRegistry::open(root.path(), "latest");
        let model = registry.get("pets").unwrap();
        assert_eq!(model.info.id, "pets");
        assert_eq!(model.info.name, "Pets");
        assert_eq!(model.info.output_shape, vec![2]);
        assert_eq!(registry.default_id().as_deref(), Some("pets"));
    }

    #[test]
    fn test_malformed_metadata_uses_defaults() {
        let root = tempdir().unwrap();
        write_metadata(root.path(), "broken", "{ not json");

        let registry = ModelRegistry::open(root.path(), "v9");
        let model = registry.get("broken").unwrap();
        assert_eq!(model.info.name, "Model broken");
        assert_eq!(model.info.version, "v9");
        assert_eq!(model.info.classes.len(), model.info.output_dim());
    }

    #[test]
    fn test_mismatched_classes_are_rejected() {
        let root = tempdir().unwrap();
        write_metadata(
            root.path(),
            "bad",
            r#"{"output_shape": [1, 1000], "classes": ["cat", "dog"]}"#,
        );

        let registry = ModelRegistry::new(root.path(), "latest");
        let err = registry.load("bad").unwrap_err();
        assert!(matches!(err, ClassifierError::InvalidModel { .. }));
        assert_eq!(err.code(), "MODEL_LOAD_FAILED");

        // With nothing else loadable the placeholder takes over.
        assert_eq!(registry.load_all(), 0);
        assert_eq!(registry.default_id().as_deref(), Some(PLACEHOLDER_MODEL_ID));
    }

    #[test]
    fn test_record_outcome_updates_counters() {
        let registry = ModelRegistry::open(tempdir().unwrap().path(), "latest");
        registry.record_outcome(PLACEHOLDER_MODEL_ID, 10.0, true);
        registry.record_outcome(PLACEHOLDER_MODEL_ID, 30.0, true);

        let health = registry.get(PLACEHOLDER_MODEL_ID).unwrap().health;
        assert_eq!(health.predictions, 2);
        assert_eq!(health.errors, 0);
        assert!((health.avg_time_ms - 20.0).abs() < 1e-9);

        registry.record_outcome(PLACEHOLDER_MODEL_ID, 0.0, false);
        let health = registry.get(PLACEHOLDER_MODEL_ID).unwrap().health;
        assert_eq!(health.predictions, 3);
        assert_eq!(health.errors, 1);
        assert_eq!(health.status, HealthStatus::Degraded);
        assert!(!registry.is_healthy(PLACEHOLDER_MODEL_ID));
    }

    #[test]
    fn test_unload_moves_default() {
        let root = tempdir().unwrap();
        write_metadata(root.path(), "a", r#"{"classes": ["x"]}"#);
        write_metadata(root.path(), "b", r#"{"classes": ["y"]}"#);
        let registry = ModelRegistry::open(root.path(), "latest");
        assert_eq!(registry.default_id().as_deref(), Some("a"));

        registry.unload("a").unwrap();
        assert_eq!(registry.default_id().as_deref(), Some("b"));
        assert!(matches!(
            registry.unload("a"),
            Err(ClassifierError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_unload_last_model_installs_placeholder() {
        let root = tempdir().unwrap();
        write_metadata(root.path(), "only", r#"{"classes": ["x"]}"#);
        let registry = ModelRegistry::open(root.path(), "latest");

        registry.unload("only").unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.default_id().as_deref(), Some(PLACEHOLDER_MODEL_ID));
        assert!(registry.default_model().is_ok());
    }
}
