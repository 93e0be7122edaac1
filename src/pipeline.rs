//! This module provides the high-level `ClassificationService` that carries an
//! upload from raw bytes to a stored prediction.
//!
//! The service owns the upload policy, the preprocessor, and handles to the
//! model registry, the inference engine, and the result store. Every
//! operation a transport layer needs goes through it:
//!
//! - `process_upload`: validate, decode, and re-encode an upload.
//! - `predict`: decode, preprocess, infer, and postprocess; store the result.
//! - `fetch_result`, `list_models`, `model_health_snapshot`, `stats`.
//! - `predict_batch`: many images, failures collected per item.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use image::{imageops::FilterType, DynamicImage};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::{
    codec::{self, DecodedImage, ImageMetadata, ImageValidator},
    config::AppConfig,
    engine::{build_engine, InferenceEngine},
    error::{ClassifierError, ErrorResponse, Result, CODE_PREDICTION_FAILED},
    file::ModelFiles,
    labels::{postprocess, ClassificationResult},
    processor::{ImagePreprocessor, ImageProcessor},
    registry::{
        HealthSnapshot, HealthStatus, LoadedModel, ModelInfo, ModelRegistry, ModelStatus,
        PLACEHOLDER_MODEL_ID,
    },
    store::{generate_id, spawn_sweeper, PredictionResult, ResultStore, SweeperHandle},
};

/// A callback function for reporting progress.
///
/// The first argument is the progress percentage (0.0 to 1.0), and the second
/// is a status message.
pub type ProgressCallback = Box<dyn Fn(f32, String) + Send + Sync>;

/// Deadline and cancellation signal for one request.
///
/// Checked between pipeline stages; a stage that has started always runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

impl RequestContext {
    /// A context that never expires and cannot be cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Cancels the request once `true` is sent on the channel.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn check(&self) -> Result<()> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(ClassifierError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(ClassifierError::DeadlineExceeded);
        }
        Ok(())
    }
}

/// An accepted upload: its metadata and the re-encoded JPEG bytes sized for
/// the model input.
#[derive(Debug, Clone)]
pub struct ProcessedUpload {
    pub metadata: ImageMetadata,
    pub bytes: Vec<u8>,
}

/// One image of a batch request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRequest {
    pub id: String,
    pub data: Vec<u8>,
    pub filename: String,
}

/// Outcome of [`ClassificationService::predict_batch`], keyed by request ID
/// in request order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictionResponse {
    /// `true` when no item failed.
    pub success: bool,
    pub results: IndexMap<String, PredictionResult>,
    pub errors: IndexMap<String, ErrorResponse>,
    pub process_time_ms: f64,
}

/// Service-wide counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub models_loaded: usize,
    pub total_predictions: u64,
    pub average_latency_ms: f64,
    pub system_health: HealthStatus,
}

/// The end-to-end classification service.
#[derive(Debug)]
pub struct ClassificationService {
    config: AppConfig,
    validator: ImageValidator,
    preprocessor: ImagePreprocessor,
    registry: Arc<ModelRegistry>,
    engine: Arc<dyn InferenceEngine>,
    store: Arc<ResultStore>,
}

impl ClassificationService {
    /// Creates a service from its parts and registers every model of
    /// `registry` with `engine`.
    pub fn new(
        config: AppConfig,
        registry: Arc<ModelRegistry>,
        engine: Arc<dyn InferenceEngine>,
        store: Arc<ResultStore>,
    ) -> Result<Self> {
        config.validate()?;
        let service = Self {
            validator: ImageValidator::from_config(&config.upload),
            preprocessor: ImagePreprocessor::from_config(&config.preprocess)?,
            config,
            registry,
            engine,
            store,
        };
        service.register_all();
        Ok(service)
    }

    /// Builds every component from `config`: loads the model directory,
    /// selects the engine, and starts with an empty result store.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let registry = ModelRegistry::from_config(&config.model);
        registry.load_all();
        let engine = build_engine(config.engine, &config.onnx)?;
        info!(engine = engine.name(), models = registry.len(), "classification service ready");
        Self::new(config, Arc::new(registry), engine, Arc::new(ResultStore::new()))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<ResultStore> {
        &self.store
    }

    pub fn engine(&self) -> &Arc<dyn InferenceEngine> {
        &self.engine
    }

    fn register_all(&self) {
        for info in self.registry.list() {
            self.register(&info);
        }
    }

    fn register(&self, info: &ModelInfo) {
        let files = ModelFiles::new(self.registry.root(), &info.id);
        match self.engine.register(info, &files) {
            Ok(()) => debug!(model_id = %info.id, engine = self.engine.name(), "registered model"),
            Err(e) => error!(model_id = %info.id, error = %e, "failed to register model with engine"),
        }
    }

    /// The preprocessor targeting `model`'s input size, or the configured size
    /// when the model's input shape does not name one.
    pub fn preprocessor_for(&self, model: &ModelInfo) -> ImagePreprocessor {
        match model.input_dims() {
            Some((width, height)) => self.preprocessor.with_size(width, height),
            None => self.preprocessor.clone(),
        }
    }

    /// Validates and decodes an upload, then re-encodes it as JPEG at the
    /// configured model input size.
    pub fn process_upload(
        &self,
        data: &[u8],
        filename: &str,
        content_type: &str,
        declared_size: u64,
        ctx: &RequestContext,
    ) -> Result<ProcessedUpload> {
        self.validator.validate(data, content_type, declared_size)?;
        ctx.check()?;

        let decoded = codec::decode(data)?;
        ctx.check()?;

        let metadata = ImageMetadata::new(filename, declared_size, &decoded, content_type);
        let resized = decoded.image.resize_exact(
            self.preprocessor.width,
            self.preprocessor.height,
            FilterType::Lanczos3,
        );
        let bytes = codec::encode_jpeg(&resized, self.config.upload.reencode_quality)?;

        info!(
            filename = %metadata.filename,
            width = metadata.width,
            height = metadata.height,
            format = %metadata.format,
            "processed upload"
        );
        Ok(ProcessedUpload { metadata, bytes })
    }

    /// Classifies image bytes with the given model, or the default model when
    /// `model_id` is `None`. The result is stored before it is returned.
    ///
    /// Any failure after the model is resolved counts against its health.
    pub fn predict(
        &self,
        data: &[u8],
        metadata: ImageMetadata,
        model_id: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<PredictionResult> {
        let model = self.registry.resolve(model_id)?;
        let start = Instant::now();
        let outcome = ctx
            .check()
            .and_then(|()| codec::decode(data))
            .and_then(|decoded| {
                ctx.check()?;
                self.classify(&model.info, &decoded.image, ctx)
            });
        self.finish(model, metadata, start, outcome)
    }

    fn predict_decoded(
        &self,
        decoded: &DecodedImage,
        metadata: ImageMetadata,
        model_id: Option<&str>,
        ctx: &RequestContext,
    ) -> Result<PredictionResult> {
        let model = self.registry.resolve(model_id)?;
        let start = Instant::now();
        let outcome = self.classify(&model.info, &decoded.image, ctx);
        self.finish(model, metadata, start, outcome)
    }

    fn classify(
        &self,
        model: &ModelInfo,
        image: &DynamicImage,
        ctx: &RequestContext,
    ) -> Result<Vec<ClassificationResult>> {
        let tensor = self.preprocessor_for(model).process(image)?;
        ctx.check()?;

        let scores = self.engine.infer(&tensor, model)?;
        ctx.check()?;

        postprocess(&scores, &model.classes, self.config.model.top_k)
    }

    fn finish(
        &self,
        model: LoadedModel,
        metadata: ImageMetadata,
        start: Instant,
        outcome: Result<Vec<ClassificationResult>>,
    ) -> Result<PredictionResult> {
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let model_id = model.info.id.clone();

        let predictions = match outcome {
            Ok(predictions) => predictions,
            Err(e) => {
                self.registry.record_outcome(&model_id, elapsed_ms, false);
                warn!(model_id = %model_id, elapsed_ms, error = %e, "prediction failed");
                return Err(e);
            }
        };
        self.registry.record_outcome(&model_id, elapsed_ms, true);

        let result = PredictionResult {
            id: generate_id(),
            predictions,
            metadata,
            processed_at: Utc::now(),
            process_time_ms: elapsed_ms,
            model_info: model.info,
        };
        self.store.put(result.clone());

        info!(
            result_id = %result.id,
            model_id = %model_id,
            elapsed_ms,
            top = result.top_prediction().map(|p| p.class_name.as_str()).unwrap_or(""),
            "prediction completed"
        );
        Ok(result)
    }

    /// Reports progress using the provided callback.
    fn report_progress(progress_callback: Option<&ProgressCallback>, progress: f32, message: &str) {
        if let Some(cb) = progress_callback {
            cb(progress, message.to_string());
        }
    }

    /// Classifies several images with the same model. A failing image is
    /// recorded under its request ID and does not stop the batch.
    ///
    /// Cancellation or an elapsed deadline does stop it: the interrupted item
    /// and every item not yet started are reported with `REQUEST_TIMEOUT`, and
    /// only the interrupted item counts against the model.
    pub fn predict_batch(
        &self,
        requests: Vec<ImageRequest>,
        model_id: Option<&str>,
        ctx: &RequestContext,
        progress_callback: Option<ProgressCallback>,
    ) -> BatchPredictionResponse {
        let progress_callback = progress_callback.as_ref();
        let start = Instant::now();
        let total = requests.len();

        let mut results = IndexMap::new();
        let mut errors = IndexMap::new();

        Self::report_progress(progress_callback, 0.0, "Starting batch prediction...");
        let mut aborted: Option<ErrorResponse> = None;
        for (i, request) in requests.into_iter().enumerate() {
            if aborted.is_none() {
                if let Err(e) = ctx.check() {
                    warn!(remaining = total - i, error = %e, "batch prediction aborted");
                    aborted = Some(e.to_response());
                }
            }
            if let Some(response) = &aborted {
                errors.insert(request.id, response.clone());
                continue;
            }

            let outcome = codec::decode(&request.data).and_then(|decoded| {
                let metadata = ImageMetadata::new(
                    &request.filename,
                    request.data.len() as u64,
                    &decoded,
                    decoded.format.mime_type(),
                );
                self.predict_decoded(&decoded, metadata, model_id, ctx)
            });

            match outcome {
                Ok(result) => {
                    results.insert(request.id, result);
                }
                Err(e @ (ClassifierError::Cancelled | ClassifierError::DeadlineExceeded)) => {
                    warn!(remaining = total - i - 1, error = %e, "batch prediction aborted");
                    let response = e.to_response();
                    errors.insert(request.id, response.clone());
                    aborted = Some(response);
                }
                Err(e) => {
                    errors.insert(
                        request.id,
                        ErrorResponse::new(CODE_PREDICTION_FAILED, "Prediction failed", &e.to_string()),
                    );
                }
            }

            Self::report_progress(
                progress_callback,
                (i + 1) as f32 / total as f32,
                &format!("Processed {}/{} images", i + 1, total),
            );
        }

        let response = BatchPredictionResponse {
            success: errors.is_empty(),
            results,
            errors,
            process_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        info!(
            total,
            failed = response.errors.len(),
            elapsed_ms = response.process_time_ms,
            "batch prediction completed"
        );
        response
    }

    pub fn fetch_result(&self, result_id: &str) -> Result<PredictionResult> {
        self.store.get(result_id)
    }

    pub fn result_count(&self) -> usize {
        self.store.count()
    }

    /// Removes results older than the configured retention window.
    pub fn sweep_results(&self) -> usize {
        self.store.sweep(self.config.results.max_age())
    }

    /// Starts the background sweeper for this service's result store.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        spawn_sweeper(
            self.store.clone(),
            self.config.results.sweep_interval(),
            self.config.results.max_age(),
        )
    }

    pub fn list_models(&self) -> Vec<ModelInfo> {
        self.registry.list()
    }

    pub fn model_health_snapshot(&self) -> HealthSnapshot {
        self.registry.health_snapshot()
    }

    pub fn model_status(&self) -> ModelStatus {
        self.registry.status()
    }

    pub fn stats(&self) -> ModelStats {
        let (total_predictions, average_latency_ms) = self.registry.totals();
        ModelStats {
            models_loaded: self.registry.len(),
            total_predictions,
            average_latency_ms,
            system_health: self.registry.health_snapshot().status,
        }
    }

    /// Reloads a model from disk and registers it with the engine again.
    pub fn reload_model(&self, model_id: &str) -> Result<ModelInfo> {
        self.engine.unregister(model_id);
        match self.registry.reload(model_id) {
            Ok(model) => {
                self.register(&model.info);
                Ok(model.info)
            }
            Err(e) => {
                self.register_placeholder();
                Err(e)
            }
        }
    }

    pub fn unload_model(&self, model_id: &str) -> Result<()> {
        self.registry.unload(model_id)?;
        self.engine.unregister(model_id);
        self.register_placeholder();
        Ok(())
    }

    /// Registers the placeholder if the registry fell back to it.
    fn register_placeholder(&self) {
        if let Ok(placeholder) = self.registry.get(PLACEHOLDER_MODEL_ID) {
            self.register(&placeholder.info);
        }
    }

    /// Checks that a model exists, is healthy, and has a usable input shape
    /// and class list.
    pub fn validate_model_for_prediction(&self, model_id: &str) -> Result<()> {
        let model = self.registry.get(model_id)?;
        if model.health.status != HealthStatus::Healthy {
            return Err(ClassifierError::Inference(format!(
                "model {} is not healthy: {}",
                model_id, model.health.status
            )));
        }

        let info = &model.info;
        if !matches!(info.input_shape.as_slice(), [_, _, _] | [1, _, _, _]) {
            return Err(ClassifierError::InvalidModel {
                id: model_id.to_string(),
                reason: format!("invalid input shape {:?}", info.input_shape),
            });
        }
        if info.classes.is_empty() {
            return Err(ClassifierError::InvalidModel {
                id: model_id.to_string(),
                reason: "model has no classes defined".to_string(),
            });
        }
        Ok(())
    }
}
