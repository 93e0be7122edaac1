//! The types most callers need, in one import.

pub use crate::{
    codec::{decode, sniff_mime, DecodedImage, ImageFormat, ImageMetadata, ImageValidator},
    config::{AppConfig, EngineKind},
    engine::{build_engine, InferenceEngine, SimulatedEngine},
    error::{ClassifierError, ErrorResponse, Result},
    labels::{postprocess, softmax, ClassificationResult},
    pipeline::{
        BatchPredictionResponse, ClassificationService, ImageRequest, ModelStats,
        ProcessedUpload, ProgressCallback, RequestContext,
    },
    processor::{ImagePreprocessor, ImageProcessor, Tensor},
    registry::{HealthSnapshot, HealthStatus, ModelHealth, ModelInfo, ModelRegistry},
    store::{PredictionResult, ResultStore},
};
