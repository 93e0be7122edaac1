//! # Error Handling
//!
//! This module defines the custom error type for the `vista` library.
//!
//! The `ClassifierError` enum represents every failure the classification core
//! can report. Each variant maps to a stable, machine-readable code through
//! [`ClassifierError::code`], so a transport layer can pick its own status
//! mapping and rendering without matching on message text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CODE_INVALID_IMAGE: &str = "INVALID_IMAGE";
pub const CODE_UNSUPPORTED_FORMAT: &str = "UNSUPPORTED_FORMAT";
pub const CODE_FILE_TOO_LARGE: &str = "FILE_TOO_LARGE";
pub const CODE_MODEL_NOT_FOUND: &str = "MODEL_NOT_FOUND";
pub const CODE_MODEL_LOAD_FAILED: &str = "MODEL_LOAD_FAILED";
pub const CODE_PREDICTION_FAILED: &str = "PREDICTION_FAILED";
pub const CODE_INTERNAL_ERROR: &str = "INTERNAL_ERROR";
pub const CODE_RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
pub const CODE_INVALID_REQUEST: &str = "INVALID_REQUEST";
pub const CODE_NOT_FOUND: &str = "NOT_FOUND";
pub const CODE_REQUEST_TIMEOUT: &str = "REQUEST_TIMEOUT";

/// All errors produced by the classification core.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The upload was rejected before decoding (size or type policy).
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("failed to preprocess image: {0}")]
    Preprocess(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Model metadata is internally inconsistent and the model was refused.
    #[error("invalid model {id}: {reason}")]
    InvalidModel { id: String, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("result not found: {0}")]
    ResultNotFound(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl ClassifierError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    /// The stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::Decode(_) | Self::Preprocess(_) | Self::Image(_) => CODE_INVALID_IMAGE,
            Self::ModelNotFound(_) => CODE_MODEL_NOT_FOUND,
            Self::InvalidModel { .. } => CODE_MODEL_LOAD_FAILED,
            Self::Inference(_) => CODE_PREDICTION_FAILED,
            Self::ResultNotFound(_) => CODE_NOT_FOUND,
            Self::Cancelled | Self::DeadlineExceeded => CODE_REQUEST_TIMEOUT,
            Self::Config(_) => CODE_INVALID_REQUEST,
            Self::Io(_) | Self::Json(_) => CODE_INTERNAL_ERROR,
        }
    }

    /// Converts the error into the structured form handed to callers.
    pub fn to_response(&self) -> ErrorResponse {
        let message = match self {
            Self::Validation { .. } => "Invalid upload",
            Self::Decode(_) | Self::Preprocess(_) | Self::Image(_) => "Invalid image",
            Self::ModelNotFound(_) => "Model not found",
            Self::InvalidModel { .. } => "Model could not be loaded",
            Self::Inference(_) => "Prediction failed",
            Self::ResultNotFound(_) => "Result not found",
            Self::Cancelled | Self::DeadlineExceeded => "Request aborted",
            Self::Config(_) => "Invalid request",
            Self::Io(_) | Self::Json(_) => "Internal error",
        };
        ErrorResponse::new(self.code(), message, &self.to_string())
    }
}

/// A structured error with a stable code, for transports to render.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str, details: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            details: details.to_string(),
        }
    }
}

pub type Result<T, E = ClassifierError> = std::result::Result<T, E>;
