//! # Vista
//!
//! Vista is a library for image classification. It validates and decodes
//! uploads, turns them into normalized tensors, runs them through a pluggable
//! inference engine, and keeps the ranked results in memory for a while.
//!
//! ## Features
//!
//! - **High-level API**: `ClassificationService` for end-to-end classification.
//! - **Upload policy**: size and type checks backed by magic-byte sniffing.
//! - **Model registry**: models discovered from a directory, with per-model
//!   health derived from their error rates.
//! - **Pluggable inference**: a deterministic simulated engine, and ONNX
//!   Runtime behind the `onnx` feature.
//! - **Result store**: collision-resistant IDs and a background sweeper.
//!
//! ## Modules
//!
//! - `pipeline`: The main entry point for classification.
//! - `codec`: Upload validation, decoding, and re-encoding.
//! - `processor`: Image preprocessing into tensors.
//! - `labels`: Softmax, top-K selection, and class labels.
//! - `registry`: Model metadata, usage statistics, and health.
//! - `engine`: The `InferenceEngine` trait and its implementations.
//! - `store`: Storage and expiry of prediction results.
//! - `config`: Configuration loading from files and the environment.
//! - `error`: Contains the error types for the library.
//! - `prelude`: A collection of the most commonly used types.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod file;
pub mod labels;
pub mod pipeline;
pub mod prelude;
pub mod processor;
pub mod registry;
pub mod store;

pub use crate::error::{ClassifierError, Result};

use config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber. `RUST_LOG` takes precedence over
/// the configured level. Calling it again after a subscriber is installed
/// does nothing.
pub fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}
