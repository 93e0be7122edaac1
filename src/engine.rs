//! This module defines the `InferenceEngine` seam between "which model" and
//! "how to run it".
//!
//! The registry resolves a model; an engine executes it. Two engines exist:
//! - `SimulatedEngine`, a deterministic stand-in that needs no model files.
//! - `OnnxEngine` (feature `onnx`), which runs `model.onnx` from each model
//!   directory through ONNX Runtime.
//!
//! Engines are selected from configuration with [`build_engine`].

use std::{collections::HashMap, f64::consts::PI, fmt::Debug, sync::Arc};

use parking_lot::RwLock;
use tracing::debug;

use crate::{
    config::{EngineKind, OnnxConfig},
    error::{ClassifierError, Result},
    file::ModelFiles,
    processor::Tensor,
    registry::ModelInfo,
};

/// Executes a model over a preprocessed tensor.
pub trait InferenceEngine: Send + Sync + Debug {
    /// Short name used in logs, e.g. `"simulated"`.
    fn name(&self) -> &'static str;

    /// Prepares a model for execution. Called for every model the registry
    /// loads or reloads.
    fn register(&self, model: &ModelInfo, files: &ModelFiles) -> Result<()>;

    /// Forgets a model.
    fn unregister(&self, model_id: &str);

    /// Produces one raw score per class of `model` for a single-image tensor.
    fn infer(&self, tensor: &Tensor, model: &ModelInfo) -> Result<Vec<f32>>;
}

/// Builds the engine selected by `kind`. For ONNX this also initializes the
/// runtime with the execution providers listed in `onnx_config`.
pub fn build_engine(
    kind: EngineKind,
    onnx_config: &OnnxConfig,
) -> Result<Arc<dyn InferenceEngine>> {
    match kind {
        EngineKind::Simulated => Ok(Arc::new(SimulatedEngine::new())),
        EngineKind::Onnx => {
            if let Some(missing) = onnx_config.providers.iter().find(|p| !p.is_available()) {
                return Err(ClassifierError::Config(format!(
                    "execution provider {} requires building with the `{}` feature",
                    missing.as_str(),
                    missing.as_str()
                )));
            }
            build_onnx(onnx_config)
        }
    }
}

#[cfg(feature = "onnx")]
fn build_onnx(onnx_config: &OnnxConfig) -> Result<Arc<dyn InferenceEngine>> {
    onnx::init(onnx::devices(onnx_config))?;
    Ok(Arc::new(onnx::OnnxEngine::new()))
}

#[cfg(not(feature = "onnx"))]
fn build_onnx(_onnx_config: &OnnxConfig) -> Result<Arc<dyn InferenceEngine>> {
    Err(ClassifierError::Config(
        "the onnx engine requires building with the `onnx` feature".to_string(),
    ))
}

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// A deterministic engine that derives scores from a hash of the input tensor
/// and the class index. Equal tensors always get equal scores.
#[derive(Debug, Default)]
pub struct SimulatedEngine {
    available: RwLock<HashMap<String, bool>>,
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a registered model as (un)available.
    pub fn set_available(&self, model_id: &str, available: bool) {
        if let Some(flag) = self.available.write().get_mut(model_id) {
            *flag = available;
        }
    }

    /// FNV-1a over the tensor length and the bit patterns of its values.
    pub fn seed(tensor: &Tensor) -> u64 {
        let mix = |hash: u64, word: u64| (hash ^ word).wrapping_mul(FNV_PRIME);
        tensor
            .iter()
            .fold(mix(FNV_OFFSET, tensor.len() as u64), |hash, v| {
                mix(hash, u64::from(v.to_bits()))
            })
    }

    /// The score for class `index` under `seed`.
    pub fn score(seed: u64, index: usize) -> f32 {
        let x = ((seed.wrapping_mul(31).wrapping_add(index as u64 * 17)) % 1000) as f64 / 1000.0;
        let confidence = ((-x * 3.0).exp() * (0.3 + 0.7 * (x * PI).sin())).abs();
        confidence.min(1.0) as f32
    }
}

impl InferenceEngine for SimulatedEngine {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn register(&self, model: &ModelInfo, _files: &ModelFiles) -> Result<()> {
        self.available.write().insert(model.id.clone(), true);
        Ok(())
    }

    fn unregister(&self, model_id: &str) {
        self.available.write().remove(model_id);
    }

    fn infer(&self, tensor: &Tensor, model: &ModelInfo) -> Result<Vec<f32>> {
        match self.available.read().get(&model.id) {
            None => {
                return Err(ClassifierError::Inference(format!(
                    "model not found: {}",
                    model.id
                )))
            }
            Some(false) => {
                return Err(ClassifierError::Inference(format!(
                    "model not available: {}",
                    model.id
                )))
            }
            Some(true) => {}
        }
        if tensor.is_empty() {
            return Err(ClassifierError::Inference("empty input tensor".to_string()));
        }

        debug!(model_id = %model.id, "running simulated inference");
        let seed = Self::seed(tensor);
        Ok((0..model.classes.len()).map(|i| Self::score(seed, i)).collect())
    }
}

#[cfg(feature = "onnx")]
pub mod onnx {
    //! ONNX Runtime backed engine.

    use std::collections::HashMap;

    use ndarray::Axis;
    use ort::{execution_providers::CPUExecutionProvider, session::Session, value::Tensor as OrtTensor};
    use parking_lot::{Mutex, RwLock};
    use tracing::info;

    #[cfg(feature = "cuda")]
    use ort::execution_providers::CUDAExecutionProvider;

    #[cfg(feature = "tensorrt")]
    use ort::execution_providers::TensorRTExecutionProvider;

    #[cfg(feature = "coreml")]
    use ort::execution_providers::CoreMLExecutionProvider;

    use super::InferenceEngine;
    use crate::{
        config::{ExecutionProvider, OnnxConfig},
        error::{ClassifierError, Result},
        file::ModelFiles,
        processor::Tensor,
        registry::ModelInfo,
    };

    /// Represents the execution device for the ONNX model.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Device {
        Cpu,
        #[cfg(feature = "cuda")]
        Cuda(i32),
        #[cfg(feature = "tensorrt")]
        TensorRT(i32),
        #[cfg(feature = "coreml")]
        CoreML,
    }

    /// Maps the configured providers onto devices. Providers compiled out of
    /// this build are rejected earlier by [`super::build_engine`].
    pub fn devices(config: &OnnxConfig) -> Vec<Device> {
        config
            .providers
            .iter()
            .filter_map(|provider| match provider {
                ExecutionProvider::Cpu => Some(Device::Cpu),
                #[cfg(feature = "cuda")]
                ExecutionProvider::Cuda => Some(Device::Cuda(config.device_id)),
                #[cfg(feature = "tensorrt")]
                ExecutionProvider::TensorRT => Some(Device::TensorRT(config.device_id)),
                #[cfg(feature = "coreml")]
                ExecutionProvider::CoreML => Some(Device::CoreML),
                #[allow(unreachable_patterns)]
                _ => None,
            })
            .collect()
    }

    /// Initializes the ONNX Runtime with a list of execution providers.
    ///
    /// Call once before the first model is registered.
    pub fn init(devices: Vec<Device>) -> Result<()> {
        let mut providers = Vec::new();
        for device in devices {
            let provider = match device {
                Device::Cpu => CPUExecutionProvider::default().build(),
                #[cfg(feature = "cuda")]
                Device::Cuda(device_id) => CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                #[cfg(feature = "tensorrt")]
                Device::TensorRT(device_id) => TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                #[cfg(feature = "coreml")]
                Device::CoreML => CoreMLExecutionProvider::default().build(),
            };
            providers.push(provider);
        }

        ort::init()
            .with_execution_providers(providers)
            .commit()
            .map_err(|e| ClassifierError::Inference(e.to_string()))?;
        Ok(())
    }

    #[derive(Debug)]
    struct OnnxModel {
        session: Mutex<Session>,
        input_name: String,
        output_name: String,
    }

    /// Runs `model.onnx` files with ONNX Runtime, one session per model.
    #[derive(Debug, Default)]
    pub struct OnnxEngine {
        sessions: RwLock<HashMap<String, OnnxModel>>,
    }

    impl OnnxEngine {
        pub fn new() -> Self {
            Self::default()
        }
    }

    fn ort_err(e: impl std::fmt::Display) -> ClassifierError {
        ClassifierError::Inference(e.to_string())
    }

    impl InferenceEngine for OnnxEngine {
        fn name(&self) -> &'static str {
            "onnx"
        }

        fn register(&self, model: &ModelInfo, files: &ModelFiles) -> Result<()> {
            let threads = num_cpus::get();
            let session = Session::builder()
                .and_then(|b| b.with_intra_threads(threads))
                .and_then(|b| b.commit_from_file(files.model()))
                .map_err(ort_err)?;

            let input_name = session
                .inputs
                .first()
                .map(|i| i.name.clone())
                .ok_or_else(|| ort_err("model has no inputs"))?;
            let output_name = session
                .outputs
                .first()
                .map(|o| o.name.clone())
                .ok_or_else(|| ort_err("model has no outputs"))?;

            info!(model_id = %model.id, "created onnx session");
            self.sessions.write().insert(
                model.id.clone(),
                OnnxModel {
                    session: Mutex::new(session),
                    input_name,
                    output_name,
                },
            );
            Ok(())
        }

        fn unregister(&self, model_id: &str) {
            self.sessions.write().remove(model_id);
        }

        fn infer(&self, tensor: &Tensor, model: &ModelInfo) -> Result<Vec<f32>> {
            let sessions = self.sessions.read();
            let onnx = sessions
                .get(&model.id)
                .ok_or_else(|| ort_err(format!("model not available: {}", model.id)))?;

            let input = OrtTensor::from_array(tensor.clone()).map_err(ort_err)?;
            let mut session = onnx.session.lock();
            let outputs = session
                .run(ort::inputs![onnx.input_name.as_str() => input])
                .map_err(ort_err)?;

            let preds = outputs[onnx.output_name.as_str()]
                .try_extract_array::<f32>()
                .map_err(ort_err)?;

            preds
                .axis_iter(Axis(0))
                .next()
                .map(|row| row.iter().copied().collect())
                .ok_or_else(|| ort_err("model returned an empty batch"))
        }
    }
}
