use crate::error::{ClassifierError, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub upload: UploadConfig,
    pub preprocess: PreprocessConfig,
    pub model: ModelConfig,
    pub results: ResultsConfig,
    pub engine: EngineKind,
    pub onnx: OnnxConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size: u64,
    pub allowed_types: Vec<String>,
    pub reencode_quality: u8,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            allowed_types: vec![
                "image/jpeg".to_string(),
                "image/png".to_string(),
                "image/webp".to_string(),
            ],
            reencode_quality: 95,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub width: u32,
    pub height: u32,
    pub normalize: bool,
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            width: 224,
            height: 224,
            normalize: true,
            mean: IMAGENET_MEAN.to_vec(),
            std: IMAGENET_STD.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub path: PathBuf,
    pub version: String,
    pub top_k: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./models"),
            version: "latest".to_string(),
            top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultsConfig {
    pub max_age_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 3600,
            sweep_interval_secs: 3600,
        }
    }
}

impl ResultsConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Which inference backend executes the models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Simulated,
    Onnx,
}

impl FromStr for EngineKind {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "simulated" | "mock" => Ok(Self::Simulated),
            "onnx" => Ok(Self::Onnx),
            other => Err(ClassifierError::Config(format!(
                "unknown inference engine: {}",
                other
            ))),
        }
    }
}

/// ONNX Runtime execution providers, tried in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OnnxConfig {
    pub providers: Vec<ExecutionProvider>,
    pub device_id: i32,
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            providers: vec![ExecutionProvider::Cpu],
            device_id: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
    TensorRT,
    CoreML,
}

impl ExecutionProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::TensorRT => "tensorrt",
            Self::CoreML => "coreml",
        }
    }

    /// Whether this build was compiled with support for the provider.
    pub fn is_available(&self) -> bool {
        match self {
            Self::Cpu => true,
            Self::Cuda => cfg!(feature = "cuda"),
            Self::TensorRT => cfg!(feature = "tensorrt"),
            Self::CoreML => cfg!(feature = "coreml"),
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = ClassifierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "tensorrt" => Ok(Self::TensorRT),
            "coreml" => Ok(Self::CoreML),
            other => Err(ClassifierError::Config(format!(
                "unknown execution provider: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl AppConfig {
    /// Loads a JSON configuration file. Missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let json = fs::read_to_string(config_path)?;
        let config: AppConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from defaults overridden by environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Applies the recognised environment variables on top of `self`.
    ///
    /// Values that fail to parse are ignored and the current value is kept.
    pub fn apply_env(&mut self) {
        if let Some(path) = env_var("MODEL_PATH") {
            self.model.path = PathBuf::from(path);
        }
        if let Some(version) = env_var("MODEL_VERSION") {
            self.model.version = version;
        }
        if let Some(size) = env_parse("MAX_FILE_SIZE") {
            self.upload.max_file_size = size;
        }
        if let Some(types) = env_var("ALLOWED_TYPES") {
            self.upload.allowed_types = types
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(age) = env_parse("RESULT_MAX_AGE") {
            self.results.max_age_secs = age;
        }
        if let Some(interval) = env_parse("CLEANUP_INTERVAL") {
            self.results.sweep_interval_secs = interval;
        }
        if let Some(engine) = env_parse("INFERENCE_ENGINE") {
            self.engine = engine;
        }
        if let Some(providers) = env_var("ONNX_PROVIDERS") {
            let parsed: Result<Vec<ExecutionProvider>> =
                providers.split(',').map(str::parse).collect();
            if let Ok(parsed) = parsed {
                self.onnx.providers = parsed;
            }
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env_var("LOG_FORMAT") {
            match format.to_ascii_lowercase().as_str() {
                "json" => self.logging.format = LogFormat::Json,
                "text" => self.logging.format = LogFormat::Text,
                _ => {}
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.upload.max_file_size == 0 {
            return Err(ClassifierError::Config("max file size must be positive".into()));
        }
        if self.upload.allowed_types.is_empty() {
            return Err(ClassifierError::Config("no allowed file types specified".into()));
        }
        if self.preprocess.width == 0 || self.preprocess.height == 0 {
            return Err(ClassifierError::Config(format!(
                "invalid target size {}x{}",
                self.preprocess.width, self.preprocess.height
            )));
        }
        if self.preprocess.mean.len() != 3 || self.preprocess.std.len() != 3 {
            return Err(ClassifierError::Config(
                "mean and std need exactly three channel values".into(),
            ));
        }
        if self.preprocess.std.iter().any(|&s| s == 0.0) {
            return Err(ClassifierError::Config("std values must be non-zero".into()));
        }
        if self.results.sweep_interval_secs == 0 {
            return Err(ClassifierError::Config(
                "sweep interval must be at least one second".into(),
            ));
        }
        if self.model.top_k == 0 {
            return Err(ClassifierError::Config("top_k must be at least 1".into()));
        }
        Ok(())
    }
}

fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.parse().ok())
}
