use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
pub mod config;

// Model identity
pub const MODEL_VERSION: &str = "1.0";
pub const MODEL_TRAINING_SAMPLES: u32 = 202;
pub const MODEL_TYPE: &str = "Gemma3n-GGUF";

// Generation defaults tuned for short spoken replies
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const DEFAULT_TOP_K: i32 = 40;
pub const DEFAULT_MAX_TOKENS: u32 = 150;
pub const DEFAULT_SEED: u32 = 1234;

// Memory limits
pub const MAX_CONTEXT_LENGTH: u32 = 2048;
pub const MAX_RESPONSE_LENGTH: usize = 300;
pub const MIN_MODEL_SIZE_MB: u64 = 50;

// Logging tags
pub const LOG_TAG: &str = "SisterModelNative";
pub const PERFORMANCE_TAG: &str = "SisterModelPerf";
pub const INFERENCE_TAG: &str = "SisterInference";

/// Numeric status codes shared with the Java side.
#[repr(i32)]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    SuccessNativeLoaded = 1,
    SuccessFallbackActive = 2,
    ModelNotFound = -1,
    InvalidGguf = -2,
    MemoryAllocation = -3,
    InferenceFailed = -4,
    ContextTooLong = -5,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self.as_i32() >= 0
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DreamError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid GGUF model: {0}")]
    InvalidGguf(String),
    #[error("failed to allocate {0}")]
    MemoryAllocation(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("prompt has {tokens} tokens but the context holds {limit}")]
    ContextTooLong { tokens: usize, limit: u32 },
    #[error("model is not loaded")]
    NotLoaded,
    #[error("invalid generation parameters: {0}")]
    InvalidParams(String),
}

impl DreamError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DreamError::ModelNotFound(_) | DreamError::NotLoaded => ErrorCode::ModelNotFound,
            DreamError::InvalidGguf(_) => ErrorCode::InvalidGguf,
            DreamError::MemoryAllocation(_) => ErrorCode::MemoryAllocation,
            DreamError::InferenceFailed(_) | DreamError::InvalidParams(_) => {
                ErrorCode::InferenceFailed
            }
            DreamError::ContextTooLong { .. } => ErrorCode::ContextTooLong,
        }
    }
}

/// Map any error chain to the code the Java side understands.
pub fn error_code_of(err: &anyhow::Error) -> ErrorCode {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DreamError>())
        .map(DreamError::code)
        .unwrap_or(ErrorCode::InferenceFailed)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: i32,
    pub max_tokens: u32,
    pub seed: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            top_p: DEFAULT_TOP_P,
            top_k: DEFAULT_TOP_K,
            max_tokens: DEFAULT_MAX_TOKENS,
            seed: DEFAULT_SEED,
        }
    }
}

impl GenerationParams {
    pub fn new(temperature: f32, top_p: f32, top_k: i32, max_tokens: u32) -> Self {
        Self {
            temperature,
            top_p,
            top_k,
            max_tokens,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), DreamError> {
        if !(0.1..=2.0).contains(&self.temperature) {
            return Err(DreamError::InvalidParams(format!(
                "temperature {} outside 0.1..=2.0",
                self.temperature
            )));
        }
        if !(0.1..=1.0).contains(&self.top_p) {
            return Err(DreamError::InvalidParams(format!(
                "top_p {} outside 0.1..=1.0",
                self.top_p
            )));
        }
        if !(1..=100).contains(&self.top_k) {
            return Err(DreamError::InvalidParams(format!(
                "top_k {} outside 1..=100",
                self.top_k
            )));
        }
        if self.max_tokens == 0 || self.max_tokens > MAX_CONTEXT_LENGTH {
            return Err(DreamError::InvalidParams(format!(
                "max_tokens {} outside 1..={}",
                self.max_tokens, MAX_CONTEXT_LENGTH
            )));
        }
        Ok(())
    }

    /// Very low temperatures fall back to greedy decoding.
    pub fn is_greedy(&self) -> bool {
        self.temperature < 0.01
    }
}

/// Inference statistics, reported to Java as JSON
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct PerformanceStats {
    pub total_inference_time_ms: u64,
    pub total_inferences: u32,
    pub successful_inferences: u32,
    pub average_inference_time_ms: f64,
    pub success_rate_percent: u32,
    pub memory_usage_bytes: u64,
    pub last_inference_time_ms: u64,
}

impl PerformanceStats {
    pub fn record(&mut self, elapsed_ms: u64, success: bool) {
        self.total_inferences += 1;
        self.total_inference_time_ms += elapsed_ms;
        self.last_inference_time_ms = elapsed_ms;
        if success {
            self.successful_inferences += 1;
        }
        self.average_inference_time_ms =
            self.total_inference_time_ms as f64 / self.total_inferences as f64;
        self.success_rate_percent = self.successful_inferences * 100 / self.total_inferences;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded,
    Error(String),
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LoadState::NotLoaded => write!(f, "Not initialized"),
            LoadState::Loading => write!(f, "Loading..."),
            LoadState::Loaded => write!(f, "Loaded"),
            LoadState::Error(msg) => write!(f, "Error: {}", msg),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelStatus {
    pub current_model: Option<String>,
    pub state: LoadState,
}

impl Default for ModelStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelStatus {
    pub fn new() -> Self {
        Self {
            current_model: None,
            state: LoadState::NotLoaded,
        }
    }

    pub fn set_loading(&mut self, model_path: &str) {
        self.current_model = Some(model_path.to_string());
        self.state = LoadState::Loading;
    }

    pub fn set_loaded(&mut self, model_path: &str) {
        self.current_model = Some(model_path.to_string());
        self.state = LoadState::Loaded;
    }

    // The path is kept so a later preload can retry it.
    pub fn set_error(&mut self, error: &str) {
        self.state = LoadState::Error(error.to_string());
    }

    pub fn clear(&mut self) {
        self.current_model = None;
        self.state = LoadState::NotLoaded;
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_are_valid() {
        let params = GenerationParams::default();
        assert!(params.validate().is_ok());
        assert_eq!(params.top_k, 40);
        assert_eq!(params.max_tokens, 150);
        assert!(!params.is_greedy());
    }

    #[test]
    fn test_params_out_of_range() {
        assert!(GenerationParams::new(0.05, 0.9, 40, 150).validate().is_err());
        assert!(GenerationParams::new(0.7, 1.5, 40, 150).validate().is_err());
        assert!(GenerationParams::new(0.7, 0.9, 0, 150).validate().is_err());
        assert!(GenerationParams::new(0.7, 0.9, 101, 150).validate().is_err());
        assert!(GenerationParams::new(0.7, 0.9, 40, 0).validate().is_err());
        assert!(GenerationParams::new(2.0, 1.0, 100, 2048).validate().is_ok());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(DreamError::ModelNotFound("x".into()).code().as_i32(), -1);
        assert_eq!(DreamError::InvalidGguf("x".into()).code().as_i32(), -2);
        assert_eq!(DreamError::MemoryAllocation("x".into()).code().as_i32(), -3);
        assert_eq!(DreamError::InferenceFailed("x".into()).code().as_i32(), -4);
        assert_eq!(
            DreamError::ContextTooLong { tokens: 3000, limit: 2048 }.code().as_i32(),
            -5
        );
        assert!(ErrorCode::SuccessFallbackActive.is_success());
        assert!(!ErrorCode::InvalidGguf.is_success());
    }

    #[test]
    fn test_error_code_through_context() {
        use anyhow::Context;
        let err: anyhow::Result<()> = Err(DreamError::InvalidGguf("bad magic".into()))
            .context("Failed to load model");
        assert_eq!(error_code_of(&err.unwrap_err()), ErrorCode::InvalidGguf);

        let plain = anyhow::anyhow!("something else");
        assert_eq!(error_code_of(&plain), ErrorCode::InferenceFailed);
    }

    #[test]
    fn test_stats_record() {
        let mut stats = PerformanceStats::default();
        stats.record(100, true);
        stats.record(300, false);
        assert_eq!(stats.total_inferences, 2);
        assert_eq!(stats.successful_inferences, 1);
        assert_eq!(stats.total_inference_time_ms, 400);
        assert_eq!(stats.last_inference_time_ms, 300);
        assert!((stats.average_inference_time_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(stats.success_rate_percent, 50);

        let json: serde_json::Value = serde_json::from_str(&stats.to_json()).unwrap();
        assert_eq!(json["total_inferences"], 2);
        assert_eq!(json["success_rate_percent"], 50);
    }

    #[test]
    fn test_model_status_transitions() {
        let mut status = ModelStatus::new();
        assert!(!status.is_loaded());
        status.set_loading("/data/model.gguf");
        assert_eq!(status.state, LoadState::Loading);
        status.set_error("boom");
        assert_eq!(status.current_model.as_deref(), Some("/data/model.gguf"));
        assert_eq!(status.state.to_string(), "Error: boom");
        status.set_loaded("/data/model.gguf");
        assert!(status.is_loaded());
        status.clear();
        assert_eq!(status.current_model, None);
        assert_eq!(status.state.to_string(), "Not initialized");
    }
}
