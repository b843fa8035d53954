//! Process-wide model for the `RealModelLoader` surface.
//!
//! Java holds no handle here: one model is loaded at a time and every call
//! goes through the global [`SharedLoader`].
//!
//! The loader lock only guards bookkeeping. A reply runs under the engine's
//! own lock, so status, info and stats queries answer while it is generating.

use anyhow::{Context, Result};
use common::config::AssistantConfig;
use common::{
    DreamError, GenerationParams, ModelStatus, PerformanceStats, MAX_RESPONSE_LENGTH,
    MODEL_TRAINING_SAMPLES, MODEL_TYPE, MODEL_VERSION,
};
use once_cell::sync::Lazy;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::DreamEngine;
use crate::prompt::{self, PromptStyle};
use crate::util::memory::process_memory_bytes;

type LoadFn = fn(&Path, &AssistantConfig) -> Result<DreamEngine>;

struct LoadedModel {
    engine: Arc<Mutex<DreamEngine>>,
    // Copied at load time so info queries never touch the engine lock.
    size_bytes: u64,
    context_size: u32,
}

pub struct ModelLoader {
    config: AssistantConfig,
    status: ModelStatus,
    stats: PerformanceStats,
    model: Option<LoadedModel>,
    load_fn: LoadFn,
}

impl ModelLoader {
    pub fn new(config: AssistantConfig) -> Self {
        Self::with_load_fn(config, DreamEngine::load)
    }

    pub fn with_load_fn(config: AssistantConfig, load_fn: LoadFn) -> Self {
        Self {
            config,
            status: ModelStatus::new(),
            stats: PerformanceStats::default(),
            model: None,
            load_fn,
        }
    }

    /// Load `model_path`, replacing whatever was loaded before.
    pub fn load_model(&mut self, model_path: &Path) -> Result<()> {
        let path_str = model_path.display().to_string();
        info!("Loading Sister's model from {}", path_str);

        if self.model.take().is_some() {
            info!("Releasing previously loaded model");
        }
        self.status.set_loading(&path_str);

        let start = Instant::now();
        match (self.load_fn)(model_path, &self.config) {
            Ok(engine) => {
                self.model = Some(LoadedModel {
                    size_bytes: engine.model_size_bytes(),
                    context_size: engine.context_size(),
                    engine: Arc::new(Mutex::new(engine)),
                });
                self.status.set_loaded(&path_str);
                info!(
                    "✅ Model ready in {:.2}s: {}",
                    start.elapsed().as_secs_f32(),
                    path_str
                );
                Ok(())
            }
            Err(e) => {
                error!("❌ Failed to load model: {:#}", e);
                self.status.set_error(&format!("{:#}", e));
                Err(e)
            }
        }
    }

    fn engine(&self) -> Result<Arc<Mutex<DreamEngine>>, DreamError> {
        self.model
            .as_ref()
            .map(|model| Arc::clone(&model.engine))
            .ok_or(DreamError::NotLoaded)
    }

    fn record_inference(&mut self, elapsed: Duration, success: bool) {
        self.stats.record(elapsed.as_millis() as u64, success);
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some() && self.status.is_loaded()
    }

    pub fn status(&self) -> &ModelStatus {
        &self.status
    }

    pub fn model_info(&self) -> String {
        let mut info = String::new();
        let path = self.status.current_model.as_deref().unwrap_or("none");
        let _ = writeln!(info, "Model: {}", path);
        match &self.model {
            Some(model) => {
                let _ = writeln!(
                    info,
                    "Size: {:.1} MB",
                    model.size_bytes as f64 / (1024.0 * 1024.0)
                );
                let _ = writeln!(info, "Context: {} tokens", model.context_size);
            }
            None => {
                let _ = writeln!(info, "Size: unknown");
            }
        }
        let _ = writeln!(info, "Status: {}", self.status.state);
        let _ = writeln!(info, "Type: {}", MODEL_TYPE);
        let _ = writeln!(info, "Version: {}", MODEL_VERSION);
        let _ = write!(info, "Training samples: {}", MODEL_TRAINING_SAMPLES);
        info
    }

    pub fn cleanup(&mut self) {
        if self.model.take().is_some() {
            info!("🧹 Sister's model unloaded");
        }
        self.status.clear();
        self.stats.reset();
    }

    pub fn params(&self) -> GenerationParams {
        self.config.generation
    }

    /// Takes effect from the next reply.
    pub fn set_generation_params(&mut self, params: GenerationParams) -> Result<(), DreamError> {
        params.validate()?;
        self.config.generation = params;
        Ok(())
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        let mut stats = self.stats.clone();
        stats.memory_usage_bytes = process_memory_bytes();
        stats
    }
}

/// A [`ModelLoader`] shared between JNI threads.
pub struct SharedLoader {
    inner: Mutex<ModelLoader>,
}

impl SharedLoader {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            inner: Mutex::new(loader),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ModelLoader> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn load_model(&self, model_path: &Path) -> Result<()> {
        self.lock().load_model(model_path)
    }

    /// Generate a spoken-length reply for a Gemma-formatted (or raw) prompt.
    pub fn generate(&self, prompt_text: &str) -> Result<String> {
        let (engine, params) = {
            let loader = self.lock();
            (loader.engine()?, loader.params())
        };

        let start = Instant::now();
        let result = reply_with(&engine, params, prompt_text);
        self.lock().record_inference(start.elapsed(), result.is_ok());
        result
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_loaded()
    }

    pub fn model_info(&self) -> String {
        self.lock().model_info()
    }

    pub fn cleanup(&self) {
        self.lock().cleanup()
    }

    pub fn set_generation_params(
        &self,
        temperature: f32,
        top_p: f32,
        top_k: i32,
        max_tokens: u32,
    ) -> Result<(), DreamError> {
        let mut loader = self.lock();
        let params = GenerationParams {
            temperature,
            top_p,
            top_k,
            max_tokens,
            ..loader.params()
        };
        loader.set_generation_params(params)
    }

    pub fn performance_stats_json(&self) -> String {
        self.lock().performance_stats().to_json()
    }

    /// Warm the loaded model, reloading the last known path first if needed.
    pub fn preload(&self) -> Result<()> {
        let engine = {
            let mut loader = self.lock();
            if loader.model.is_none() {
                let path = loader
                    .status
                    .current_model
                    .clone()
                    .map(PathBuf::from)
                    .ok_or(DreamError::NotLoaded)?;
                warn!("Model not resident, reloading {}", path.display());
                loader.load_model(&path)?;
            }
            loader.engine()?
        };

        let mut engine = engine.lock().unwrap_or_else(|e| e.into_inner());
        engine.warm_up().context("Model warm-up failed")
    }
}

fn reply_with(
    engine: &Mutex<DreamEngine>,
    params: GenerationParams,
    prompt_text: &str,
) -> Result<String> {
    let mut engine = engine.lock().unwrap_or_else(|e| e.into_inner());
    if engine.params() != params {
        engine.set_params(params)?;
    }
    let reply = engine.generate(prompt_text, PromptStyle::Gemma)?;
    Ok(prompt::post_process(
        &reply.text,
        PromptStyle::Gemma,
        MAX_RESPONSE_LENGTH,
    ))
}

static LOADER: Lazy<SharedLoader> = Lazy::new(|| {
    let config = AssistantConfig::load_or_default(None).unwrap_or_else(|e| {
        warn!("Ignoring unreadable config, using defaults: {:#}", e);
        AssistantConfig::default()
    });
    SharedLoader::new(ModelLoader::new(config))
});

pub fn global() -> &'static SharedLoader {
    &LOADER
}
