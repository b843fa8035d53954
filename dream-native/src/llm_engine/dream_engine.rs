use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use common::config::AssistantConfig;
use common::{DreamError, GenerationParams, PerformanceStats};
use serde::Serialize;
use std::fmt::Write as _;
use std::ops::ControlFlow;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{GenerationOutcome, InferenceBackend, StopReason};
use crate::llama_wrapper::LlamaCppBackend;
use crate::prompt::{self, replies, PromptStyle};
use crate::util::gguf::{self, GgufSummary};
use crate::util::memory::process_memory_bytes;
use crate::util::utf8::Utf8EmitBuffer;

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
}

/// One loaded model plus everything needed to turn user input into a reply.
pub struct DreamEngine {
    backend: Box<dyn InferenceBackend>,
    model_path: String,
    gguf: Option<GgufSummary>,
    params: GenerationParams,
    stats: PerformanceStats,
    last_inference: Option<Duration>,
    loaded_at: DateTime<Local>,
}

impl DreamEngine {
    pub fn new(
        backend: Box<dyn InferenceBackend>,
        model_path: impl Into<String>,
        params: GenerationParams,
    ) -> Self {
        Self {
            backend,
            model_path: model_path.into(),
            gguf: None,
            params,
            stats: PerformanceStats::default(),
            last_inference: None,
            loaded_at: Local::now(),
        }
    }

    /// Validate the GGUF file and load it through llama.cpp.
    pub fn load(model_path: &Path, config: &AssistantConfig) -> Result<Self> {
        info!("🚀 Initializing Sister's Dream Assistant Model...");
        info!("Model path: {}", model_path.display());

        let summary = gguf::validate_model_file(
            model_path,
            config.model.min_model_size_bytes(),
            config.model.sha256.as_deref(),
        )
        .with_context(|| format!("Model file rejected: {}", model_path.display()))?;

        let backend = LlamaCppBackend::load(model_path, &config.model)
            .with_context(|| format!("Failed to load model: {}", model_path.display()))?;

        let mut engine = Self::new(
            Box::new(backend),
            model_path.display().to_string(),
            config.generation,
        );
        engine.gguf = Some(summary);

        info!("✅ Dream Assistant Model Loaded Successfully!");
        Ok(engine)
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }

    pub fn params(&self) -> GenerationParams {
        self.params
    }

    pub fn set_params(&mut self, params: GenerationParams) -> Result<(), DreamError> {
        params.validate()?;
        info!(
            "Generation params: temperature={}, top_p={}, top_k={}, max_tokens={}",
            params.temperature, params.top_p, params.top_k, params.max_tokens
        );
        self.params = params;
        Ok(())
    }

    pub fn vocab_size(&self) -> i32 {
        self.backend.vocab_size()
    }

    pub fn context_size(&self) -> u32 {
        self.backend.context_size()
    }

    pub fn model_size_bytes(&self) -> u64 {
        self.backend.model_size_bytes()
    }

    /// Seconds spent on the last reply, if there was one.
    pub fn last_inference_seconds(&self) -> Option<f32> {
        self.last_inference.map(|d| d.as_secs_f32())
    }

    pub fn stats(&self) -> PerformanceStats {
        let mut stats = self.stats.clone();
        stats.memory_usage_bytes = process_memory_bytes();
        stats
    }

    /// Run the full prompt → sample loop → text pipeline.
    pub fn generate(&mut self, user_input: &str, style: PromptStyle) -> Result<Reply> {
        let start = Instant::now();
        let result = self.generate_inner(user_input, style, start);
        let elapsed = start.elapsed();

        self.last_inference = Some(elapsed);
        self.stats.record(elapsed.as_millis() as u64, result.is_ok());
        debug!(
            target: common::PERFORMANCE_TAG,
            "Inference took {} ms (avg {:.1} ms, success rate {}%)",
            elapsed.as_millis(),
            self.stats.average_inference_time_ms,
            self.stats.success_rate_percent
        );
        result
    }

    fn generate_inner(
        &mut self,
        user_input: &str,
        style: PromptStyle,
        start: Instant,
    ) -> Result<Reply> {
        let full_prompt = style.format(user_input);
        let tokens = self.backend.tokenize(&full_prompt, true)?;
        debug!("🔤 Tokenized {} tokens", tokens.len());

        let limit = self.backend.context_size();
        if tokens.len() >= limit as usize {
            return Err(DreamError::ContextTooLong {
                tokens: tokens.len(),
                limit,
            }
            .into());
        }

        let markers = style.stop_markers();
        let mut utf8 = Utf8EmitBuffer::new();
        let mut response = String::new();

        let outcome: GenerationOutcome = {
            let mut on_piece = |piece: &[u8]| {
                response.push_str(&utf8.push_and_take_valid(piece));
                if let Some(pos) = prompt::find_marker(&response, markers) {
                    response.truncate(pos);
                    return ControlFlow::Break(());
                }
                if prompt::should_stop(&response) {
                    return ControlFlow::Break(());
                }
                ControlFlow::Continue(())
            };
            self.backend.generate(&tokens, &self.params, &mut on_piece)?
        };

        if outcome.stop_reason != StopReason::Callback {
            response.push_str(&utf8.flush_lossy());
        }
        if outcome.stop_reason == StopReason::DecodeError {
            warn!("Generation ended early after a decode failure");
        }

        let mut text = prompt::truncate_at_marker(&response, markers).trim().to_string();
        if text.is_empty() {
            text = replies::GREETING.to_string();
        }

        info!(target: common::INFERENCE_TAG, "🤖 Dream Assistant response: {}", text);
        Ok(Reply {
            text,
            prompt_tokens: outcome.prompt_tokens,
            generated_tokens: outcome.generated_tokens,
            stop_reason: outcome.stop_reason,
            elapsed: start.elapsed(),
        })
    }

    /// Reply for the handle-based surface: failures become friendly messages.
    pub fn respond(&mut self, user_input: &str) -> String {
        info!(target: common::INFERENCE_TAG, "👤 Sister's input: {}", user_input);
        match self.generate(user_input, PromptStyle::Plain) {
            Ok(reply) => {
                info!(
                    "⚡ Generation time: {:.3}s",
                    reply.elapsed.as_secs_f32()
                );
                reply.text
            }
            Err(e) => {
                error!("❌ Generation failed: {:#}", e);
                fallback_reply(&e).to_string()
            }
        }
    }

    pub fn token_count(&self, text: &str) -> Result<usize> {
        Ok(self.backend.tokenize(text, true)?.len())
    }

    /// Debug view of how the model splits `text`.
    pub fn describe_tokens(&self, text: &str) -> Result<String> {
        let tokens = self.backend.tokenize(text, true)?;
        let mut out = format!("Tokens ({}): ", tokens.len());
        for token in tokens {
            let piece = self.backend.token_piece(token).unwrap_or_default();
            let _ = write!(out, "[{}]{} ", token, String::from_utf8_lossy(&piece));
        }
        Ok(out)
    }

    pub fn model_info(&self) -> String {
        let mut info = String::new();
        info.push_str("Dream Assistant Model Info:\n");
        info.push_str("- Specialized for: Sister with speech impairment\n");
        let _ = writeln!(info, "- Vocab size: {}", self.vocab_size());
        let _ = writeln!(info, "- Context size: {}", self.context_size());
        let _ = writeln!(info, "- Model path: {}", self.model_path);
        let _ = writeln!(
            info,
            "- Model size: {:.2} MB",
            self.model_size_bytes() as f64 / (1024.0 * 1024.0)
        );
        if let Some(arch) = self.gguf.as_ref().and_then(|s| s.architecture.as_deref()) {
            let _ = writeln!(info, "- Architecture: {}", arch);
        }
        let _ = writeln!(info, "- Loaded at: {}", self.loaded_at.format("%Y-%m-%d %H:%M:%S"));
        info.push_str("- Status: Ready to help! 💕");
        info
    }

    pub fn warm_up(&mut self) -> Result<()> {
        let start = Instant::now();
        self.backend.warm_up()?;
        info!("Model warm-up took {} ms", start.elapsed().as_millis());
        Ok(())
    }
}

/// Which canned reply a failed generation maps to.
pub fn fallback_reply(err: &anyhow::Error) -> &'static str {
    match err.chain().find_map(|cause| cause.downcast_ref::<DreamError>()) {
        Some(DreamError::InferenceFailed(_)) | Some(DreamError::ContextTooLong { .. }) => {
            replies::PROMPT_FAILED
        }
        Some(DreamError::NotLoaded) => replies::NOT_INITIALIZED,
        _ => replies::GENERIC_ERROR,
    }
}
