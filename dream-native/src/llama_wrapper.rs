use anyhow::{anyhow, Result};
use common::config::ModelConfig;
use common::{DreamError, GenerationParams};
use once_cell::sync::OnceCell;
use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::path::Path;
use tracing::{debug, info, warn};

use llama_cpp_2::{
    context::params::LlamaContextParams,
    llama_backend::LlamaBackend,
    llama_batch::LlamaBatch,
    model::params::LlamaModelParams,
    model::{AddBos, LlamaModel, Special},
    sampling::LlamaSampler,
    token::LlamaToken,
};

use crate::llm_engine::{GenerationOutcome, InferenceBackend, StopReason, Token};

// llama.cpp allows one backend per process; it lives until exit.
static LLAMA_BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn llama_backend() -> Result<&'static LlamaBackend> {
    LLAMA_BACKEND.get_or_try_init(|| {
        info!("Initializing llama.cpp backend");
        LlamaBackend::init().map_err(|e| anyhow!("Failed to initialize backend: {}", e))
    })
}

fn context_params(config: &ModelConfig) -> LlamaContextParams {
    LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(config.n_ctx))
        .with_n_threads(config.n_threads)
        .with_n_threads_batch(config.n_threads_batch)
}

fn build_sampler(params: &GenerationParams) -> LlamaSampler {
    if params.is_greedy() {
        return LlamaSampler::greedy();
    }

    // The chain must end with a final sampler like dist() or greedy()
    LlamaSampler::chain_simple([
        LlamaSampler::top_k(params.top_k),
        LlamaSampler::top_p(params.top_p, 1),
        LlamaSampler::temp(params.temperature),
        LlamaSampler::dist(params.seed),
    ])
}

/// A GGUF model loaded through llama.cpp.
///
/// A fresh context is created for every generation, which gives each reply
/// an empty KV cache the same way clearing the cache would.
pub struct LlamaCppBackend {
    model: LlamaModel,
    config: ModelConfig,
    n_ctx: u32,
}

impl LlamaCppBackend {
    pub fn load(model_path: &Path, config: &ModelConfig) -> Result<Self> {
        info!("Initializing LlamaModel from: {:?}", model_path);
        let backend = llama_backend()?;

        let model_params = LlamaModelParams::default().with_n_gpu_layers(config.n_gpu_layers);

        let model = LlamaModel::load_from_file(backend, model_path, &model_params)
            .map_err(|e| DreamError::InvalidGguf(format!("llama.cpp rejected the model: {}", e)))?;

        // Fail at load time rather than on the first reply if the context does not fit.
        let n_ctx = {
            let ctx = model
                .new_context(backend, context_params(config))
                .map_err(|e| DreamError::MemoryAllocation(format!("inference context: {}", e)))?;
            ctx.n_ctx()
        };

        info!("📊 Vocab size: {}", model.n_vocab());
        info!("📊 Context size: {}", n_ctx);

        Ok(Self {
            model,
            config: config.clone(),
            n_ctx,
        })
    }
}

impl InferenceBackend for LlamaCppBackend {
    fn vocab_size(&self) -> i32 {
        self.model.n_vocab()
    }

    fn context_size(&self) -> u32 {
        self.n_ctx
    }

    fn model_size_bytes(&self) -> u64 {
        self.model.size()
    }

    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<Token>> {
        let add_bos = if add_special { AddBos::Always } else { AddBos::Never };
        let tokens = self
            .model
            .str_to_token(text, add_bos)
            .map_err(|e| anyhow!("Failed to tokenize prompt: {}", e))?;
        Ok(tokens.into_iter().map(|token| token.0).collect())
    }

    fn token_piece(&self, token: Token) -> Result<Vec<u8>> {
        self.model
            .token_to_bytes(LlamaToken(token), Special::Tokenize)
            .map_err(|e| anyhow!("Failed to detokenize {}: {}", token, e))
    }

    fn generate(
        &mut self,
        prompt_tokens: &[Token],
        params: &GenerationParams,
        on_piece: &mut dyn FnMut(&[u8]) -> ControlFlow<()>,
    ) -> Result<GenerationOutcome> {
        if prompt_tokens.is_empty() {
            return Err(DreamError::InferenceFailed("empty prompt".to_string()).into());
        }

        let backend = llama_backend()?;
        let mut ctx = self
            .model
            .new_context(backend, context_params(&self.config))
            .map_err(|e| DreamError::MemoryAllocation(format!("inference context: {}", e)))?;

        let n_ctx = ctx.n_ctx() as usize;
        if prompt_tokens.len() >= n_ctx {
            return Err(DreamError::ContextTooLong {
                tokens: prompt_tokens.len(),
                limit: ctx.n_ctx(),
            }
            .into());
        }

        let mut batch = LlamaBatch::new(n_ctx, 1);
        let last_index = prompt_tokens.len() - 1;
        for (i, &token) in prompt_tokens.iter().enumerate() {
            // Only the last token needs logits for generation
            batch.add(LlamaToken(token), i as i32, &[0], i == last_index)?;
        }

        ctx.decode(&mut batch)
            .map_err(|e| DreamError::InferenceFailed(format!("prompt decode: {}", e)))?;
        debug!("Decoded prompt of {} tokens", prompt_tokens.len());

        let mut sampler = build_sampler(params);
        let budget = (params.max_tokens as usize).min(n_ctx - prompt_tokens.len());
        let mut pos = prompt_tokens.len() as i32;
        let mut generated = 0usize;

        let stop_reason = loop {
            if generated >= budget {
                break StopReason::MaxTokens;
            }

            let token = sampler.sample(&ctx, batch.n_tokens() - 1);
            sampler.accept(token);

            if self.model.is_eog_token(token) {
                debug!("Encountered end of generation token");
                break StopReason::EndOfGeneration;
            }
            generated += 1;

            let piece = match self.model.token_to_bytes(token, Special::Tokenize) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping undecodable token {}: {}", token.0, e);
                    Vec::new()
                }
            };
            if on_piece(&piece).is_break() {
                break StopReason::Callback;
            }

            batch.clear();
            batch.add(token, pos, &[0], true)?;
            pos += 1;

            if let Err(e) = ctx.decode(&mut batch) {
                warn!("Failed to evaluate token: {}", e);
                break StopReason::DecodeError;
            }
        };

        Ok(GenerationOutcome {
            prompt_tokens: prompt_tokens.len(),
            generated_tokens: generated,
            stop_reason,
        })
    }
}
