pub mod dream_engine;
pub mod model_loader;
pub mod registry;

use anyhow::Result;
use common::GenerationParams;
use serde::Serialize;
use std::ops::ControlFlow;

pub use dream_engine::{DreamEngine, Reply};

/// Token id as used by llama.cpp
pub type Token = i32;

/// Why a generation call returned.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndOfGeneration,
    MaxTokens,
    /// The caller asked to stop (natural sentence end or a turn marker).
    Callback,
    /// Decoding a sampled token failed; text produced so far is kept.
    DecodeError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub prompt_tokens: usize,
    pub generated_tokens: usize,
    pub stop_reason: StopReason,
}

/// The seam between the persona logic and the llama.cpp calls.
///
/// `generate` runs one complete pass: a clean KV cache, the prompt
/// decoded as one batch, then sample → detokenize → decode until a stop
/// condition. Each piece is handed to `on_piece`, which may end generation
/// early by returning `ControlFlow::Break`.
pub trait InferenceBackend: Send {
    fn vocab_size(&self) -> i32;

    fn context_size(&self) -> u32;

    fn model_size_bytes(&self) -> u64;

    fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<Token>>;

    fn token_piece(&self, token: Token) -> Result<Vec<u8>>;

    fn generate(
        &mut self,
        prompt_tokens: &[Token],
        params: &GenerationParams,
        on_piece: &mut dyn FnMut(&[u8]) -> ControlFlow<()>,
    ) -> Result<GenerationOutcome>;

    /// Touch the weights once so the first real reply is not slowed by paging.
    fn warm_up(&mut self) -> Result<()> {
        let tokens = self.tokenize(crate::prompt::PERSONA_PREAMBLE, true)?;
        let params = GenerationParams {
            max_tokens: 1,
            ..GenerationParams::default()
        };
        self.generate(&tokens, &params, &mut |_| ControlFlow::Break(()))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    //! Scripted backend for exercising the engine without a GGUF file.

    use super::*;
    use anyhow::anyhow;
    use common::DreamError;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct MockCalls {
        pub prompts: Vec<Vec<Token>>,
        pub params: Vec<GenerationParams>,
    }

    pub struct MockBackend {
        pub pieces: Vec<Vec<u8>>,
        pub fail_prompt: bool,
        /// Report a decode failure after this many pieces.
        pub decode_error_after: Option<usize>,
        pub context_size: u32,
        pub calls: Arc<Mutex<MockCalls>>,
    }

    impl MockBackend {
        pub fn new(pieces: &[&str]) -> Self {
            Self {
                pieces: pieces.iter().map(|p| p.as_bytes().to_vec()).collect(),
                fail_prompt: false,
                decode_error_after: None,
                context_size: 2048,
                calls: Arc::new(Mutex::new(MockCalls::default())),
            }
        }

        pub fn from_bytes(pieces: Vec<Vec<u8>>) -> Self {
            Self {
                pieces,
                ..Self::new(&[])
            }
        }
    }

    impl InferenceBackend for MockBackend {
        fn vocab_size(&self) -> i32 {
            256
        }

        fn context_size(&self) -> u32 {
            self.context_size
        }

        fn model_size_bytes(&self) -> u64 {
            64 * 1024 * 1024
        }

        // One token per byte keeps counts predictable.
        fn tokenize(&self, text: &str, add_special: bool) -> Result<Vec<Token>> {
            let mut tokens: Vec<Token> = Vec::new();
            if add_special {
                tokens.push(1);
            }
            tokens.extend(text.bytes().map(Token::from));
            Ok(tokens)
        }

        fn token_piece(&self, token: Token) -> Result<Vec<u8>> {
            match token {
                1 => Ok(b"<bos>".to_vec()),
                t if (0..256).contains(&t) => Ok(vec![t as u8]),
                t => Err(anyhow!("unknown token {}", t)),
            }
        }

        fn generate(
            &mut self,
            prompt_tokens: &[Token],
            params: &GenerationParams,
            on_piece: &mut dyn FnMut(&[u8]) -> ControlFlow<()>,
        ) -> Result<GenerationOutcome> {
            {
                let mut calls = self.calls.lock().unwrap();
                calls.prompts.push(prompt_tokens.to_vec());
                calls.params.push(*params);
            }
            if self.fail_prompt {
                return Err(DreamError::InferenceFailed("prompt decode failed".into()).into());
            }
            if prompt_tokens.len() > self.context_size as usize {
                return Err(DreamError::ContextTooLong {
                    tokens: prompt_tokens.len(),
                    limit: self.context_size,
                }
                .into());
            }

            let mut generated = 0;
            for piece in self.pieces.iter().take(params.max_tokens as usize) {
                generated += 1;
                if on_piece(piece).is_break() {
                    return Ok(GenerationOutcome {
                        prompt_tokens: prompt_tokens.len(),
                        generated_tokens: generated,
                        stop_reason: StopReason::Callback,
                    });
                }
                if self.decode_error_after == Some(generated) {
                    return Ok(GenerationOutcome {
                        prompt_tokens: prompt_tokens.len(),
                        generated_tokens: generated,
                        stop_reason: StopReason::DecodeError,
                    });
                }
            }

            let stop_reason = if generated == params.max_tokens as usize {
                StopReason::MaxTokens
            } else {
                StopReason::EndOfGeneration
            };
            Ok(GenerationOutcome {
                prompt_tokens: prompt_tokens.len(),
                generated_tokens: generated,
                stop_reason,
            })
        }
    }
}
