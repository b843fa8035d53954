// ============================================================================
// Dream Assistant - on-device inference for the Android app
// ============================================================================
//
// Two JNI surfaces share one engine:
//   com.dreamassistant.ai.LlamaEngine               handle based (jni_llama)
//   com.example.dreamassistant.ai.RealModelLoader   process-wide (jni_model_loader)
// ============================================================================

pub mod jni_common;
pub mod jni_llama;
pub mod jni_model_loader;
pub mod llama_wrapper;
pub mod llm_engine;
pub mod prompt;
pub mod util;

pub use llm_engine::{DreamEngine, Reply};
pub use prompt::PromptStyle;

/// Library version, logged when logging starts.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Set up logging once per process. Safe to call from every entry point.
pub fn init() {
    util::init_logging();
}
