// ============================================================================
// JNI Wrappers for the process-wide model loader
// ============================================================================
//
// Package: com.example.dreamassistant.ai.RealModelLoader
// ============================================================================

use common::ErrorCode;
use jni::objects::{JObject, JString};
use jni::sys::{jboolean, jfloat, jint, jstring, JNI_FALSE};
use jni::JNIEnv;
use std::path::Path;
use tracing::{error, info};

use crate::jni_common::{ffi_guard, jstring_to_string, string_to_jstring, to_jboolean};
use crate::llm_engine::model_loader::{self, SharedLoader};

fn load_model_code(loader: &SharedLoader, model_path: &str) -> ErrorCode {
    if model_path.is_empty() {
        error!("❌ Empty model path");
        return ErrorCode::ModelNotFound;
    }
    let code = match loader.load_model(Path::new(model_path)) {
        Ok(()) => ErrorCode::SuccessNativeLoaded,
        Err(e) => common::error_code_of(&e),
    };
    info!("nativeLoadModel finished with code {}", code.as_i32());
    code
}

fn generate_reply(loader: &SharedLoader, input: &str) -> String {
    match loader.generate(input) {
        Ok(reply) => reply,
        Err(e) => {
            error!(
                "❌ Generation failed (code {}): {:#}",
                common::error_code_of(&e).as_i32(),
                e
            );
            String::new()
        }
    }
}

fn apply_generation_params(
    loader: &SharedLoader,
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_tokens: i32,
) -> bool {
    // Negative counts become 0, which validation rejects.
    let max_tokens = u32::try_from(max_tokens).unwrap_or(0);
    match loader.set_generation_params(temperature, top_p, top_k, max_tokens) {
        Ok(()) => true,
        Err(e) => {
            error!("❌ Rejected generation params: {}", e);
            false
        }
    }
}

fn preload_model(loader: &SharedLoader) -> bool {
    match loader.preload() {
        Ok(()) => true,
        Err(e) => {
            error!("❌ Preload failed: {:#}", e);
            false
        }
    }
}

/// Java signature:
/// private native boolean nativeLoadModel(String modelPath);
#[no_mangle]
pub extern "C" fn Java_com_example_dreamassistant_ai_RealModelLoader_nativeLoadModel(
    mut env: JNIEnv,
    _this: JObject,
    model_path: JString,
) -> jboolean {
    ffi_guard("nativeLoadModel", JNI_FALSE, || {
        let path = jstring_to_string(&mut env, &model_path);
        to_jboolean(load_model_code(model_loader::global(), &path).is_success())
    })
}

/// Java signature:
/// private native String nativeGenerateResponse(String prompt);
///
/// Returns: the reply, or "" on failure
#[no_mangle]
pub extern "C" fn Java_com_example_dreamassistant_ai_RealModelLoader_nativeGenerateResponse(
    mut env: JNIEnv,
    _this: JObject,
    prompt: JString,
) -> jstring {
    let reply = ffi_guard("nativeGenerateResponse", String::new(), || {
        let input = jstring_to_string(&mut env, &prompt);
        generate_reply(model_loader::global(), &input)
    });
    string_to_jstring(&mut env, &reply)
}

/// Java signature:
/// private native boolean nativeIsModelLoaded();
#[no_mangle]
pub extern "C" fn Java_com_example_dreamassistant_ai_RealModelLoader_nativeIsModelLoaded(
    _env: JNIEnv,
    _this: JObject,
) -> jboolean {
    ffi_guard("nativeIsModelLoaded", JNI_FALSE, || {
        to_jboolean(model_loader::global().is_loaded())
    })
}

/// Java signature:
/// private native String nativeGetModelInfo();
#[no_mangle]
pub extern "C" fn Java_com_example_dreamassistant_ai_RealModelLoader_nativeGetModelInfo(
    mut env: JNIEnv,
    _this: JObject,
) -> jstring {
    let info = ffi_guard("nativeGetModelInfo", String::new(), || {
        model_loader::global().model_info()
    });
    string_to_jstring(&mut env, &info)
}

/// Java signature:
/// private native void nativeCleanup();
#[no_mangle]
pub extern "C" fn Java_com_example_dreamassistant_ai_RealModelLoader_nativeCleanup(
    _env: JNIEnv,
    _this: JObject,
) {
    ffi_guard("nativeCleanup", (), || model_loader::global().cleanup())
}

/// Java signature:
/// private native boolean nativeSetGenerationParams(float temperature, float topP, int topK, int maxTokens);
#[no_mangle]
pub extern "C" fn Java_com_example_dreamassistant_ai_RealModelLoader_nativeSetGenerationParams(
    _env: JNIEnv,
    _this: JObject,
    temperature: jfloat,
    top_p: jfloat,
    top_k: jint,
    max_tokens: jint,
) -> jboolean {
    ffi_guard("nativeSetGenerationParams", JNI_FALSE, || {
        to_jboolean(apply_generation_params(
            model_loader::global(),
            temperature,
            top_p,
            top_k,
            max_tokens,
        ))
    })
}

/// Java signature:
/// private native String nativeGetPerformanceStats();
///
/// Returns: JSON object with the counters of the loaded model
#[no_mangle]
pub extern "C" fn Java_com_example_dreamassistant_ai_RealModelLoader_nativeGetPerformanceStats(
    mut env: JNIEnv,
    _this: JObject,
) -> jstring {
    let json = ffi_guard("nativeGetPerformanceStats", "{}".to_string(), || {
        model_loader::global().performance_stats_json()
    });
    string_to_jstring(&mut env, &json)
}

/// Java signature:
/// private native boolean nativePreloadModel();
#[no_mangle]
pub extern "C" fn Java_com_example_dreamassistant_ai_RealModelLoader_nativePreloadModel(
    _env: JNIEnv,
    _this: JObject,
) -> jboolean {
    ffi_guard("nativePreloadModel", JNI_FALSE, || {
        to_jboolean(preload_model(model_loader::global()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_engine::model_loader::tests::mock_loader;

    #[test]
    fn test_empty_path_rejected_without_loading() {
        let loader = mock_loader();
        assert_eq!(load_model_code(&loader, ""), ErrorCode::ModelNotFound);
        assert!(!loader.is_loaded());
        assert!(loader.model_info().contains("Status: Not initialized"));
    }

    #[test]
    fn test_missing_model_maps_to_not_found() {
        let loader = mock_loader();
        let code = load_model_code(&loader, "/sdcard/missing.gguf");
        assert_eq!(code.as_i32(), -1);
        assert!(!code.is_success());
        assert!(loader.model_info().contains("Status: Error: "));
    }

    #[test]
    fn test_load_then_reply() {
        let loader = mock_loader();
        assert_eq!(generate_reply(&loader, "hola"), "");

        let code = load_model_code(&loader, "/sdcard/sister.gguf");
        assert_eq!(code, ErrorCode::SuccessNativeLoaded);
        assert!(code.is_success());
        assert_eq!(generate_reply(&loader, "hola"), "¡Claro que sí!");
    }

    #[test]
    fn test_negative_max_tokens_rejected() {
        let loader = mock_loader();
        let before = loader.lock().params();

        assert!(!apply_generation_params(&loader, 0.7, 0.9, 40, -5));
        assert_eq!(loader.lock().params(), before);

        assert!(apply_generation_params(&loader, 0.5, 0.9, 40, 100));
        let after = loader.lock().params();
        assert_eq!(after.max_tokens, 100);
        assert_eq!(after.temperature, 0.5);
    }

    #[test]
    fn test_preload_needs_a_model() {
        let loader = mock_loader();
        assert!(!preload_model(&loader));

        load_model_code(&loader, "/sdcard/sister.gguf");
        assert!(preload_model(&loader));
    }
}
