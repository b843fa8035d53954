// ============================================================================
// JNI Wrappers for the handle-based engine
// ============================================================================
//
// Every model lives behind a `long` handle handed out by initializeModel and
// released by freeModel. Handles are registry keys; a zero, freed or unknown
// handle gets the same answers a missing model would.
//
// Package: com.dreamassistant.ai.LlamaEngine
// ============================================================================

use common::config::AssistantConfig;
use jni::objects::{JClass, JString};
use jni::sys::{jboolean, jfloat, jint, jlong, jstring, JNI_FALSE};
use jni::JNIEnv;
use std::path::Path;
use tracing::{error, info, warn};

use crate::jni_common::{ffi_guard, jstring_to_string, string_to_jstring, to_jboolean};
use crate::llm_engine::registry::{self, Handle, INVALID_HANDLE};
use crate::llm_engine::DreamEngine;
use crate::prompt::replies;

const MODEL_NOT_LOADED: &str = "Model not loaded";
const MODEL_NOT_INITIALIZED: &str = "Model not initialized";

fn initialize_model(model_path: &str) -> Handle {
    let config = AssistantConfig::load_or_default(None).unwrap_or_else(|e| {
        warn!("Ignoring unreadable config, using defaults: {:#}", e);
        AssistantConfig::default()
    });

    match DreamEngine::load(Path::new(model_path), &config) {
        Ok(engine) => {
            let handle = registry::register(engine);
            info!("💕 Sister's personalized AI companion is ready! (handle {})", handle);
            handle
        }
        Err(e) => {
            error!("❌ Failed to load model: {:#}", e);
            INVALID_HANDLE
        }
    }
}

fn generate_response(handle: Handle, user_input: &str) -> String {
    if handle == INVALID_HANDLE {
        error!("❌ Model not initialized");
        return replies::NOT_INITIALIZED.to_string();
    }
    registry::with_engine(handle, |engine| engine.respond(user_input)).unwrap_or_else(|| {
        error!("❌ No engine behind handle {}", handle);
        replies::WAKING_UP.to_string()
    })
}

fn model_info(handle: Handle) -> String {
    if handle == INVALID_HANDLE {
        return MODEL_NOT_LOADED.to_string();
    }
    registry::with_engine(handle, |engine| engine.model_info())
        .unwrap_or_else(|| MODEL_NOT_INITIALIZED.to_string())
}

fn inference_time(handle: Handle) -> f32 {
    registry::with_engine(handle, |engine| engine.last_inference_seconds().unwrap_or(0.0))
        .unwrap_or(-1.0)
}

fn token_count(handle: Handle, text: &str) -> i32 {
    registry::with_engine(handle, |engine| engine.token_count(text))
        .and_then(|count| match count {
            Ok(n) => i32::try_from(n).ok(),
            Err(e) => {
                warn!("Tokenization failed: {:#}", e);
                None
            }
        })
        .unwrap_or(-1)
}

fn tokenize_text(handle: Handle, text: &str) -> String {
    if handle == INVALID_HANDLE {
        return MODEL_NOT_LOADED.to_string();
    }
    match registry::with_engine(handle, |engine| engine.describe_tokens(text)) {
        Some(Ok(description)) => description,
        Some(Err(e)) => format!("Tokenization failed: {:#}", e),
        None => MODEL_NOT_INITIALIZED.to_string(),
    }
}

fn free_model(handle: Handle) {
    if handle == INVALID_HANDLE {
        return;
    }
    let model_path = registry::with_engine(handle, |engine| engine.model_path().to_string());
    info!("🧹 Cleaning up Dream Assistant model...");
    if registry::remove(handle) {
        info!(
            "✅ Dream Assistant model cleaned up: {}",
            model_path.unwrap_or_default()
        );
    }
}

/// Java signature:
/// public native long initializeModel(String modelPath);
///
/// Returns: engine handle, or 0 on failure
#[no_mangle]
pub extern "C" fn Java_com_dreamassistant_ai_LlamaEngine_initializeModel(
    mut env: JNIEnv,
    _class: JClass,
    model_path: JString,
) -> jlong {
    ffi_guard("initializeModel", INVALID_HANDLE, || {
        let path = jstring_to_string(&mut env, &model_path);
        initialize_model(&path)
    })
}

/// Java signature:
/// public native String generateResponse(long modelPtr, String prompt);
#[no_mangle]
pub extern "C" fn Java_com_dreamassistant_ai_LlamaEngine_generateResponse(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    prompt: JString,
) -> jstring {
    let reply = ffi_guard(
        "generateResponse",
        replies::GENERIC_ERROR.to_string(),
        || {
            let input = jstring_to_string(&mut env, &prompt);
            generate_response(handle, &input)
        },
    );
    string_to_jstring(&mut env, &reply)
}

/// Java signature:
/// public native boolean isModelLoaded(long modelPtr);
#[no_mangle]
pub extern "C" fn Java_com_dreamassistant_ai_LlamaEngine_isModelLoaded(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jboolean {
    ffi_guard("isModelLoaded", JNI_FALSE, || {
        to_jboolean(registry::contains(handle))
    })
}

/// Java signature:
/// public native void freeModel(long modelPtr);
#[no_mangle]
pub extern "C" fn Java_com_dreamassistant_ai_LlamaEngine_freeModel(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) {
    ffi_guard("freeModel", (), || free_model(handle))
}

/// Java signature:
/// public native String getModelInfo(long modelPtr);
#[no_mangle]
pub extern "C" fn Java_com_dreamassistant_ai_LlamaEngine_getModelInfo(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jstring {
    let info = ffi_guard("getModelInfo", MODEL_NOT_LOADED.to_string(), || {
        model_info(handle)
    });
    string_to_jstring(&mut env, &info)
}

/// Java signature:
/// public native float getInferenceTime(long modelPtr);
///
/// Returns: seconds spent on the last reply, -1 without a model
#[no_mangle]
pub extern "C" fn Java_com_dreamassistant_ai_LlamaEngine_getInferenceTime(
    _env: JNIEnv,
    _class: JClass,
    handle: jlong,
) -> jfloat {
    ffi_guard("getInferenceTime", -1.0, || inference_time(handle))
}

/// Java signature:
/// public native int getTokenCount(long modelPtr, String text);
#[no_mangle]
pub extern "C" fn Java_com_dreamassistant_ai_LlamaEngine_getTokenCount(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    text: JString,
) -> jint {
    ffi_guard("getTokenCount", -1, || {
        let input = jstring_to_string(&mut env, &text);
        token_count(handle, &input)
    })
}

/// Java signature:
/// public native String tokenizeText(long modelPtr, String text);
#[no_mangle]
pub extern "C" fn Java_com_dreamassistant_ai_LlamaEngine_tokenizeText(
    mut env: JNIEnv,
    _class: JClass,
    handle: jlong,
    text: JString,
) -> jstring {
    let description = ffi_guard("tokenizeText", MODEL_NOT_LOADED.to_string(), || {
        let input = jstring_to_string(&mut env, &text);
        tokenize_text(handle, &input)
    });
    string_to_jstring(&mut env, &description)
}
