// ============================================================================
// JNI marshalling helpers shared by both Java surfaces
// ============================================================================

use jni::objects::JString;
use jni::sys::{jboolean, jstring, JNI_FALSE, JNI_TRUE};
use jni::JNIEnv;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, warn};

/// Java string to Rust; a null reference or a conversion failure gives "".
pub fn jstring_to_string(env: &mut JNIEnv, value: &JString) -> String {
    if value.is_null() {
        return String::new();
    }
    match env.get_string(value) {
        Ok(s) => s.into(),
        Err(e) => {
            warn!("Failed to read Java string: {}", e);
            String::new()
        }
    }
}

/// Rust string to a new local Java reference, or null if allocation fails.
pub fn string_to_jstring(env: &mut JNIEnv, value: &str) -> jstring {
    match env.new_string(value) {
        Ok(s) => s.into_raw(),
        Err(e) => {
            error!("Failed to create Java string: {}", e);
            std::ptr::null_mut()
        }
    }
}

pub fn to_jboolean(value: bool) -> jboolean {
    if value {
        JNI_TRUE
    } else {
        JNI_FALSE
    }
}

/// Run an export body with logging initialised, turning a panic into
/// `fallback` so it never unwinds into the JVM.
pub fn ffi_guard<R>(export: &str, fallback: R, body: impl FnOnce() -> R) -> R {
    crate::init();
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(payload) => {
            error!("💥 Panic in {}: {}", export, panic_message(&*payload));
            fallback
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
