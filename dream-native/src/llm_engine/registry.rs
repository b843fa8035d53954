//! Engines handed out to Java as opaque `long` handles.
//!
//! A handle is a key into this table, never an address, so a stale or forged
//! value from the Java side can only miss.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::DreamEngine;

pub type Handle = i64;

/// Returned to Java when no engine could be created.
pub const INVALID_HANDLE: Handle = 0;

static NEXT_HANDLE: AtomicI64 = AtomicI64::new(1);

static ENGINES: Lazy<Mutex<HashMap<Handle, Arc<Mutex<DreamEngine>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

pub fn register(engine: DreamEngine) -> Handle {
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
    let mut engines = ENGINES.lock().unwrap_or_else(|e| e.into_inner());
    engines.insert(handle, Arc::new(Mutex::new(engine)));
    debug!("Registered engine handle {} ({} live)", handle, engines.len());
    handle
}

fn lookup(handle: Handle) -> Option<Arc<Mutex<DreamEngine>>> {
    if handle == INVALID_HANDLE {
        return None;
    }
    let engines = ENGINES.lock().unwrap_or_else(|e| e.into_inner());
    engines.get(&handle).cloned()
}

/// Run `f` against the engine behind `handle`.
///
/// The table lock is released before `f` runs, so a long generation on one
/// handle does not block lookups of another.
pub fn with_engine<R>(handle: Handle, f: impl FnOnce(&mut DreamEngine) -> R) -> Option<R> {
    let engine = lookup(handle)?;
    let mut guard = engine.lock().unwrap_or_else(|e| e.into_inner());
    Some(f(&mut guard))
}

pub fn contains(handle: Handle) -> bool {
    lookup(handle).is_some()
}

/// Drop the engine; returns false for unknown handles.
pub fn remove(handle: Handle) -> bool {
    let removed = ENGINES
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .remove(&handle);
    match removed {
        Some(_) => {
            debug!("Released engine handle {}", handle);
            true
        }
        None => {
            warn!("Ignoring release of unknown engine handle {}", handle);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_engine::mock::MockBackend;
    use common::GenerationParams;

    fn mock_engine(pieces: &[&str]) -> DreamEngine {
        DreamEngine::new(
            Box::new(MockBackend::new(pieces)),
            "/tmp/mock.gguf",
            GenerationParams::default(),
        )
    }

    #[test]
    fn test_register_and_use() {
        let handle = register(mock_engine(&["hola"]));
        assert_ne!(handle, INVALID_HANDLE);
        assert!(contains(handle));

        let text = with_engine(handle, |engine| engine.respond("hi")).unwrap();
        assert_eq!(text, "hola");

        assert!(remove(handle));
        assert!(!contains(handle));
        assert!(with_engine(handle, |_| ()).is_none());
    }

    #[test]
    fn test_unknown_handles_miss() {
        assert!(!contains(INVALID_HANDLE));
        assert!(!contains(-42));
        assert!(!remove(i64::MAX));
    }

    #[test]
    fn test_handles_are_unique() {
        let a = register(mock_engine(&[]));
        let b = register(mock_engine(&[]));
        assert_ne!(a, b);
        assert!(remove(a));
        assert!(!remove(a));
        assert!(contains(b));
        assert!(remove(b));
    }
}
