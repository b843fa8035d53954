pub mod gguf;
pub mod memory;
pub mod utf8;

use std::sync::Once;
#[cfg(not(target_os = "android"))]
use tracing::Level;
use tracing::info;

static LOGGING: Once = Once::new();

/// Set up logging once per process. Safe to call from every JNI entry point.
pub fn init_logging() {
    LOGGING.call_once(|| {
        // tracing events reach logcat through tracing's `log` feature
        #[cfg(target_os = "android")]
        android_logger::init_once(
            android_logger::Config::default()
                .with_max_level(log::LevelFilter::Debug)
                .with_tag(common::LOG_TAG),
        );

        // Use DEBUG level for debug builds, INFO for release builds
        #[cfg(all(not(target_os = "android"), not(debug_assertions)))]
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_ansi(!cfg!(windows))
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .try_init();

        #[cfg(all(not(target_os = "android"), debug_assertions))]
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_ansi(!cfg!(windows))
            .with_target(false)
            // Debug builds: show thread info, file, and line number
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .compact()
            .try_init();

        info!("dream-native {} logging initialized", crate::VERSION);
    });
}
