//! Logging setup for applications embedding the renderer

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system.
///
/// Reads the filter from `RUST_LOG`, defaulting to `info` so the renderer's
/// stage-by-stage initialization messages are visible.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Initialize logging for tests; repeated calls are harmless.
pub fn init_for_tests() {
    let _ = env_logger::builder().is_test(true).try_init();
}
