//! Logging initialization and utilities

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info`.
/// Override with RUST_LOG environment variable, e.g. `RUST_LOG=animtree=trace`
/// to see per-node tick detail.
///
/// # Example
/// ```
/// animtree::core::logging::init();
/// log::info!("Blend tree driver started");
/// ```
pub fn init() {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    ).try_init();
}
