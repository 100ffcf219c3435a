//! Client for the Anboto trading API.

pub mod sign;
pub mod trading;
pub mod types;

/// Install a global `tracing` subscriber.
///
/// The filter is taken from `RUST_LOG`, falling back to `info`. Calling this more than once is
/// harmless; only the first call installs a subscriber.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
