//! Process-wide `tracing` setup for the replay binary and test harnesses.
//!
//! The engine itself only emits events; stroke and lifecycle detail sits at
//! `debug`, host-visible actions (clear, download, complete, reference loads)
//! at `info`.

use tracing_subscriber::EnvFilter;

/// Installs a compact formatter at `info`, or `debug` when `debug` is set.
/// `RUST_LOG` is only honoured in debug mode. Safe to call more than once;
/// later calls leave the first subscriber in place.
pub fn init(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
