//! Tracing subscriber initialization.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber.
///
/// Honors `RUST_LOG` when set, otherwise uses the given default filter
/// (e.g. `"dubflow=info"`). Safe to call more than once; later calls
/// are no-ops.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("dubflow=debug");
        init_tracing("dubflow=info");
        // Second call must not panic.
    }
}
