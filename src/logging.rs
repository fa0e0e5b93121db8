//! Logging setup.
//!
//! The crate only emits `tracing` events; installing a subscriber is left to
//! the application. [`init`] is a convenience for binaries, demos and tests.

use tracing_subscriber::EnvFilter;

/// Default filter directive for a policy `verbose` level.
pub fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// Install a global fmt subscriber. `RUST_LOG` takes precedence over the
/// level derived from `verbose`. Returns false when a subscriber was
/// already installed.
pub fn init(verbose: u8) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(0), "warn");
        assert_eq!(default_filter(1), "info");
        assert_eq!(default_filter(5), "debug");
    }

    #[test]
    fn test_second_init_is_harmless() {
        init(0);
        assert!(!init(1));
    }
}
