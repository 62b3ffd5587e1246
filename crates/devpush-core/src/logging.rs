use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize a tracing subscriber with default configuration.
///
/// Logs go to stderr so they never mix with command output. The level comes
/// from `RUST_LOG`, defaulting to `info`.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_with_default("info")
}

/// Like [`init`], with a caller-chosen default directive when `RUST_LOG` is
/// unset (e.g. `"devpush_core=debug"` for a verbose flag).
pub fn init_with_default(directive: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .compact();

    let filter_layer =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(directive))?;

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};

    #[test]
    fn test_logging_init() {
        // Only one global subscriber per process; a second init must fail cleanly
        let _ = init();
        assert!(init_with_default("debug").is_err());

        info!("push cycle complete");
        warn!("retrying stream_in");
    }
}
