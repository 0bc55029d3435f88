//! Tracing subscriber setup. `RUST_LOG` wins over the verbosity flag.

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

pub fn init(verbose: bool) {
    let fallback = if verbose { "teller=debug" } else { "teller=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // Ignore re-initialisation so tests and embedders can call this freely.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
