use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log to stderr so stdout stays clean for results. `RUST_LOG` wins over
/// `--verbose`.
pub fn init(verbose: bool) {
    let default = if verbose { "senti_core=debug,senti=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
