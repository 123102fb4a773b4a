//! Logging setup shared by all subcommands.

use tracing_subscriber::EnvFilter;

/// Command line flags controlling log output.
#[derive(clap::Args, Debug, Clone)]
#[group()]
pub struct LoggingArgs {
    /// Enable debug mode.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Emit logs as JSON lines.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

impl LoggingArgs {
    /// Install the global subscriber.
    pub fn init(&self) {
        init_logging(self.json_logs, self.debug);
    }
}

/// Build the filter used when `RUST_LOG` is not set.
fn default_filter(debug_mode: bool) -> EnvFilter {
    if debug_mode {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    }
}

/// Install a `tracing` subscriber honouring `RUST_LOG`.
pub fn init_logging(json: bool, debug_mode: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(debug_mode));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if let Err(e) = result {
        eprintln!("Logging already initialised: {}", e);
    }
}
