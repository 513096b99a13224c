//! Logging setup for the peerswarm binary.

use eyre::Result;
use tracing_subscriber::EnvFilter;

use crate::cli::LogArgs;

/// Initialize logging based on command line arguments.
///
/// The filter is built with the following precedence:
/// 1. If `--quiet` is set, only errors are shown
/// 2. Otherwise `RUST_LOG` if set, or a level derived from `-v` flags
/// 3. Any extra directives from `--log.filter`
pub(crate) fn init_logging(args: &LogArgs) -> Result<()> {
    let filter = if args.quiet {
        EnvFilter::new("error")
    } else {
        let base_level = match args.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

        if let Some(custom) = &args.filter {
            for directive in custom.split(',') {
                if let Ok(d) = directive.parse() {
                    filter = filter.add_directive(d);
                }
            }
        }
        filter
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if args.json {
        builder
            .json()
            .try_init()
            .map_err(|e| eyre::eyre!(e))?;
    } else {
        builder
            .without_time()
            .try_init()
            .map_err(|e| eyre::eyre!(e))?;
    }
    Ok(())
}
