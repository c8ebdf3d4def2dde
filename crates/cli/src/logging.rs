use plugboard_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` wins over `logging.level` when it is set and parses. `extra`
/// directives are layered on top, e.g. to surface one module's progress.
pub fn env_filter(config: &LoggingConfig, extra: &[&str]) -> EnvFilter {
    let mut filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    for directive in extra {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(error) => eprintln!("ignoring log directive `{directive}`: {error}"),
        }
    }
    filter
}

/// Events go to stderr; stdout belongs to the console protocol.
pub fn init_logging(config: &LoggingConfig, extra: &[&str]) {
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(env_filter(config, extra))
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if installed.is_ok() {
        tracing::debug!(
            event_name = "system.bootstrap.logging_initialized",
            format = config.format.as_str(),
            level = config.level.as_str(),
            "logging initialized"
        );
    }
}
