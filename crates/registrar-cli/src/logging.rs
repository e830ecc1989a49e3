use registrar_config::LogConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber on stderr so stdout stays parseable.
/// `RUST_LOG` overrides the configured level.
pub fn init(config: &LogConfig, force_json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.json || force_json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
