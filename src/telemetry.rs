use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// Installs the global subscriber. `RUST_LOG` wins over the configured level;
/// an unparsable level falls back to `info` with a warning on stderr.
pub fn init(config: &Config) {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match config.log_level.parse::<EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: SANTRA_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    config.log_level, e
                );
                EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
