// tracing-subscriber setup for host applications.

use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::ConfigError;

/// Logging options. `RUST_LOG` always wins over `default_filter`.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub default_filter: String,
    /// Emit newline-delimited JSON instead of the human format.
    pub json: bool,
    pub with_target: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            default_filter: "warn".into(),
            json: false,
            with_target: false,
        }
    }
}

const SDK_TARGETS: [&str; 3] = ["bds_api", "bds_config", "bds_core"];

impl LogOptions {
    /// SDK crates log at `level`; everything else stays at `warn`.
    pub fn for_level(level: Level) -> Self {
        Self {
            default_filter: sdk_filter(level),
            ..Self::default()
        }
    }
}

/// `EnvFilter` directives raising the SDK crates to `level`.
pub fn sdk_filter(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_owned()];
    directives.extend(SDK_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.join(",")
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(options: &LogOptions) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(options.with_target);

    let result = if options.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_applies_to_sdk_crates_only() {
        assert_eq!(
            sdk_filter(Level::DEBUG),
            "warn,bds_api=debug,bds_config=debug,bds_core=debug"
        );
        let options = LogOptions::for_level(Level::TRACE);
        assert!(options.default_filter.contains("bds_core=trace"));
        assert!(EnvFilter::try_new(&options.default_filter).is_ok());
    }

    #[test]
    fn second_init_fails() {
        let options = LogOptions::default();
        let first = init(&options);
        let second = init(&options);
        // Another test may have installed a subscriber first.
        assert!(first.is_err() || second.is_err());
        assert!(matches!(second, Err(ConfigError::Logging(_))));
    }
}
