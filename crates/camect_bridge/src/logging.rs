//! Tracing subscriber setup driven by [`LoggingConfig`].

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::util::TryInitError;

use crate::config::LoggingConfig;

/// Build the per-target filter: the default level plus any overrides
pub fn filter(config: &LoggingConfig) -> Targets {
    config.overrides.iter().fold(
        Targets::new().with_default(LevelFilter::from(config.level)),
        |targets, (target, level)| targets.with_target(target.clone(), LevelFilter::from(*level)),
    )
}

/// Install the global `fmt` subscriber.
///
/// Fails instead of panicking if a subscriber is already installed, so an embedding host that
/// owns logging can call this unconditionally.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter(config))
        .try_init()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tracing::Level;

    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_filter_default_level() {
        let targets = filter(&LoggingConfig::default());
        assert!(targets.would_enable("camect_bridge", &Level::INFO));
        assert!(!targets.would_enable("camect_bridge", &Level::DEBUG));
    }

    #[test]
    fn test_filter_overrides() {
        let config = LoggingConfig {
            level: LogLevel::Warn,
            overrides: HashMap::from([(
                "camect_bridge::integrations".to_string(),
                LogLevel::Trace,
            )]),
        };
        let targets = filter(&config);
        assert!(!targets.would_enable("camect_bridge::engine", &Level::INFO));
        assert!(targets.would_enable("camect_bridge::integrations::camect", &Level::TRACE));
    }
}
