//! Process-wide tracing setup.

use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to bridge log records: {0}")]
    Bridge(#[from] log::SetLoggerError),

    #[error("Failed to install subscriber: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },
}

/// `rust_log` (normally `RUST_LOG`) wins over the configured level.
pub fn env_filter(level: &str, rust_log: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let directives = rust_log.filter(|s| !s.trim().is_empty()).unwrap_or(level);
    EnvFilter::try_new(directives).map_err(|e| LoggingError::Filter {
        filter: directives.to_string(),
        reason: e.to_string(),
    })
}

/// Routes `log` records into tracing and installs the global subscriber,
/// printing plain or JSON lines to stdout. Call once per process.
pub fn init(level: &str, json: bool) -> Result<(), LoggingError> {
    LogTracer::init()?;

    let rust_log = std::env::var("RUST_LOG").ok();
    let filter = env_filter(level, rust_log.as_deref())?;
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true).with_target(true)),
        )?;
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_overrides_level() {
        use tracing_subscriber::filter::LevelFilter;

        let filter = env_filter("info", Some("trace")).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));

        let filter = env_filter("warn", Some("  ")).unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn test_invalid_filter() {
        assert!(matches!(
            env_filter("specdigest=loud", None),
            Err(LoggingError::Filter { .. })
        ));
    }
}
